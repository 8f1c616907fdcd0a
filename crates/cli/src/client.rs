//! netmesh API client

use netmesh_common::ExtClient;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

/// Header naming a non-admin caller
const USER_HEADER: &str = "x-netmesh-user";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{kind} ({code}): {message}")]
    Api {
        code: u16,
        kind: String,
        message: String,
    },

    #[error("Unexpected response: {0}")]
    Unexpected(StatusCode),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Error body returned by the server
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: u16,
    kind: String,
    message: String,
}

/// Who the requests are sent as
#[derive(Debug, Clone)]
pub enum Identity {
    /// `Authorization: Bearer <token>`
    Token(String),
    /// `x-netmesh-user: <id>`
    User(String),
    Anonymous,
}

/// Body for create and update. Absent fields are left out of the JSON.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_allowed_ips: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denied_acls: Option<BTreeSet<String>>,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    identity: Identity,
}

impl ApiClient {
    pub fn new(server: &str, identity: Identity) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: format!("{}/api", server.trim_end_matches('/')),
            identity,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.identity {
            Identity::Token(token) => req.bearer_auth(token),
            Identity::User(user) => req.header(USER_HEADER, user),
            Identity::Anonymous => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> ClientResult<Response> {
        let resp = self.authorize(req).send().await?;
        let status = resp.status();
        debug!("{} {}", status, resp.url());
        if status.is_success() {
            return Ok(resp);
        }
        match resp.json::<ApiErrorBody>().await {
            Ok(body) => Err(ClientError::Api {
                code: body.code,
                kind: body.kind,
                message: body.message,
            }),
            Err(_) => Err(ClientError::Unexpected(status)),
        }
    }

    async fn json<T: DeserializeOwned>(&self, req: RequestBuilder) -> ClientResult<T> {
        Ok(self.send(req).await?.json().await?)
    }

    /// Server health and propagation counters
    pub async fn health(&self) -> ClientResult<serde_json::Value> {
        self.json(self.http.get(self.url("/health"))).await
    }

    /// Every client the caller may see, optionally limited to one network
    pub async fn list(&self, network: Option<&str>) -> ClientResult<Vec<ExtClient>> {
        let path = match network {
            Some(network) => format!("/extclients/{network}"),
            None => "/extclients".to_string(),
        };
        self.json(self.http.get(self.url(&path))).await
    }

    pub async fn get(&self, network: &str, client_id: &str) -> ClientResult<ExtClient> {
        self.json(self.http.get(self.url(&format!("/extclients/{network}/{client_id}"))))
            .await
    }

    /// Rendered WireGuard config (`file`) or QR PNG (`qr`)
    pub async fn config(&self, network: &str, client_id: &str, format: &str) -> ClientResult<Vec<u8>> {
        let url = self.url(&format!("/extclients/{network}/{client_id}/{format}"));
        let resp = self.send(self.http.get(url)).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    pub async fn create(
        &self,
        network: &str,
        gateway_id: &str,
        req: &ClientRequest,
    ) -> ClientResult<ExtClient> {
        let url = self.url(&format!("/extclients/{network}/{gateway_id}"));
        self.json(self.http.post(url).json(req)).await
    }

    pub async fn update(
        &self,
        network: &str,
        client_id: &str,
        req: &ClientRequest,
    ) -> ClientResult<ExtClient> {
        let url = self.url(&format!("/extclients/{network}/{client_id}"));
        self.json(self.http.put(url).json(req)).await
    }

    pub async fn delete(&self, network: &str, client_id: &str) -> ClientResult<()> {
        let url = self.url(&format!("/extclients/{network}/{client_id}"));
        self.send(self.http.delete(url)).await?;
        Ok(())
    }
}
