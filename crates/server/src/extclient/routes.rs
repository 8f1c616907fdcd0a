//! Ext-client API routes
//!
//! Mounted under `/api`. Caller identity comes from headers set by the
//! upstream auth layer: a bearer token equal to the master key is the
//! administrator, otherwise `x-netmesh-user` names a tenant.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use netmesh_common::{Error, ExtClient};
use std::sync::Arc;
use tracing::debug;

use super::access::Caller;
use super::resolver::ConfigFormat;
use super::service::ExtClientService;
use super::validate::ExtClientRequest;
use crate::qr;

/// Header carrying a non-admin principal
pub const USER_HEADER: &str = "x-netmesh-user";

// ============================================================================
// State
// ============================================================================

pub struct ApiState {
    pub service: ExtClientService,
    pub master_key: String,
}

// ============================================================================
// Errors
// ============================================================================

/// Error response: `{"code", "kind", "message"}`
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status =
            StatusCode::from_u16(kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            debug!("Request rejected: {}", self.0);
        }
        (
            status,
            Json(serde_json::json!({
                "code": status.as_u16(),
                "kind": kind,
                "message": self.0.to_string(),
            })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Router
// ============================================================================

pub fn extclient_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/extclients", get(list_all_handler))
        .route("/extclients/:network", get(list_network_handler))
        .route(
            "/extclients/:network/:id",
            get(get_handler)
                .put(update_handler)
                .delete(delete_handler)
                .post(create_handler),
        )
        .route("/extclients/:network/:id/:format", get(config_handler))
        .with_state(state)
}

// ============================================================================
// Auth helpers
// ============================================================================

fn extract_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
}

pub fn caller_from_headers(state: &ApiState, headers: &HeaderMap) -> Result<Caller, Error> {
    if let Some(token) = extract_token(headers) {
        if !state.master_key.is_empty() && token == state.master_key {
            return Ok(Caller::Admin);
        }
        return Err(Error::forbidden("invalid token"));
    }

    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(|u| Caller::User(u.to_string()))
        .ok_or_else(|| Error::forbidden("no caller identity"))
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_all_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<ExtClient>>> {
    let caller = caller_from_headers(&state, &headers)?;
    Ok(Json(state.service.list_visible(&caller)?))
}

async fn list_network_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(network): Path<String>,
) -> ApiResult<Json<Vec<ExtClient>>> {
    let caller = caller_from_headers(&state, &headers)?;
    Ok(Json(state.service.list_network(&caller, &network)?))
}

async fn get_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path((network, client_id)): Path<(String, String)>,
) -> ApiResult<Json<ExtClient>> {
    let caller = caller_from_headers(&state, &headers)?;
    Ok(Json(state.service.get(&caller, &network, &client_id)?))
}

async fn config_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path((network, client_id, format)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let caller = caller_from_headers(&state, &headers)?;
    let format: ConfigFormat = format.parse().unwrap_or_default();

    let response = match format {
        ConfigFormat::Record => Json(state.service.get(&caller, &network, &client_id)?).into_response(),
        ConfigFormat::File => {
            let (client, config) = state.service.config(&caller, &network, &client_id)?;
            (
                [
                    (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}.conf\"", client.client_id),
                    ),
                ],
                config.render(),
            )
                .into_response()
        }
        ConfigFormat::Qr => {
            let (_, config) = state.service.config(&caller, &network, &client_id)?;
            let png = qr::render_png(&config.render())?;
            ([(header::CONTENT_TYPE, "image/png")], png).into_response()
        }
    };
    Ok(response)
}

/// `id` is the ingress gateway node id
async fn create_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path((network, node_id)): Path<(String, String)>,
    Json(req): Json<ExtClientRequest>,
) -> ApiResult<impl IntoResponse> {
    let caller = caller_from_headers(&state, &headers)?;
    let client = state.service.create(&caller, &network, &node_id, req)?;
    Ok((StatusCode::OK, Json(client)))
}

async fn update_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path((network, client_id)): Path<(String, String)>,
    Json(req): Json<ExtClientRequest>,
) -> ApiResult<Json<ExtClient>> {
    let caller = caller_from_headers(&state, &headers)?;
    Ok(Json(state.service.update(&caller, &network, &client_id, req)?))
}

async fn delete_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path((network, client_id)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let caller = caller_from_headers(&state, &headers)?;
    let client = state.service.delete(&caller, &network, &client_id)?;
    Ok(Json(serde_json::json!({
        "deleted": client.client_id,
        "network": client.network,
    })))
}
