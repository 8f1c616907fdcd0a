//! Request validation for external clients
//!
//! Client ids must be:
//! - 1-32 characters
//! - [A-Za-z0-9_-] characters only
//!
//! Public keys must decode to a 32-byte WireGuard key, extra allowed IPs must
//! be CIDRs and the DNS override must be a bare IP.

use ipnetwork::IpNetwork;
use netmesh_common::{crypto, Error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;

/// Writable fields of an external client.
///
/// Every field is optional: on create an absent field takes its default, on
/// update it leaves the stored value alone. Empty strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtClientRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_allowed_ips: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_acls: Option<BTreeSet<String>>,
}

impl ExtClientRequest {
    pub fn client_id(&self) -> Option<&str> {
        non_empty(&self.client_id)
    }

    pub fn public_key(&self) -> Option<&str> {
        non_empty(&self.public_key)
    }

    pub fn dns(&self) -> Option<&str> {
        non_empty(&self.dns)
    }

    /// Check every supplied field. Nothing is written before this passes.
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(id) = self.client_id() {
            validate_client_id(id).map_err(|e| Error::bad_request(e.to_string()))?;
        }
        if let Some(key) = self.public_key() {
            crypto::parse_key(key)?;
        }
        if let Some(ranges) = &self.extra_allowed_ips {
            for range in ranges {
                validate_cidr(range)?;
            }
        }
        if let Some(dns) = self.dns() {
            dns.parse::<IpAddr>()
                .map_err(|_| Error::bad_request(format!("invalid DNS address '{}'", dns)))?;
        }
        Ok(())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn validate_cidr(range: &str) -> Result<(), Error> {
    if !range.contains('/') {
        return Err(Error::bad_request(format!(
            "invalid CIDR '{}': missing prefix length",
            range
        )));
    }
    range
        .parse::<IpNetwork>()
        .map(|_| ())
        .map_err(|e| Error::bad_request(format!("invalid CIDR '{}': {}", range, e)))
}

/// Client id validation error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientIdError {
    Empty,
    TooLong { max: usize, got: usize },
    InvalidCharacter { position: usize, char: char },
}

impl std::fmt::Display for ClientIdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Client id cannot be empty"),
            Self::TooLong { max, got } => {
                write!(f, "Client id must be at most {} characters (got {})", max, got)
            }
            Self::InvalidCharacter { position, char } => write!(
                f,
                "Invalid character '{}' at position {}. Only letters, numbers, '-' and '_' are allowed.",
                char, position
            ),
        }
    }
}

impl std::error::Error for ClientIdError {}

pub const MAX_CLIENT_ID_LEN: usize = 32;

/// Validate a client id token
pub fn validate_client_id(id: &str) -> Result<(), ClientIdError> {
    if id.is_empty() {
        return Err(ClientIdError::Empty);
    }
    let len = id.chars().count();
    if len > MAX_CLIENT_ID_LEN {
        return Err(ClientIdError::TooLong {
            max: MAX_CLIENT_ID_LEN,
            got: len,
        });
    }
    for (i, c) in id.chars().enumerate() {
        if !matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_') {
            return Err(ClientIdError::InvalidCharacter { position: i, char: c });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmesh_common::{ErrorKind, WgKeyPair};

    #[test]
    fn test_valid_client_ids() {
        assert!(validate_client_id("cli1").is_ok());
        assert!(validate_client_id("laptop_home-2").is_ok());
        assert!(validate_client_id(&"a".repeat(32)).is_ok());
    }

    #[test]
    fn test_invalid_client_ids() {
        assert_eq!(validate_client_id(""), Err(ClientIdError::Empty));
        assert!(matches!(
            validate_client_id(&"a".repeat(33)),
            Err(ClientIdError::TooLong { .. })
        ));
        assert_eq!(
            validate_client_id("bad id"),
            Err(ClientIdError::InvalidCharacter { position: 3, char: ' ' })
        );
        assert!(validate_client_id("a/b").is_err());
    }

    #[test]
    fn test_request_validation() {
        let kp = WgKeyPair::generate();
        let req = ExtClientRequest {
            client_id: Some("cli1".into()),
            public_key: Some(kp.public_key),
            extra_allowed_ips: Some(vec!["192.168.10.0/24".into(), "fd00:1::/64".into()]),
            dns: Some("1.1.1.1".into()),
            ..Default::default()
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_request_rejections_are_bad_request() {
        let cases = vec![
            ExtClientRequest {
                client_id: Some("no spaces".into()),
                ..Default::default()
            },
            ExtClientRequest {
                public_key: Some("short".into()),
                ..Default::default()
            },
            ExtClientRequest {
                extra_allowed_ips: Some(vec!["10.0.0.300/24".into()]),
                ..Default::default()
            },
            ExtClientRequest {
                extra_allowed_ips: Some(vec!["10.0.0.1".into()]),
                ..Default::default()
            },
            ExtClientRequest {
                dns: Some("dns.example.com".into()),
                ..Default::default()
            },
        ];
        for req in cases {
            let err = req.validate().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BadRequest, "{:?}", req);
        }
    }

    #[test]
    fn test_empty_strings_are_absent() {
        let req = ExtClientRequest {
            client_id: Some("".into()),
            public_key: Some("  ".into()),
            dns: Some("".into()),
            ..Default::default()
        };
        assert!(req.validate().is_ok());
        assert!(req.client_id().is_none());
        assert!(req.public_key().is_none());
        assert!(req.dns().is_none());
    }
}
