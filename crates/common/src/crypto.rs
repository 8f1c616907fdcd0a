//! WireGuard key handling
//!
//! Keys are 32-byte Curve25519 values carried as standard base64 (44 chars).

use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

/// Length of a raw WireGuard key
pub const KEY_LEN: usize = 32;

/// WireGuard key pair
#[derive(Debug, Clone)]
pub struct WgKeyPair {
    pub private_key: String, // Base64
    pub public_key: String,  // Base64
}

impl WgKeyPair {
    /// Generate a WireGuard keypair using x25519
    pub fn generate() -> Self {
        let mut private_key_bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut private_key_bytes);

        // Curve25519 clamping
        private_key_bytes[0] &= 248;
        private_key_bytes[31] &= 127;
        private_key_bytes[31] |= 64;

        let secret = StaticSecret::from(private_key_bytes);
        let public = PublicKey::from(&secret);

        Self {
            private_key: STANDARD.encode(private_key_bytes),
            public_key: STANDARD.encode(public.as_bytes()),
        }
    }
}

/// Parse a base64 WireGuard key into its raw bytes
pub fn parse_key(key: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = STANDARD
        .decode(key.trim())
        .map_err(|e| Error::bad_request(format!("invalid key encoding: {}", e)))?;

    bytes
        .try_into()
        .map_err(|b: Vec<u8>| Error::bad_request(format!("invalid key length {} (want {})", b.len(), KEY_LEN)))
}

/// Derive the public key for a base64 private key
pub fn public_key_for(private_key: &str) -> Result<String> {
    let secret = StaticSecret::from(parse_key(private_key)?);
    Ok(STANDARD.encode(PublicKey::from(&secret).as_bytes()))
}
