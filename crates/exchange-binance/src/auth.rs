//! HMAC-SHA256 query signing for Binance signed endpoints.
//!
//! Signed requests carry `timestamp` and `recvWindow` parameters and a
//! `signature` computed over the full query string. The API key travels in
//! the `X-MBX-APIKEY` header.
//!
//! # Security
//!
//! - The secret is held in a [`SecretString`] and never logged
//! - The API key is zeroized on drop

use crate::error::{BinanceError, Result};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Default environment variable for the API key.
pub const API_KEY_ENV: &str = "BINANCE_API_KEY";
/// Default environment variable for the API secret.
pub const API_SECRET_ENV: &str = "BINANCE_API_SECRET";

/// Request signer for Binance.
pub struct BinanceAuth {
    api_key: String,
    api_secret: SecretString,
}

impl std::fmt::Debug for BinanceAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceAuth")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

impl Drop for BinanceAuth {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

impl BinanceAuth {
    /// Creates a signer from an API key and secret.
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: SecretString::from(api_secret.into()),
        }
    }

    /// Creates a signer from `BINANCE_API_KEY` and `BINANCE_API_SECRET`.
    ///
    /// # Errors
    /// Returns error if either variable is missing or empty.
    pub fn from_env() -> Result<Self> {
        Self::from_env_vars(API_KEY_ENV, API_SECRET_ENV)
    }

    /// Creates a signer from custom environment variable names.
    ///
    /// # Errors
    /// Returns error if either variable is missing or empty.
    pub fn from_env_vars(api_key_env: &str, api_secret_env: &str) -> Result<Self> {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| {
                    BinanceError::Configuration(format!("missing environment variable: {name}"))
                })
        };
        Ok(Self::new(read(api_key_env)?, read(api_secret_env)?))
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Hex-encoded HMAC-SHA256 of `payload`.
    ///
    /// # Errors
    /// Returns error if the secret cannot key the MAC.
    pub fn signature(&self, payload: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.expose_secret().as_bytes())
            .map_err(|e| BinanceError::Configuration(format!("invalid API secret: {e}")))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Appends `recvWindow`, `timestamp` and `signature` to `query`.
    ///
    /// # Errors
    /// Returns error if signing fails.
    pub fn sign_query(&self, query: &str, recv_window_ms: u64, timestamp_ms: u64) -> Result<String> {
        let mut signed = String::with_capacity(query.len() + 96);
        if !query.is_empty() {
            signed.push_str(query);
            signed.push('&');
        }
        signed.push_str(&format!("recvWindow={recv_window_ms}&timestamp={timestamp_ms}"));
        let signature = self.signature(&signed)?;
        signed.push_str("&signature=");
        signed.push_str(&signature);
        Ok(signed)
    }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
