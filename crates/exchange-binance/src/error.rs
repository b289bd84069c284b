//! Error types for the Binance futures integration.
//!
//! Binance reports failures as `{"code": -2011, "msg": "Unknown order sent."}`
//! bodies. [`BinanceError`] keeps the raw code; the conversion into
//! [`GatewayError`] classifies it for the engine.

use perp_keeper_core::GatewayError;
use thiserror::Error;

/// Order no longer exists (`CANCEL_REJECTED` / unknown order).
pub const CODE_UNKNOWN_ORDER: i64 = -2011;
/// Order does not exist when queried.
pub const CODE_NO_SUCH_ORDER: i64 = -2013;
/// API key format invalid.
pub const CODE_BAD_API_KEY: i64 = -2014;
/// Invalid API key, IP, or permissions for action.
pub const CODE_REJECTED_MBX_KEY: i64 = -2015;
/// Margin is insufficient.
pub const CODE_INSUFFICIENT_MARGIN: i64 = -2019;
/// Filter failure (tick, lot, notional).
pub const CODE_FILTER_FAILURE: i64 = -1013;
/// Timestamp outside `recvWindow`.
pub const CODE_TIMESTAMP_OUTSIDE_WINDOW: i64 = -1021;

/// Errors that can occur when talking to Binance.
#[derive(Debug, Error)]
pub enum BinanceError {
    /// Credentials missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// API rejected the request.
    #[error("API error: {status_code} {code} - {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Binance error code (0 when the body carried none).
        code: i64,
        /// Error message from API.
        message: String,
    },

    /// Rate limit exceeded (HTTP 429) or IP banned (HTTP 418).
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimit {
        /// Seconds to wait before retry.
        retry_after_secs: u64,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timeout: {0}")]
    Timeout(String),

    /// Response body did not match the expected shape.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Symbol missing from an exchange response.
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),
}

impl BinanceError {
    /// Creates an API error.
    pub fn api(status_code: u16, code: i64, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            code,
            message: message.into(),
        }
    }

    /// Creates a rate limit error.
    pub fn rate_limit(retry_after_secs: u64) -> Self {
        Self::RateLimit { retry_after_secs }
    }

    /// Returns the Binance error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if the referenced order is already filled or cancelled.
    #[must_use]
    pub fn is_unknown_order(&self) -> bool {
        matches!(self.code(), Some(CODE_UNKNOWN_ORDER | CODE_NO_SUCH_ORDER))
    }

    /// Returns true if the credentials lack permission.
    #[must_use]
    pub fn is_permission(&self) -> bool {
        match self {
            Self::Api {
                status_code, code, ..
            } => *status_code == 401 || matches!(*code, CODE_BAD_API_KEY | CODE_REJECTED_MBX_KEY),
            Self::Configuration(_) => true,
            _ => false,
        }
    }

    /// Returns true if the request itself is malformed and will fail again.
    #[must_use]
    pub fn is_invalid_request(&self) -> bool {
        match self.code() {
            Some(code) => {
                (-1199..=-1100).contains(&code)
                    || matches!(code, CODE_FILTER_FAILURE | CODE_INSUFFICIENT_MARGIN)
            }
            None => matches!(self, Self::SymbolNotFound(_)),
        }
    }

    /// Converts into a gateway error, naming `order_id` for unknown orders.
    #[must_use]
    pub fn into_gateway_for_order(self, order_id: &str) -> GatewayError {
        if self.is_unknown_order() {
            GatewayError::unknown_order(order_id)
        } else {
            self.into()
        }
    }
}

impl From<BinanceError> for GatewayError {
    fn from(err: BinanceError) -> Self {
        if err.is_unknown_order() {
            return GatewayError::unknown_order(err.to_string());
        }
        if err.is_permission() {
            return GatewayError::Permission(err.to_string());
        }
        if err.is_invalid_request() {
            return GatewayError::InvalidRequest(err.to_string());
        }
        match err {
            BinanceError::RateLimit { retry_after_secs } => {
                GatewayError::RateLimited { retry_after_secs }
            }
            BinanceError::Network(msg) => GatewayError::Network(msg),
            BinanceError::Timeout(msg) => GatewayError::Timeout(msg),
            BinanceError::Serialization(msg) => GatewayError::InvalidResponse(msg),
            BinanceError::Api { code, message, .. } => GatewayError::api(code, message),
            other => GatewayError::InvalidRequest(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for BinanceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else if err.is_decode() {
            Self::Serialization(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BinanceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for Binance operations.
pub type Result<T> = std::result::Result<T, BinanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Classification Tests ====================

    #[test]
    fn test_unknown_order_codes() {
        assert!(BinanceError::api(400, -2011, "Unknown order sent.").is_unknown_order());
        assert!(BinanceError::api(400, -2013, "Order does not exist.").is_unknown_order());
        assert!(!BinanceError::api(400, -1013, "Filter failure").is_unknown_order());
    }

    #[test]
    fn test_permission_codes() {
        assert!(BinanceError::api(401, -2015, "Invalid API-key").is_permission());
        assert!(BinanceError::api(400, -2014, "API-key format invalid").is_permission());
        assert!(BinanceError::Configuration("missing key".into()).is_permission());
        assert!(!BinanceError::api(500, -1001, "disconnected").is_permission());
    }

    #[test]
    fn test_invalid_request_codes() {
        assert!(BinanceError::api(400, -1111, "Precision is over the maximum").is_invalid_request());
        assert!(BinanceError::api(400, -2019, "Margin is insufficient").is_invalid_request());
        assert!(!BinanceError::api(400, -1021, "Timestamp outside recvWindow").is_invalid_request());
    }

    // ==================== Gateway Mapping Tests ====================

    #[test]
    fn test_maps_to_gateway_errors() {
        assert!(matches!(
            GatewayError::from(BinanceError::api(400, -2011, "Unknown order sent.")),
            GatewayError::UnknownOrder { .. }
        ));
        assert!(matches!(
            GatewayError::from(BinanceError::api(401, -2015, "denied")),
            GatewayError::Permission(_)
        ));
        assert_eq!(
            GatewayError::from(BinanceError::rate_limit(30)),
            GatewayError::RateLimited {
                retry_after_secs: 30
            }
        );
        assert_eq!(
            GatewayError::from(BinanceError::api(503, -1001, "busy")),
            GatewayError::api(-1001, "busy")
        );
        assert!(matches!(
            GatewayError::from(BinanceError::Serialization("eof".into())),
            GatewayError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_unknown_order_names_order_id() {
        let err = BinanceError::api(400, -2011, "Unknown order sent.").into_gateway_for_order("123");
        assert_eq!(err, GatewayError::unknown_order("123"));
    }

    #[test]
    fn test_timestamp_error_stays_retryable() {
        let err: GatewayError = BinanceError::api(400, CODE_TIMESTAMP_OUTSIDE_WINDOW, "ts").into();
        assert!(err.is_retryable());
    }
}
