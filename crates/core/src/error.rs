//! Error types shared by every exchange gateway.
//!
//! Gateways translate their transport and venue-specific failures into
//! [`GatewayError`] so the engine can classify them without knowing which
//! exchange produced them.

use thiserror::Error;

/// Errors returned by an [`ExchangeGateway`](crate::traits::ExchangeGateway).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Network failure before a response was received.
    #[error("network error: {0}")]
    Network(String),

    /// Request did not complete in time.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Exchange rate limit hit.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds suggested by the exchange before retrying.
        retry_after_secs: u64,
    },

    /// Exchange rejected the request with an error code.
    #[error("API error {code}: {message}")]
    Api {
        /// Venue error code (HTTP status when no venue code is available).
        code: i64,
        /// Message returned by the venue.
        message: String,
    },

    /// Order does not exist anymore (already filled or cancelled).
    #[error("unknown order: {order_id}")]
    UnknownOrder {
        /// The order id that was referenced.
        order_id: String,
    },

    /// Credentials are missing permissions (e.g. futures trading disabled).
    #[error("permission denied: {0}")]
    Permission(String),

    /// Request parameters were rejected before reaching the matching engine.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Response could not be parsed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Creates an API error from a venue code and message.
    pub fn api(code: i64, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            message: message.into(),
        }
    }

    /// Creates an unknown order error.
    pub fn unknown_order(order_id: impl Into<String>) -> Self {
        Self::UnknownOrder {
            order_id: order_id.into(),
        }
    }

    /// Returns true if retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::UnknownOrder { .. } | Self::Permission(_) | Self::InvalidRequest(_)
        )
    }

    /// Returns true if the referenced order is already gone.
    #[must_use]
    pub fn is_unknown_order(&self) -> bool {
        matches!(self, Self::UnknownOrder { .. })
    }

    /// Returns true if the process should not keep trading with these credentials.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Permission(_))
    }
}

/// Result alias for gateway calls.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
