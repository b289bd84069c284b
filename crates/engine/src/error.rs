use perp_keeper_core::GatewayError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Failures surfaced by the engine's entry points.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// A close did not flatten the position.
    #[error("position still open after close (remaining quantity {remaining})")]
    PositionStillOpen { remaining: Decimal },

    /// Entry order was accepted but the exchange reports no position.
    #[error("entry order accepted but no position reported by the exchange")]
    NoPositionAfterFill,

    #[error("insufficient {asset} balance: required {required}, available {available}")]
    InsufficientBalance {
        asset: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("invalid symbol filters: {0}")]
    InvalidFilters(String),

    #[error("cannot open a flat position")]
    FlatDirection,

    #[error("futures trading is disabled for these credentials")]
    TradingDisabled,

    #[error("another instance holds the lock (pid {pid})")]
    LockHeld { pid: u32 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Returns true if startup must abort on this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Gateway(e) => e.is_fatal(),
            Self::TradingDisabled | Self::LockHeld { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fatal_classification() {
        assert!(EngineError::TradingDisabled.is_fatal());
        assert!(EngineError::LockHeld { pid: 1 }.is_fatal());
        assert!(EngineError::from(GatewayError::Permission("denied".into())).is_fatal());
        assert!(!EngineError::from(GatewayError::Network("reset".into())).is_fatal());
        assert!(!EngineError::NoPositionAfterFill.is_fatal());
    }

    #[test]
    fn test_display() {
        let err = EngineError::InsufficientBalance {
            asset: "USDT".into(),
            required: dec!(5),
            available: dec!(3.2),
        };
        assert_eq!(
            err.to_string(),
            "insufficient USDT balance: required 5, available 3.2"
        );
        assert_eq!(
            EngineError::from(GatewayError::unknown_order("9")).to_string(),
            "unknown order: 9"
        );
    }
}
