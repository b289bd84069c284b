//! Binance USDⓈ-M futures integration for the perp-keeper engine.
//!
//! This crate provides:
//! - REST client with rate limiting for the futures API
//! - HMAC-SHA256 request signing
//! - Error mapping from Binance `{code, msg}` bodies to gateway errors
//! - An [`ExchangeGateway`](perp_keeper_core::ExchangeGateway) implementation
//!
//! # Authentication
//!
//! Set the following environment variables:
//!
//! - `BINANCE_API_KEY`: API key
//! - `BINANCE_API_SECRET`: API secret
//!
//! # API Endpoints
//!
//! - `GET /fapi/v2/positionRisk` - Position for a symbol
//! - `GET /fapi/v2/account` - Trading permission and leverage settings
//! - `GET /fapi/v2/balance` - Asset balances
//! - `POST /fapi/v1/leverage` - Change leverage
//! - `GET /fapi/v1/openOrders` - Open orders
//! - `POST /fapi/v1/order` - Submit order
//! - `DELETE /fapi/v1/order` - Cancel order
//! - `GET /fapi/v1/ticker/price` - Last price
//! - `GET /fapi/v1/exchangeInfo` - Symbol filters
//! - `GET /fapi/v1/time` - Server time

pub mod auth;
pub mod client;
pub mod error;
pub mod gateway;
pub mod types;

pub use auth::BinanceAuth;
pub use client::{BinanceClient, BinanceClientConfig, OrderParams};
pub use error::{BinanceError, Result};
