//! Binance USDⓈ-M futures REST client with rate limiting.
//!
//! Every request waits on a governor rate limiter. Signed endpoints append
//! `recvWindow`, `timestamp` and an HMAC `signature` to the query string.
//!
//! # Example
//!
//! ```ignore
//! use perp_keeper_binance::{BinanceAuth, BinanceClient, BinanceClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = BinanceClient::new(BinanceClientConfig::testnet(), BinanceAuth::from_env()?)?;
//!     let position = client.position_risk("ALGOUSDT").await?;
//!     println!("{position:?}");
//!     Ok(())
//! }
//! ```

use crate::auth::{timestamp_ms, BinanceAuth, API_KEY_HEADER};
use crate::error::{BinanceError, Result};
use crate::types::{
    ApiErrorBody, RawAccount, RawBalance, RawExchangeInfo, RawLeverageResponse, RawOpenOrder,
    RawOrderResponse, RawPositionRisk, RawServerTime, RawTickerPrice,
};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use perp_keeper_core::config::{ExchangeConfig, BINANCE_FUTURES_TESTNET_URL, BINANCE_FUTURES_URL};
use perp_keeper_core::{OrderSide, SymbolFilters};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the Binance client.
#[derive(Debug, Clone)]
pub struct BinanceClientConfig {
    /// Base URL for the API.
    pub base_url: String,

    /// Requests per second limit.
    pub requests_per_second: NonZeroU32,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// `recvWindow` sent with signed requests.
    pub recv_window_ms: u64,
}

impl Default for BinanceClientConfig {
    fn default() -> Self {
        Self {
            base_url: BINANCE_FUTURES_URL.to_string(),
            requests_per_second: nonzero!(10u32),
            timeout_secs: 10,
            recv_window_ms: 5_000,
        }
    }
}

impl BinanceClientConfig {
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn testnet() -> Self {
        Self {
            base_url: BINANCE_FUTURES_TESTNET_URL.to_string(),
            ..Default::default()
        }
    }

    /// Builds a client configuration from the keeper's exchange section.
    #[must_use]
    pub fn from_exchange_config(config: &ExchangeConfig) -> Self {
        Self {
            base_url: config.effective_base_url().to_string(),
            requests_per_second: NonZeroU32::new(config.requests_per_second)
                .unwrap_or(nonzero!(10u32)),
            timeout_secs: config.timeout_secs,
            recv_window_ms: config.recv_window_ms,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_second: NonZeroU32) -> Self {
        self.requests_per_second = requests_per_second;
        self
    }

    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

// =============================================================================
// Order Parameters
// =============================================================================

/// Query parameters of a `POST /fapi/v1/order` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderParams {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: &'static str,
    pub quantity: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub reduce_only: bool,
    pub close_position: bool,
}

impl OrderParams {
    #[must_use]
    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal, reduce_only: bool) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: "MARKET",
            quantity: Some(quantity),
            stop_price: None,
            reduce_only,
            close_position: false,
        }
    }

    /// A STOP_MARKET or TAKE_PROFIT_MARKET trigger order.
    #[must_use]
    pub fn trigger(
        symbol: &str,
        side: OrderSide,
        order_type: &'static str,
        stop_price: Decimal,
        close_position: bool,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity: None,
            stop_price: Some(stop_price),
            reduce_only: false,
            close_position,
        }
    }

    /// Renders the unsigned query string.
    #[must_use]
    pub fn to_query(&self) -> String {
        let mut query = format!(
            "symbol={}&side={}&type={}",
            self.symbol,
            self.side.as_str(),
            self.order_type
        );
        if let Some(quantity) = self.quantity {
            query.push_str(&format!("&quantity={}", quantity.normalize()));
        }
        if let Some(stop_price) = self.stop_price {
            query.push_str(&format!("&stopPrice={}", stop_price.normalize()));
            query.push_str("&timeInForce=GTC&workingType=MARK_PRICE");
        }
        if self.close_position {
            query.push_str("&closePosition=true");
        } else if self.reduce_only {
            query.push_str("&reduceOnly=true");
        }
        query.push_str("&newOrderRespType=RESULT");
        query
    }
}

// =============================================================================
// BinanceClient
// =============================================================================

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Binance USDⓈ-M futures REST client.
pub struct BinanceClient {
    config: BinanceClientConfig,
    http: Client,
    rate_limiter: Arc<DirectLimiter>,
    auth: BinanceAuth,
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.config.base_url)
            .field("requests_per_second", &self.config.requests_per_second)
            .finish_non_exhaustive()
    }
}

impl BinanceClient {
    /// Creates a new client.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: BinanceClientConfig, auth: BinanceAuth) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BinanceError::Network(format!("failed to build HTTP client: {e}")))?;

        let quota = Quota::per_second(config.requests_per_second);
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Ok(Self {
            config,
            http,
            rate_limiter,
            auth,
        })
    }

    /// Creates a client with credentials from `BINANCE_API_KEY` / `BINANCE_API_SECRET`.
    ///
    /// # Errors
    /// Returns error if credentials are missing.
    pub fn from_env(config: BinanceClientConfig) -> Result<Self> {
        Self::new(config, BinanceAuth::from_env()?)
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Unsigned GET.
    async fn public_get<T: DeserializeOwned>(&self, path: &str, query: &str) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let url = if query.is_empty() {
            format!("{}{}", self.config.base_url, path)
        } else {
            format!("{}{}?{}", self.config.base_url, path, query)
        };

        tracing::debug!("GET {}", url);

        let response = self.http.get(&url).send().await?;
        Self::handle_response(response).await
    }

    /// Signed request with parameters in the query string.
    async fn signed<T: DeserializeOwned>(&self, method: Method, path: &str, query: &str) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let signed_query = self
            .auth
            .sign_query(query, self.config.recv_window_ms, timestamp_ms())?;
        let url = format!("{}{}?{}", self.config.base_url, path, signed_query);

        tracing::debug!(%method, path, query, "signed request");

        let response = self
            .http
            .request(method, &url)
            .header(API_KEY_HEADER, self.auth.api_key())
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Converts non-success responses into typed errors.
    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if status.as_u16() == 429 || status.as_u16() == 418 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(BinanceError::rate_limit(retry_after));
        }

        let text = response.text().await?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ApiErrorBody>(&text) {
                Ok(body) => BinanceError::api(status.as_u16(), body.code, body.msg),
                Err(_) => BinanceError::api(status.as_u16(), 0, text),
            });
        }

        Ok(serde_json::from_str(&text)?)
    }

    // =========================================================================
    // Account Endpoints
    // =========================================================================

    /// One-way mode position for `symbol`.
    ///
    /// # Errors
    /// Returns error if the API call fails or the symbol is absent.
    pub async fn position_risk(&self, symbol: &str) -> Result<RawPositionRisk> {
        let positions: Vec<RawPositionRisk> = self
            .signed(Method::GET, "/fapi/v2/positionRisk", &format!("symbol={symbol}"))
            .await?;

        positions
            .into_iter()
            .find(|p| p.symbol == symbol && p.position_side.as_deref().unwrap_or("BOTH") == "BOTH")
            .ok_or_else(|| BinanceError::SymbolNotFound(symbol.to_string()))
    }

    /// # Errors
    /// Returns error if the API call fails.
    pub async fn account(&self) -> Result<RawAccount> {
        self.signed(Method::GET, "/fapi/v2/account", "").await
    }

    /// # Errors
    /// Returns error if the API call fails.
    pub async fn balances(&self) -> Result<Vec<RawBalance>> {
        self.signed(Method::GET, "/fapi/v2/balance", "").await
    }

    /// # Errors
    /// Returns error if the API call fails.
    pub async fn change_leverage(&self, symbol: &str, leverage: u32) -> Result<RawLeverageResponse> {
        self.signed(
            Method::POST,
            "/fapi/v1/leverage",
            &format!("symbol={symbol}&leverage={leverage}"),
        )
        .await
    }

    // =========================================================================
    // Order Endpoints
    // =========================================================================

    /// # Errors
    /// Returns error if the API call fails.
    pub async fn open_orders(&self, symbol: &str) -> Result<Vec<RawOpenOrder>> {
        self.signed(Method::GET, "/fapi/v1/openOrders", &format!("symbol={symbol}"))
            .await
    }

    /// # Errors
    /// Returns error if the order is rejected.
    pub async fn new_order(&self, params: &OrderParams) -> Result<RawOrderResponse> {
        tracing::info!(
            symbol = %params.symbol,
            side = %params.side,
            order_type = params.order_type,
            quantity = ?params.quantity,
            stop_price = ?params.stop_price,
            "submitting order"
        );
        self.signed(Method::POST, "/fapi/v1/order", &params.to_query())
            .await
    }

    /// # Errors
    /// Returns error if the order is unknown or the API call fails.
    pub async fn delete_order(&self, symbol: &str, order_id: &str) -> Result<RawOrderResponse> {
        self.signed(
            Method::DELETE,
            "/fapi/v1/order",
            &format!("symbol={symbol}&orderId={order_id}"),
        )
        .await
    }

    // =========================================================================
    // Market Endpoints
    // =========================================================================

    /// # Errors
    /// Returns error if the API call fails.
    pub async fn ticker_price(&self, symbol: &str) -> Result<RawTickerPrice> {
        self.public_get("/fapi/v1/ticker/price", &format!("symbol={symbol}"))
            .await
    }

    /// Tick, lot and notional constraints for `symbol`.
    ///
    /// # Errors
    /// Returns error if the API call fails or the symbol is not listed.
    pub async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        let info: RawExchangeInfo = self.public_get("/fapi/v1/exchangeInfo", "").await?;
        info.symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| BinanceError::SymbolNotFound(symbol.to_string()))?
            .into_filters()
    }

    /// Local clock minus server clock, in milliseconds.
    ///
    /// # Errors
    /// Returns error if the API call fails.
    pub async fn server_time_drift(&self) -> Result<i64> {
        let time: RawServerTime = self.public_get("/fapi/v1/time", "").await?;
        let local = i64::try_from(timestamp_ms()).unwrap_or(i64::MAX);
        Ok(local - time.server_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> BinanceClient {
        BinanceClient::new(
            BinanceClientConfig::default().with_base_url(server.uri()),
            BinanceAuth::new("test-key", "test-secret"),
        )
        .unwrap()
    }

    // ==================== Config Tests ====================

    #[test]
    fn test_client_config_defaults() {
        let config = BinanceClientConfig::default();
        assert_eq!(config.base_url, BINANCE_FUTURES_URL);
        assert_eq!(config.requests_per_second.get(), 10);
        assert_eq!(BinanceClientConfig::testnet().base_url, BINANCE_FUTURES_TESTNET_URL);
    }

    #[test]
    fn test_config_from_exchange_section() {
        let exchange = ExchangeConfig {
            testnet: true,
            requests_per_second: 0,
            ..ExchangeConfig::default()
        };
        let config = BinanceClientConfig::from_exchange_config(&exchange);
        assert_eq!(config.base_url, BINANCE_FUTURES_TESTNET_URL);
        assert_eq!(config.requests_per_second.get(), 10);
    }

    // ==================== Order Params Tests ====================

    #[test]
    fn test_market_order_query() {
        let params = OrderParams::market("ALGOUSDT", OrderSide::Sell, dec!(16.70), true);
        assert_eq!(
            params.to_query(),
            "symbol=ALGOUSDT&side=SELL&type=MARKET&quantity=16.7&reduceOnly=true&newOrderRespType=RESULT"
        );
    }

    #[test]
    fn test_trigger_order_query() {
        let params = OrderParams::trigger("ALGOUSDT", OrderSide::Sell, "STOP_MARKET", dec!(0.2950), true);
        assert_eq!(
            params.to_query(),
            "symbol=ALGOUSDT&side=SELL&type=STOP_MARKET&stopPrice=0.295&timeInForce=GTC&workingType=MARK_PRICE&closePosition=true&newOrderRespType=RESULT"
        );
    }

    // ==================== Mock Server Tests ====================

    #[tokio::test]
    async fn test_position_risk_signed_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/positionRisk"))
            .and(query_param("symbol", "ALGOUSDT"))
            .and(header("X-MBX-APIKEY", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"symbol": "ALGOUSDT", "positionAmt": "40", "entryPrice": "0.25",
                 "markPrice": "0.26", "leverage": "2", "positionSide": "BOTH"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let position = test_client(&server).position_risk("ALGOUSDT").await.unwrap();
        assert_eq!(position.position_amt, "40");
    }

    #[tokio::test]
    async fn test_api_error_body_is_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/fapi/v1/order"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": -2011, "msg": "Unknown order sent."
            })))
            .mount(&server)
            .await;

        let err = test_client(&server)
            .delete_order("ALGOUSDT", "42")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(-2011));
        assert!(err.is_unknown_order());
    }

    #[tokio::test]
    async fn test_rate_limit_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/ticker/price"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let err = test_client(&server).ticker_price("ALGOUSDT").await.unwrap_err();
        assert!(matches!(err, BinanceError::RateLimit { retry_after_secs: 7 }));
    }

    #[tokio::test]
    async fn test_signature_present_on_signed_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fapi/v1/leverage"))
            .and(query_param("leverage", "3"))
            .and(query_param("recvWindow", "5000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "leverage": 3, "maxNotionalValue": "1000000", "symbol": "ALGOUSDT"
            })))
            .mount(&server)
            .await;

        let response = test_client(&server).change_leverage("ALGOUSDT", 3).await.unwrap();
        assert_eq!(response.leverage, 3);

        let requests = server.received_requests().await.unwrap();
        let query = requests[0].url.query().unwrap_or_default().to_string();
        assert!(query.contains("&timestamp="));
        assert!(query.contains("&signature="));
    }
}
