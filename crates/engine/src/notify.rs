//! Notification sinks.
//!
//! Every sink is fire-and-forget: delivery failures are logged and dropped so
//! that a chat outage never blocks trading.

use async_trait::async_trait;
use parking_lot::Mutex;
use perp_keeper_core::Notifier;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// Telegram Bot API host.
pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) {
        info!(target: "perp_keeper::notify", "{text}");
    }
}

/// Sends notifications through the Telegram Bot API `sendMessage` method.
pub struct TelegramNotifier {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
    chat_id: String,
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("base_url", &self.base_url)
            .field("chat_id", &self.chat_id)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

impl TelegramNotifier {
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: TELEGRAM_API_URL.to_string(),
            token: SecretString::from(token.into()),
            chat_id: chat_id.into(),
        })
    }

    /// Reads `TELEGRAM_TOKEN` and `TELEGRAM_CHAT_ID`; `None` when either is unset.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("TELEGRAM_TOKEN").ok().filter(|v| !v.is_empty())?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok().filter(|v| !v.is_empty())?;
        match Self::new(token, chat_id) {
            Ok(notifier) => Some(notifier),
            Err(e) => {
                warn!(error = %e, "telegram notifier unavailable");
                None
            }
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) {
        info!(target: "perp_keeper::notify", "{text}");

        let url = format!(
            "{}/bot{}/sendMessage",
            self.base_url,
            self.token.expose_secret()
        );
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
        };

        match self.http.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => warn!(status = %response.status(), "telegram rejected message"),
            // reqwest errors embed the URL, which carries the token
            Err(e) => warn!(error = %e.without_url(), "telegram delivery failed"),
        }
    }
}

/// Keeps every message in memory. Used by paper sessions and tests.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    messages: Mutex<Vec<String>>,
}

impl MemoryNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    /// Number of messages containing `needle`.
    #[must_use]
    pub fn count_containing(&self, needle: &str) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.contains(needle))
            .count()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, text: &str) {
        self.messages.lock().push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_telegram_send_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_json(serde_json::json!({"chat_id": "42", "text": "SL placed"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::new("123:abc", "42")
            .unwrap()
            .with_base_url(server.uri());
        notifier.notify("SL placed").await;
    }

    #[tokio::test]
    async fn test_telegram_failure_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::new("t", "1").unwrap().with_base_url(server.uri());
        notifier.notify("still fine").await;

        let unreachable = TelegramNotifier::new("t", "1")
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        unreachable.notify("still fine").await;
    }

    #[test]
    fn test_debug_hides_token() {
        let notifier = TelegramNotifier::new("secret-token", "1").unwrap();
        assert!(!format!("{notifier:?}").contains("secret-token"));
    }

    #[tokio::test]
    async fn test_memory_notifier() {
        let notifier = MemoryNotifier::new();
        notifier.notify("opened LONG").await;
        notifier.notify("closed LONG").await;
        assert_eq!(notifier.messages().len(), 2);
        assert_eq!(notifier.count_containing("LONG"), 2);
        assert_eq!(notifier.count_containing("closed"), 1);
        notifier.clear();
        assert!(notifier.messages().is_empty());
    }
}
