//! Minimal Telegram Bot API client: long polling and plain/HTML messages.

use async_trait::async_trait;
use reqwest::Client as Http;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::time::Duration;
use streamvisor_core::{ChatId, Notifier, NotifyError};
use thiserror::Error;
use tracing::debug;

const API_BASE: &str = "https://api.telegram.org";

/// Seconds `getUpdates` may hold the connection open
pub const LONG_POLL_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    #[error("Bot API error {code:?}: {description}")]
    Api {
        code: Option<i64>,
        description: String,
    },
}

// Request URLs embed the bot token, so they never reach error text
impl From<reqwest::Error> for TelegramError {
    fn from(error: reqwest::Error) -> Self {
        TelegramError::Http(error.without_url())
    }
}

impl TelegramError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            TelegramError::Http(_) => true,
            TelegramError::Api { code, .. } => code.is_some_and(|c| c == 429 || c >= 500),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseMode {
    #[serde(rename = "HTML")]
    Html,
}

#[derive(Clone)]
pub struct TelegramClient {
    http: Http,
    base_url: String,
}

impl fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramClient")
            .field("base_url", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self, TelegramError> {
        Self::with_base_url(API_BASE, token)
    }

    pub fn with_base_url(api_base: &str, token: &str) -> Result<Self, TelegramError> {
        let http = Http::builder()
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(LONG_POLL_SECS + 15))
            .build()?;
        Ok(Self {
            http,
            base_url: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, TelegramError> {
        let url = format!("{}/{}", self.base_url, method);
        let response: ApiResponse<T> = self.http.post(url).json(&body).send().await?.json().await?;

        match (response.ok, response.result) {
            (true, Some(result)) => Ok(result),
            (_, _) => Err(TelegramError::Api {
                code: response.error_code,
                description: response
                    .description
                    .unwrap_or_else(|| format!("{method} returned no result")),
            }),
        }
    }

    /// Switches the bot to long polling and discards updates queued while offline
    pub async fn delete_webhook(&self) -> Result<(), TelegramError> {
        let _: bool = self
            .call("deleteWebhook", json!({ "drop_pending_updates": true }))
            .await?;
        Ok(())
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TelegramError> {
        let updates: Vec<Update> = self
            .call(
                "getUpdates",
                json!({
                    "offset": offset,
                    "timeout": LONG_POLL_SECS,
                    "allowed_updates": ["message"],
                }),
            )
            .await?;
        debug!("Received {} updates", updates.len());
        Ok(updates)
    }

    pub async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<(), TelegramError> {
        let mut body = json!({
            "chat_id": chat.0,
            "text": text,
            "disable_web_page_preview": true,
        });
        if let (Some(mode), Some(fields)) = (parse_mode, body.as_object_mut()) {
            fields.insert("parse_mode".into(), json!(mode));
        }
        let _: Message = self.call("sendMessage", body).await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn notify(&self, destination: ChatId, text: &str) -> Result<(), NotifyError> {
        self.send_message(destination, text, None)
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_deserializes() {
        let raw = r#"{
            "ok": true,
            "result": [{
                "update_id": 10,
                "message": {
                    "message_id": 5,
                    "from": {"id": 42, "is_bot": false, "first_name": "Ann"},
                    "chat": {"id": 4200, "type": "private"},
                    "date": 0,
                    "text": "/status"
                }
            }, {"update_id": 11}]
        }"#;
        let response: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        let updates = response.result.unwrap();
        assert_eq!(updates.len(), 2);
        let message = updates[0].message.as_ref().unwrap();
        assert_eq!(message.from.as_ref().unwrap().id, 42);
        assert_eq!(message.text.as_deref(), Some("/status"));
        assert!(updates[1].message.is_none());
    }

    #[test]
    fn test_transient_classification() {
        let api = |code| TelegramError::Api {
            code,
            description: String::new(),
        };
        assert!(api(Some(429)).is_transient());
        assert!(api(Some(502)).is_transient());
        assert!(!api(Some(401)).is_transient());
        assert!(!api(None).is_transient());
    }

    #[tokio::test]
    async fn test_http_errors_do_not_leak_token() {
        // Nothing listens on the discard port
        let client = TelegramClient::with_base_url("http://127.0.0.1:9", "123456:SECRETTOKEN").unwrap();
        let err = client.get_updates(0).await.unwrap_err();

        assert!(matches!(err, TelegramError::Http(ref e) if e.url().is_none()));
        assert!(err.is_transient());
        assert!(!err.to_string().contains("SECRETTOKEN"));
        assert!(!format!("{err:?}").contains("SECRETTOKEN"));

        let notified = client.notify(ChatId(1), "hi").await.unwrap_err();
        assert!(!notified.to_string().contains("SECRETTOKEN"));
        assert!(!format!("{client:?}").contains("SECRETTOKEN"));
    }

    #[test]
    fn test_parse_mode_serializes() {
        assert_eq!(json!(ParseMode::Html), json!("HTML"));
    }
}
