// Telegram Bot API client
//
// The bot token is part of every request URL, so transport errors are logged
// without their URL.

use std::time::Duration;

use async_trait::async_trait;
use prbridge_core::{ChatTransport, InlineKeyboard, TransportError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::api::{
    AnswerCallbackQueryRequest, ApiResponse, BotUser, GetUpdatesRequest, InlineKeyboardMarkup,
    Message, SendMessageRequest, Update,
};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Telegram client configuration
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub token: String,
    /// Bot API base URL
    pub api_url: String,
    /// Long-poll timeout for getUpdates
    pub poll_timeout: Duration,
    /// Timeout of regular requests
    pub request_timeout: Duration,
}

impl TelegramConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_url: DEFAULT_API_URL.to_string(),
            poll_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Telegram Bot API client
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base: String,
    poll_timeout: Duration,
}

impl TelegramClient {
    pub fn new(config: TelegramConfig) -> Result<Self, TransportError> {
        if config.token.is_empty() {
            return Err(TransportError::Api {
                code: None,
                description: "bot token is empty".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Http(e.without_url().to_string()))?;

        Ok(Self {
            http,
            base: format!(
                "{}/bot{}",
                config.api_url.trim_end_matches('/'),
                config.token
            ),
            poll_timeout: config.poll_timeout,
        })
    }

    /// Long-poll timeout used by [`TelegramClient::get_updates`]
    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    async fn call<B, T>(
        &self,
        method: &str,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<T, TransportError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let mut request = self
            .http
            .post(format!("{}/{}", self.base, method))
            .json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Http(e.without_url().to_string()))?;

        // Errors come back as the same envelope with ok=false
        let status = response.status();
        let envelope: ApiResponse<T> = response.json().await.map_err(|e| {
            TransportError::Decode(format!("{method} ({status}): {}", e.without_url()))
        })?;

        if !envelope.ok {
            return Err(TransportError::Api {
                code: envelope.error_code,
                description: envelope
                    .description
                    .unwrap_or_else(|| format!("{method} failed with status {status}")),
            });
        }

        envelope
            .result
            .ok_or_else(|| TransportError::Decode(format!("{method}: missing result")))
    }

    /// Bot identity, used as a startup check
    #[instrument(skip(self))]
    pub async fn get_me(&self) -> Result<BotUser, TransportError> {
        self.call("getMe", &serde_json::json!({}), None).await
    }

    /// Send an HTML formatted message
    #[instrument(skip(self, text, keyboard))]
    pub async fn send_html(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<Message, TransportError> {
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: "HTML",
            reply_markup: keyboard.map(InlineKeyboardMarkup::from),
        };
        let message: Message = self.call("sendMessage", &request, None).await?;
        debug!(chat_id, message_id = message.message_id, "Message sent");
        Ok(message)
    }

    /// Long-poll for updates after `offset`
    #[instrument(skip(self))]
    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>, TransportError> {
        let request = GetUpdatesRequest {
            offset,
            timeout: self.poll_timeout.as_secs(),
            allowed_updates: &["message", "callback_query"],
        };
        // The HTTP timeout must outlast the server-side long poll
        let timeout = self.poll_timeout + Duration::from_secs(10);
        self.call("getUpdates", &request, Some(timeout)).await
    }

    /// Acknowledge a button press, optionally with a toast text
    #[instrument(skip(self))]
    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError> {
        let request = AnswerCallbackQueryRequest {
            callback_query_id,
            text,
        };
        let _: bool = self.call("answerCallbackQuery", &request, None).await?;
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), TransportError> {
        self.send_html(chat_id, text, keyboard).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_empty_token() {
        assert!(TelegramClient::new(TelegramConfig::new("")).is_err());
    }

    #[test]
    fn test_base_url() {
        let mut config = TelegramConfig::new("123:abc");
        config.api_url = "http://localhost:8081/".to_string();
        let client = TelegramClient::new(config).unwrap();
        assert_eq!(client.base, "http://localhost:8081/bot123:abc");
    }
}
