//! Telegram Bot API notifier.

use super::Notifier;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Configuration for the Telegram notifier.
#[derive(Clone)]
pub struct TelegramConfig {
    /// Bot API base URL.
    pub api_base: String,

    /// Bot token.
    pub token: String,

    /// Target chat (numeric id or `@channel`).
    pub chat_id: String,

    /// Forum topic inside the chat, if any.
    pub message_thread_id: Option<i64>,

    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            token: String::new(),
            chat_id: String::new(),
            message_thread_id: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

// Hand-written so the bot token never reaches a log line.
impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("api_base", &self.api_base)
            .field("token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("message_thread_id", &self.message_thread_id)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_thread_id: Option<i64>,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Sends Markdown messages through a Telegram bot.
pub struct TelegramNotifier {
    client: reqwest::Client,
    config: TelegramConfig,
    endpoint: String,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("building Telegram client: {e}")))?;

        let endpoint = format!(
            "{}/bot{}/sendMessage",
            config.api_base.trim_end_matches('/'),
            config.token
        );

        Ok(Self {
            client,
            config,
            endpoint,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, message: &str) -> Result<()> {
        let body = SendMessage {
            chat_id: &self.config.chat_id,
            text: message,
            parse_mode: "Markdown",
            message_thread_id: self.config.message_thread_id,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            // The URL embeds the bot token.
            .map_err(|e| Error::NotifierSend(e.without_url().to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::NotifierSend(e.without_url().to_string()))?;

        match serde_json::from_str::<ApiResponse>(&text) {
            Ok(api) if status.is_success() && api.ok => Ok(()),
            Ok(api) => Err(Error::NotifierSend(format!(
                "{status}: {}",
                api.description.unwrap_or_else(|| "no description".to_string())
            ))),
            Err(_) => Err(Error::NotifierSend(format!("{status}: {text}"))),
        }
    }
}
