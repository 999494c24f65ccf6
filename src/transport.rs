//! Outbound message transports.
//!
//! - [`TelegramTransport`] calls the Bot API `sendMessage` method with
//!   HTML parse mode and link previews disabled.
//! - [`ConsoleTransport`] prints to stdout, for local runs and the
//!   `console` command.
//!
//! Neither retries. Failures are reported as [`TransportError`] and the
//! dispatcher decides what to do with them.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use newsbell_core::models::SubscriberId;
use newsbell_core::traits::{Transport, TransportError};

use crate::config::TelegramConfig;

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: SubscriberId,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
}

pub struct TelegramTransport {
    client: reqwest::Client,
    url: String,
}

impl TelegramTransport {
    pub fn new(config: &TelegramConfig, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: format!(
                "{}/bot{}/sendMessage",
                config.api_base.trim_end_matches('/'),
                token
            ),
        })
    }

    /// Build from `TELEGRAM_BOT_TOKEN`.
    pub fn from_env(config: &TelegramConfig) -> Result<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| anyhow::anyhow!("TELEGRAM_BOT_TOKEN not set"))?;
        Self::new(config, &token)
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_message(
        &self,
        subscriber: SubscriberId,
        text: &str,
    ) -> Result<(), TransportError> {
        let body = SendMessage {
            chat_id: subscriber,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let text = response.text().await.map_err(request_error)?;
        let parsed: Option<ApiResponse> = serde_json::from_str(&text).ok();

        if status.is_success() && parsed.as_ref().map(|r| r.ok).unwrap_or(true) {
            return Ok(());
        }
        Err(api_error(status.as_u16(), parsed, &text))
    }
}

fn request_error(err: reqwest::Error) -> TransportError {
    if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
        TransportError::network(err.to_string())
    } else {
        TransportError::other(err.to_string())
    }
}

fn api_error(http_status: u16, parsed: Option<ApiResponse>, raw: &str) -> TransportError {
    match parsed {
        Some(resp) => {
            let code = resp.error_code.unwrap_or(http_status);
            let description = resp
                .description
                .unwrap_or_else(|| format!("HTTP {}", http_status));
            TransportError::status(code, description)
        }
        None => TransportError::status(http_status, raw.trim().to_string()),
    }
}

/// Writes messages to stdout, one block per message.
#[derive(Debug, Default)]
pub struct ConsoleTransport;

#[async_trait]
impl Transport for ConsoleTransport {
    async fn send_message(
        &self,
        subscriber: SubscriberId,
        text: &str,
    ) -> Result<(), TransportError> {
        println!("── to {} ──", subscriber);
        println!("{}", text);
        println!();
        Ok(())
    }
}
