//! Bot API client over reqwest.
//!
//! Every method is a POST to `{api_base}/bot{token}/{method}`. The token is
//! part of the URL, so request errors are stripped of their URL before they
//! are surfaced or logged.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use edumate_attendance::{AttendanceResult, ChatId, ChatTransport, MessageId, TextFormat};

use crate::config::{DEFAULT_API_BASE, DEFAULT_POLL_TIMEOUT};
use crate::types::api::{DeleteMessage, EditMessageText, GetUpdates, SendMessage};
use crate::types::{ApiResponse, BotError, BotResult, Message, Update, User};

/// Budget for ordinary calls; long polls get their own wait added on top.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bot API client.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    endpoint: String,
}

impl fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramClient").finish_non_exhaustive()
    }
}

impl TelegramClient {
    pub fn new(token: &str) -> BotResult<Self> {
        Self::with_api_base(token, DEFAULT_API_BASE)
    }

    /// Client against a different API server (a local Bot API server or a
    /// test double).
    pub fn with_api_base(token: &str, api_base: &str) -> BotResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT + DEFAULT_POLL_TIMEOUT)
            .build()
            .map_err(BotError::http)?;
        Ok(Self {
            http,
            endpoint: format!("{}/bot{token}", api_base.trim_end_matches('/')),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.endpoint)
    }

    async fn call<P, T>(&self, method: &str, params: &P) -> BotResult<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(method, "bot api call");
        let response = self
            .http
            .post(self.method_url(method))
            .json(params)
            .send()
            .await
            .map_err(BotError::http)?;
        let body: ApiResponse<T> = response.json().await.map_err(BotError::http)?;
        unwrap_response(method, body)
    }

    /// Identity of the bot behind the token.
    pub async fn get_me(&self) -> BotResult<User> {
        self.call("getMe", &serde_json::json!({})).await
    }

    /// Long-poll for new messages starting at `offset`.
    pub async fn get_updates(&self, offset: Option<i64>, wait: Duration) -> BotResult<Vec<Update>> {
        let params = GetUpdates {
            offset,
            timeout: wait.as_secs(),
            allowed_updates: &["message"],
        };
        debug!(?offset, "polling for updates");
        let response = self
            .http
            .post(self.method_url("getUpdates"))
            .timeout(wait + REQUEST_TIMEOUT)
            .json(&params)
            .send()
            .await
            .map_err(BotError::http)?;
        let body: ApiResponse<Vec<Update>> = response.json().await.map_err(BotError::http)?;
        unwrap_response("getUpdates", body)
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        format: TextFormat,
    ) -> BotResult<Message> {
        let params = SendMessage {
            chat_id,
            text,
            parse_mode: parse_mode(format),
        };
        self.call("sendMessage", &params).await
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        format: TextFormat,
    ) -> BotResult<()> {
        let params = EditMessageText {
            chat_id,
            message_id,
            text,
            parse_mode: parse_mode(format),
        };
        // The result is the edited message or `true`; neither is needed.
        self.call::<_, serde_json::Value>("editMessageText", &params)
            .await
            .map(|_| ())
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> BotResult<()> {
        let params = DeleteMessage {
            chat_id,
            message_id,
        };
        self.call::<_, bool>("deleteMessage", &params)
            .await
            .map(|_| ())
    }

    /// Upload a PNG from disk as a photo message.
    pub async fn send_photo(&self, chat_id: i64, path: &Path) -> BotResult<Message> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "screenshot.png".to_string());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("image/png")
            .map_err(BotError::http)?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", part);

        debug!(method = "sendPhoto", "bot api call");
        let response = self
            .http
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .map_err(BotError::http)?;
        let body: ApiResponse<Message> = response.json().await.map_err(BotError::http)?;
        unwrap_response("sendPhoto", body)
    }
}

fn parse_mode(format: TextFormat) -> Option<&'static str> {
    match format {
        TextFormat::Plain => None,
        TextFormat::Markdown => Some("Markdown"),
    }
}

fn unwrap_response<T>(method: &str, body: ApiResponse<T>) -> BotResult<T> {
    if body.ok {
        return body.result.ok_or_else(|| BotError::Api {
            code: 0,
            description: format!("{method} returned no result"),
            retry_after: None,
        });
    }
    Err(BotError::Api {
        code: body.error_code.unwrap_or_default(),
        description: body
            .description
            .unwrap_or_else(|| format!("{method} failed")),
        retry_after: body.parameters.and_then(|p| p.retry_after),
    })
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        format: TextFormat,
    ) -> AttendanceResult<MessageId> {
        let message = self.send_message(chat_id.0, text, format).await?;
        Ok(MessageId(message.message_id))
    }

    async fn edit_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        format: TextFormat,
    ) -> AttendanceResult<()> {
        Ok(self
            .edit_message_text(chat_id.0, message_id.0, text, format)
            .await?)
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> AttendanceResult<()> {
        Ok(TelegramClient::delete_message(self, chat_id.0, message_id.0).await?)
    }

    async fn send_photo(&self, chat_id: ChatId, path: &Path) -> AttendanceResult<MessageId> {
        let message = TelegramClient::send_photo(self, chat_id.0, path).await?;
        Ok(MessageId(message.message_id))
    }
}
