//! Telegram Bot API channel

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use super::RequesterChannel;
use crate::config::TelegramConfig;
use crate::error::{Error, Result};
use crate::types::{ChatRef, MessageRef};

/// Timeout for ordinary (non-polling, non-upload) API calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Telegram rejects messages longer than this
const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Incoming update from `getUpdates`
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    /// Monotonic update id; the next poll starts after the highest one seen
    pub update_id: i64,
    /// New message
    #[serde(default)]
    pub message: Option<Message>,
    /// Inline keyboard button press
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

/// A chat message
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    /// Message id within the chat
    pub message_id: i64,
    /// Chat the message belongs to
    pub chat: Chat,
    /// Sender
    #[serde(default)]
    pub from: Option<User>,
    /// Text body
    #[serde(default)]
    pub text: Option<String>,
    /// Attached document
    #[serde(default)]
    pub document: Option<Document>,
}

impl Message {
    /// Reference to this message
    pub fn reference(&self) -> MessageRef {
        MessageRef {
            chat: ChatRef(self.chat.id),
            message_id: self.message_id,
        }
    }
}

/// A chat
#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    /// Chat id
    pub id: i64,
}

/// A Telegram user
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    /// User id
    pub id: i64,
}

/// Uploaded file attached to a message
#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    /// Id used to fetch the file
    pub file_id: String,
    /// Original file name
    #[serde(default)]
    pub file_name: Option<String>,
    /// Size in bytes
    #[serde(default)]
    pub file_size: Option<u64>,
}

/// Inline keyboard button press
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    /// Query id, answered with `answerCallbackQuery`
    pub id: String,
    /// Who pressed the button
    pub from: User,
    /// Message carrying the keyboard
    #[serde(default)]
    pub message: Option<Message>,
    /// Button payload
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Deserialize)]
struct TelegramFile {
    #[serde(default)]
    file_path: Option<String>,
}

/// Telegram Bot API client
pub struct TelegramChannel {
    http: reqwest::Client,
    api_url: String,
    file_url: String,
    owner: ChatRef,
    poll_timeout: Duration,
    max_upload_bytes: u64,
}

impl TelegramChannel {
    /// Create a channel from configuration
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let base = config.api_base.trim_end_matches('/');
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            api_url: format!("{}/bot{}", base, config.token),
            file_url: format!("{}/file/bot{}", base, config.token),
            owner: ChatRef(config.owner_id),
            poll_timeout: config.poll_timeout,
            max_upload_bytes: config.max_upload_bytes,
        })
    }

    /// Owner conversation
    pub fn owner(&self) -> ChatRef {
        self.owner
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T> {
        self.call_with_timeout(method, body, REQUEST_TIMEOUT).await
    }

    async fn call_with_timeout<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<T> {
        let response = self
            .http
            .post(format!("{}/{}", self.api_url, method))
            .json(body)
            .timeout(timeout)
            .send()
            .await?;
        Self::parse(method, response).await
    }

    // The Bot API reports failures as `{"ok": false, "description": ...}` with a 4xx/5xx
    async fn parse<T: DeserializeOwned>(method: &str, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let text = response.text().await?;
        let parsed: ApiResponse<T> = serde_json::from_str(&text).map_err(|e| Error::Channel {
            method: method.to_string(),
            description: format!("HTTP {status}: unreadable response: {e}"),
        })?;

        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            (_, _) => Err(Error::Channel {
                method: method.to_string(),
                description: parsed
                    .description
                    .unwrap_or_else(|| format!("HTTP {status}")),
            }),
        }
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>> {
        let body = json!({
            "offset": offset,
            "timeout": self.poll_timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        self.call_with_timeout("getUpdates", &body, self.poll_timeout + REQUEST_TIMEOUT)
            .await
    }

    /// Plain text message
    pub async fn send_text(&self, chat: ChatRef, text: &str) -> Result<MessageRef> {
        let message: Message = self
            .call(
                "sendMessage",
                &json!({ "chat_id": chat.0, "text": truncate(text) }),
            )
            .await?;
        Ok(message.reference())
    }

    /// Message with one inline keyboard button per `(label, data)` pair
    pub async fn send_choice(
        &self,
        chat: ChatRef,
        text: &str,
        buttons: &[(String, String)],
    ) -> Result<MessageRef> {
        let keyboard: Vec<Value> = buttons
            .iter()
            .map(|(label, data)| json!([{ "text": label, "callback_data": data }]))
            .collect();
        let message: Message = self
            .call(
                "sendMessage",
                &json!({
                    "chat_id": chat.0,
                    "text": truncate(text),
                    "reply_markup": { "inline_keyboard": keyboard },
                }),
            )
            .await?;
        Ok(message.reference())
    }

    /// Acknowledge a button press, optionally with a toast
    pub async fn answer_callback_query(&self, query_id: &str, text: Option<&str>) -> Result<()> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                &json!({ "callback_query_id": query_id, "text": text }),
            )
            .await?;
        Ok(())
    }

    /// Fetch an uploaded file into `dest`
    pub async fn download_file(&self, file_id: &str, dest: &Path) -> Result<()> {
        let file: TelegramFile = self.call("getFile", &json!({ "file_id": file_id })).await?;
        let file_path = file.file_path.ok_or_else(|| Error::Channel {
            method: "getFile".to_string(),
            description: "file is no longer available".to_string(),
        })?;

        let response = self
            .http
            .get(format!("{}/{}", self.file_url, file_path))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut out = tokio::fs::File::create(dest).await?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            out.write_all(&chunk?).await?;
        }
        out.flush().await?;
        Ok(())
    }
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

#[async_trait]
impl RequesterChannel for TelegramChannel {
    async fn send_status(&self, chat: ChatRef, text: &str) -> Result<MessageRef> {
        self.send_text(chat, text).await
    }

    async fn edit_status(&self, message: MessageRef, text: &str) -> Result<()> {
        let result: Result<Value> = self
            .call(
                "editMessageText",
                &json!({
                    "chat_id": message.chat.0,
                    "message_id": message.message_id,
                    "text": truncate(text),
                }),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(Error::Channel { description, .. })
                if description.contains("message is not modified") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn send_artifact(&self, chat: ChatRef, path: &Path) -> Result<MessageRef> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let form = Form::new()
            .text("chat_id", chat.0.to_string())
            .part(
                "document",
                Part::stream_with_length(body, size).file_name(file_name),
            );

        tracing::debug!(chat = chat.0, size, path = %path.display(), "Uploading document");
        let response = self
            .http
            .post(format!("{}/sendDocument", self.api_url))
            .multipart(form)
            .send()
            .await?;
        let message: Message = Self::parse("sendDocument", response).await?;
        Ok(message.reference())
    }

    async fn notify_owner(&self, text: &str) -> Result<()> {
        self.send_text(self.owner, text).await?;
        Ok(())
    }

    fn max_artifact_bytes(&self) -> Option<u64> {
        Some(self.max_upload_bytes)
    }
}
