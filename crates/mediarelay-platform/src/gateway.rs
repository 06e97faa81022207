//! HTTP client for Bot-API-style gateways.
//!
//! Every call is `POST {api_base}/bot{token}/{method}` with a JSON body and
//! answers with the `{ok, result, error_code, description, parameters}`
//! envelope. Transport failures and transient statuses are retried here with
//! exponential backoff; rate limits are returned to the caller as
//! [`PlatformError::RateLimited`].

use std::time::Duration;

use async_trait::async_trait;
use mediarelay_core::{escape_html, MediaKind};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::debug;

use crate::retry::{
    is_retryable_http_error, next_backoff_ms, parse_retry_after_ms, should_retry_status,
    truncate_for_error, DEFAULT_RATE_LIMIT_WAIT_MS,
};
use crate::{
    ConversationMetadata, ConversationRef, MediaAttachment, PlatformClient, PlatformError,
    PlatformIdentity, PlatformMessage, SentMessage,
};

const RATE_LIMIT_CODE: u16 = 429;
const NOT_MODIFIED_MARKER: &str = "message is not modified";

#[derive(Debug, Clone)]
/// Connection settings for [`GatewayClient`].
pub struct GatewayConfig {
    pub api_base: String,
    pub bot_token: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            bot_token: String::new(),
            request_timeout_ms: 30_000,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    config: GatewayConfig,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<u16>,
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: i64,
    first_name: String,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChat {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireFile {
    file_id: String,
    file_unique_id: String,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    file_size: u64,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    message_id: i64,
    #[serde(default)]
    chat: Option<WireChat>,
    #[serde(default)]
    empty: bool,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    caption_html: Option<String>,
    #[serde(default)]
    document: Option<WireFile>,
    #[serde(default)]
    video: Option<WireFile>,
}

impl WireMessage {
    /// Payloads without `chat` fall back to the requested numeric id, or to
    /// `0` for handles; callers resolve `0` against conversation metadata.
    fn into_message(self, fallback_conversation: Option<i64>) -> PlatformMessage {
        let conversation_id = self
            .chat
            .as_ref()
            .map(|chat| chat.id)
            .or(fallback_conversation)
            .unwrap_or(0);

        let caption = match (self.caption_html, self.caption) {
            (Some(html), _) => html,
            (None, Some(plain)) => escape_html(&plain),
            (None, None) => String::new(),
        };

        let media = match (self.document, self.video) {
            (Some(file), _) => Some(file.into_attachment(MediaKind::Document)),
            (None, Some(file)) => Some(file.into_attachment(MediaKind::Video)),
            (None, None) => None,
        };

        PlatformMessage {
            conversation_id,
            message_id: self.message_id,
            empty: self.empty,
            caption,
            media: if self.empty { None } else { media },
        }
    }
}

impl WireFile {
    fn into_attachment(self, kind: MediaKind) -> MediaAttachment {
        MediaAttachment {
            kind,
            media_id: self.file_id,
            media_unique_id: self.file_unique_id,
            file_name: self.file_name,
            file_size: self.file_size,
        }
    }
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, PlatformError> {
        if config.bot_token.trim().is_empty() {
            return Err(PlatformError::MissingToken);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("mediarelay")
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;

        Ok(Self { client, config })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token.trim(),
            method
        )
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, payload: &Value) -> Result<T, PlatformError> {
        let url = self.method_url(method);
        let mut attempt = 0_usize;
        loop {
            let response = self
                .client
                .post(&url)
                .header("x-mediarelay-retry-attempt", attempt.to_string())
                .json(payload)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retry_after_ms = parse_retry_after_ms(response.headers());
                    let body = response.text().await?;

                    if should_retry_status(status) && attempt < self.config.max_retries {
                        let delay_ms = next_backoff_ms(attempt);
                        debug!(method, status, attempt, delay_ms, "retrying gateway call");
                        sleep(Duration::from_millis(delay_ms)).await;
                        attempt = attempt.saturating_add(1);
                        continue;
                    }

                    return decode_envelope(method, status, &body, retry_after_ms);
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_http_error(&error) {
                        let delay_ms = next_backoff_ms(attempt);
                        debug!(method, attempt, delay_ms, error = %error, "retrying gateway transport error");
                        sleep(Duration::from_millis(delay_ms)).await;
                        attempt = attempt.saturating_add(1);
                        continue;
                    }
                    return Err(PlatformError::Http(error));
                }
            }
        }
    }
}

fn decode_envelope<T: DeserializeOwned>(
    method: &str,
    status: u16,
    body: &str,
    retry_after_header_ms: Option<u64>,
) -> Result<T, PlatformError> {
    let envelope = match serde_json::from_str::<ApiEnvelope<T>>(body) {
        Ok(envelope) => envelope,
        Err(error) => {
            if status == RATE_LIMIT_CODE {
                return Err(rate_limited(None, retry_after_header_ms));
            }
            if !(200..300).contains(&status) {
                return Err(PlatformError::Api {
                    code: status,
                    description: truncate_for_error(body, 320),
                });
            }
            return Err(PlatformError::Serde(error));
        }
    };

    if !envelope.ok {
        let code = envelope.error_code.unwrap_or(status);
        if code == RATE_LIMIT_CODE || status == RATE_LIMIT_CODE {
            let retry_after_secs = envelope
                .parameters
                .as_ref()
                .and_then(|parameters| parameters.retry_after);
            return Err(rate_limited(retry_after_secs, retry_after_header_ms));
        }
        return Err(PlatformError::Api {
            code,
            description: envelope
                .description
                .unwrap_or_else(|| "unknown error".to_string()),
        });
    }

    envelope
        .result
        .ok_or_else(|| PlatformError::InvalidResponse(format!("{method} response missing result")))
}

fn rate_limited(retry_after_secs: Option<u64>, retry_after_header_ms: Option<u64>) -> PlatformError {
    let wait_ms = retry_after_secs
        .map(|seconds| seconds.saturating_mul(1_000))
        .or(retry_after_header_ms)
        .unwrap_or(DEFAULT_RATE_LIMIT_WAIT_MS);
    PlatformError::RateLimited {
        retry_after: Duration::from_millis(wait_ms),
    }
}

#[async_trait]
impl PlatformClient for GatewayClient {
    async fn get_me(&self) -> Result<PlatformIdentity, PlatformError> {
        let user: WireUser = self.call("getMe", &json!({})).await?;
        let display_name = match user.last_name {
            Some(last_name) if !last_name.trim().is_empty() => {
                format!("{} {}", user.first_name, last_name.trim())
            }
            _ => user.first_name,
        };
        Ok(PlatformIdentity {
            id: user.id,
            display_name,
            username: user.username,
        })
    }

    async fn fetch_conversation_metadata(
        &self,
        conversation: &ConversationRef,
    ) -> Result<ConversationMetadata, PlatformError> {
        let chat: WireChat = self
            .call("getChat", &json!({ "chat_id": conversation.to_json() }))
            .await?;
        Ok(ConversationMetadata {
            id: chat.id,
            title: chat.title,
            username: chat.username,
            kind: chat.kind,
        })
    }

    async fn fetch_latest_message(
        &self,
        conversation: &ConversationRef,
    ) -> Result<Option<PlatformMessage>, PlatformError> {
        let messages: Vec<WireMessage> = self
            .call(
                "getChatHistory",
                &json!({ "chat_id": conversation.to_json(), "limit": 1 }),
            )
            .await?;
        Ok(messages
            .into_iter()
            .next()
            .map(|message| message.into_message(conversation.as_id())))
    }

    async fn fetch_messages_by_ids(
        &self,
        conversation: &ConversationRef,
        message_ids: &[i64],
    ) -> Result<Vec<PlatformMessage>, PlatformError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let messages: Vec<Option<WireMessage>> = self
            .call(
                "getMessages",
                &json!({
                    "chat_id": conversation.to_json(),
                    "message_ids": message_ids,
                }),
            )
            .await?;
        Ok(messages
            .into_iter()
            .flatten()
            .map(|message| message.into_message(conversation.as_id()))
            .collect())
    }

    async fn send_document(
        &self,
        conversation: &ConversationRef,
        media_id: &str,
        caption: &str,
    ) -> Result<SentMessage, PlatformError> {
        let mut payload = json!({
            "chat_id": conversation.to_json(),
            "document": media_id,
        });
        if !caption.is_empty() {
            payload["caption"] = Value::String(caption.to_string());
            payload["parse_mode"] = Value::String("HTML".to_string());
        }
        let message: WireMessage = self.call("sendDocument", &payload).await?;
        let message = message.into_message(conversation.as_id());
        Ok(SentMessage {
            conversation_id: message.conversation_id,
            message_id: message.message_id,
        })
    }

    async fn send_text(
        &self,
        conversation: &ConversationRef,
        text: &str,
    ) -> Result<SentMessage, PlatformError> {
        let message: WireMessage = self
            .call(
                "sendMessage",
                &json!({
                    "chat_id": conversation.to_json(),
                    "text": text,
                    "parse_mode": "HTML",
                }),
            )
            .await?;
        let message = message.into_message(conversation.as_id());
        Ok(SentMessage {
            conversation_id: message.conversation_id,
            message_id: message.message_id,
        })
    }

    async fn edit_text(
        &self,
        conversation: &ConversationRef,
        message_id: i64,
        text: &str,
    ) -> Result<(), PlatformError> {
        let result: Result<Value, PlatformError> = self
            .call(
                "editMessageText",
                &json!({
                    "chat_id": conversation.to_json(),
                    "message_id": message_id,
                    "text": text,
                    "parse_mode": "HTML",
                }),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(PlatformError::Api { description, .. })
                if description.to_ascii_lowercase().contains(NOT_MODIFIED_MARKER) =>
            {
                Ok(())
            }
            Err(error) => Err(error),
        }
    }
}
