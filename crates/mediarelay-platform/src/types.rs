use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use mediarelay_core::MediaKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A conversation as the caller named it: a numeric id or a symbolic handle.
///
/// The runtime never interprets the variant; it forwards whatever form the
/// platform accepts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConversationRef {
    Id(i64),
    Handle(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Enumerates supported `ConversationRefError` values.
pub enum ConversationRefError {
    #[error("conversation reference must not be empty")]
    Empty,
    #[error("conversation id '{0}' is out of range")]
    OutOfRange(String),
    #[error("conversation handle '{0}' must not contain whitespace")]
    InvalidHandle(String),
}

impl ConversationRef {
    /// Parses `-100123`-style numeric ids and `@handle`-style names.
    pub fn parse(raw: &str) -> Result<Self, ConversationRefError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConversationRefError::Empty);
        }

        let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
        if !digits.is_empty() && digits.bytes().all(|byte| byte.is_ascii_digit()) {
            return trimmed
                .parse::<i64>()
                .map(Self::Id)
                .map_err(|_| ConversationRefError::OutOfRange(trimmed.to_string()));
        }

        if trimmed.chars().any(char::is_whitespace) {
            return Err(ConversationRefError::InvalidHandle(trimmed.to_string()));
        }
        Ok(Self::Handle(trimmed.to_string()))
    }

    pub fn as_id(&self) -> Option<i64> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Handle(_) => None,
        }
    }

    /// Returns the JSON value used for `chat_id` request fields.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Id(id) => Value::from(*id),
            Self::Handle(handle) => Value::String(handle.clone()),
        }
    }
}

impl FromStr for ConversationRef {
    type Err = ConversationRefError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl fmt::Display for ConversationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Handle(handle) => f.write_str(handle),
        }
    }
}

impl From<i64> for ConversationRef {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

/// A document or video attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub kind: MediaKind,
    pub media_id: String,
    pub media_unique_id: String,
    pub file_name: Option<String>,
    pub file_size: u64,
}

/// One message slot as returned by the platform.
///
/// `empty` marks slots whose message was deleted; such slots carry no media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformMessage {
    pub conversation_id: i64,
    pub message_id: i64,
    pub empty: bool,
    /// Caption rendered as HTML; empty when absent.
    pub caption: String,
    pub media: Option<MediaAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationMetadata {
    pub id: i64,
    pub title: Option<String>,
    pub username: Option<String>,
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub conversation_id: i64,
    pub message_id: i64,
}

/// The account the client is logged in as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformIdentity {
    pub id: i64,
    pub display_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Error)]
/// Enumerates supported `PlatformError` values.
pub enum PlatformError {
    #[error("missing bot token")]
    MissingToken,
    #[error("rate limited by platform; retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("platform api error {code}: {description}")]
    Api { code: u16, description: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl PlatformError {
    /// Returns the wait requested by a rate-limit signal, if this is one.
    pub fn rate_limit_wait(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

#[async_trait]
/// Trait contract for the messaging platform used by indexing and replay.
pub trait PlatformClient: Send + Sync {
    async fn get_me(&self) -> Result<PlatformIdentity, PlatformError>;

    async fn fetch_conversation_metadata(
        &self,
        conversation: &ConversationRef,
    ) -> Result<ConversationMetadata, PlatformError>;

    /// Returns the most recent message, or `None` for an empty conversation.
    async fn fetch_latest_message(
        &self,
        conversation: &ConversationRef,
    ) -> Result<Option<PlatformMessage>, PlatformError>;

    /// Fetches the given ids in one request. Ids without a message may be
    /// omitted or returned as `empty` slots.
    async fn fetch_messages_by_ids(
        &self,
        conversation: &ConversationRef,
        message_ids: &[i64],
    ) -> Result<Vec<PlatformMessage>, PlatformError>;

    /// Re-sends previously uploaded media by reference.
    async fn send_document(
        &self,
        conversation: &ConversationRef,
        media_id: &str,
        caption: &str,
    ) -> Result<SentMessage, PlatformError>;

    async fn send_text(
        &self,
        conversation: &ConversationRef,
        text: &str,
    ) -> Result<SentMessage, PlatformError>;

    async fn edit_text(
        &self,
        conversation: &ConversationRef,
        message_id: i64,
        text: &str,
    ) -> Result<(), PlatformError>;
}
