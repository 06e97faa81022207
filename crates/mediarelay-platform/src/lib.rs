//! Messaging-platform contract and the HTTP gateway client that implements it.
mod gateway;
mod retry;
mod types;

pub use gateway::{GatewayClient, GatewayConfig};
pub use mediarelay_core::MediaKind;
pub use types::{
    ConversationMetadata, ConversationRef, ConversationRefError, MediaAttachment, PlatformClient,
    PlatformError, PlatformIdentity, PlatformMessage, SentMessage,
};
