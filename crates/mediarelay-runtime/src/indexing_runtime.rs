use mediarelay_core::current_unix_timestamp_ms;
use mediarelay_platform::{ConversationRef, PlatformClient, PlatformError, PlatformMessage};
use mediarelay_store::{IndexedFile, RecordStore, RecordStoreError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::cursor_walker::{CursorWalker, WalkerConfig, WalkerError};
use crate::progress::{
    render_indexing_progress, render_indexing_started, IndexingProgress, ProgressSink,
};

pub const DEFAULT_WINDOW_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingConfig {
    pub walker: WalkerConfig,
    /// Pause after every fetched window, whether or not it held media.
    pub window_delay: Duration,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            walker: WalkerConfig::default(),
            window_delay: DEFAULT_WINDOW_DELAY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexingReport {
    pub conversation: String,
    pub files_saved: u64,
    pub messages_processed: u64,
    pub windows_walked: u64,
    pub windows_abandoned: u64,
    #[serde(rename = "duration_ms", serialize_with = "serialize_duration_ms")]
    pub duration: Duration,
}

pub(crate) fn serialize_duration_ms<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

#[derive(Debug, Error)]
pub enum IndexingError {
    #[error("could not access chat {conversation}: {source}")]
    TargetUnreachable {
        conversation: String,
        #[source]
        source: PlatformError,
    },
    #[error(transparent)]
    Walker(#[from] WalkerError),
    #[error("failed to persist indexed file: {0}")]
    Store(#[from] RecordStoreError),
}

/// Walks one conversation and upserts every document or video it finds.
pub struct IndexingRuntime {
    client: Arc<dyn PlatformClient>,
    store: Arc<dyn RecordStore>,
    config: IndexingConfig,
}

impl IndexingRuntime {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        store: Arc<dyn RecordStore>,
        config: IndexingConfig,
    ) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    pub async fn run(
        &self,
        conversation: &ConversationRef,
        sink: &dyn ProgressSink,
    ) -> Result<IndexingReport, IndexingError> {
        let metadata = self
            .client
            .fetch_conversation_metadata(conversation)
            .await
            .map_err(|source| IndexingError::TargetUnreachable {
                conversation: conversation.to_string(),
                source,
            })?;

        sink.publish(&render_indexing_started(conversation)).await;
        info!(
            conversation = %conversation,
            resolved_id = metadata.id,
            "indexing started"
        );

        let started = Instant::now();
        let mut walker = CursorWalker::new(
            Arc::clone(&self.client),
            conversation.clone(),
            self.config.walker.clone(),
        );
        let mut files_saved = 0_u64;
        let mut messages_processed = 0_u64;

        while let Some(batch) = walker.next_batch().await? {
            for message in &batch.messages {
                if message.empty {
                    continue;
                }
                messages_processed = messages_processed.saturating_add(1);
                let Some(record) = indexed_file_from_message(message, metadata.id) else {
                    continue;
                };
                self.store.upsert(record).await?;
                files_saved = files_saved.saturating_add(1);
            }

            debug!(
                conversation = %conversation,
                window_high = batch.window.high,
                window_low = batch.window.low,
                files_saved,
                "indexed window"
            );
            let progress = IndexingProgress {
                files_saved,
                messages_processed,
                windows_walked: walker.stats().windows_walked,
                elapsed: started.elapsed(),
            };
            sink.publish(&render_indexing_progress(conversation, &progress))
                .await;
            sleep(self.config.window_delay).await;
        }

        let stats = walker.stats();
        let report = IndexingReport {
            conversation: conversation.to_string(),
            files_saved,
            messages_processed,
            windows_walked: stats.windows_walked,
            windows_abandoned: stats.windows_abandoned,
            duration: started.elapsed(),
        };
        info!(
            conversation = %conversation,
            files_saved = report.files_saved,
            messages_processed = report.messages_processed,
            windows_abandoned = report.windows_abandoned,
            "indexing finished"
        );
        Ok(report)
    }
}

/// Builds the persisted record for a media message. Messages without a
/// document or video yield `None`.
pub fn indexed_file_from_message(
    message: &PlatformMessage,
    resolved_conversation_id: i64,
) -> Option<IndexedFile> {
    if message.empty {
        return None;
    }
    let media = message.media.as_ref()?;
    let conversation_id = if message.conversation_id != 0 {
        message.conversation_id
    } else {
        resolved_conversation_id
    };
    Some(IndexedFile {
        conversation_id,
        message_id: message.message_id,
        media_id: media.media_id.clone(),
        media_unique_id: media.media_unique_id.clone(),
        media_kind: media.kind,
        file_name: media.file_name.clone(),
        file_size: media.file_size,
        caption: message.caption.clone(),
        indexed_unix_ms: current_unix_timestamp_ms(),
    })
}
