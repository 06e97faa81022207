//! Record store abstractions, in-memory backend, and paged record streams.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

mod sqlite;

pub use mediarelay_core::MediaKind;
pub use sqlite::SqliteRecordStore;

/// Page size used by [`stream_all`] callers that have no better estimate.
pub const DEFAULT_STREAM_PAGE_SIZE: usize = 200;

/// Result type for record store operations.
pub type StoreResult<T> = Result<T, RecordStoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error("value for '{field}' does not fit the store column: {value}")]
    ValueOutOfRange { field: &'static str, value: String },
    #[error("store worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Composite identity of an indexed file: the message it was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub conversation_id: i64,
    pub message_id: i64,
}

impl RecordKey {
    pub fn new(conversation_id: i64, message_id: i64) -> Self {
        Self {
            conversation_id,
            message_id,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.conversation_id, self.message_id)
    }
}

/// Metadata persisted for every media message found while indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedFile {
    pub conversation_id: i64,
    pub message_id: i64,
    /// Opaque platform reference that re-sends the media without re-uploading it.
    pub media_id: String,
    /// Stable content identity; informational only, never used for dedupe.
    pub media_unique_id: String,
    pub media_kind: MediaKind,
    pub file_name: Option<String>,
    pub file_size: u64,
    /// Rich-text (HTML) caption, empty when the message had none.
    pub caption: String,
    /// When the key was first indexed; later upserts keep the original stamp.
    pub indexed_unix_ms: u64,
}

impl IndexedFile {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.conversation_id, self.message_id)
    }
}

/// Whether an upsert created a new record or overwrote an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

/// Async store contract used by the indexing and replay runtimes.
///
/// Implementations enumerate records in ascending [`RecordKey`] order; that
/// order is what [`stream_all`] exposes to replay.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts `record`, or overwrites the record with the same key while
    /// keeping its first `indexed_unix_ms`.
    async fn upsert(&self, record: IndexedFile) -> StoreResult<UpsertOutcome>;
    async fn count(&self) -> StoreResult<u64>;
    async fn get(&self, key: RecordKey) -> StoreResult<Option<IndexedFile>>;
    /// Returns up to `limit` records with keys strictly greater than `after`.
    async fn fetch_page(
        &self,
        after: Option<RecordKey>,
        limit: usize,
    ) -> StoreResult<Vec<IndexedFile>>;
}

enum PageCursor {
    Start,
    After(RecordKey),
    Exhausted,
}

/// Streams every record in store order, fetching `page_size` records at a time.
///
/// The stream holds at most one page in memory and can be recreated at any
/// time to restart the scan from the first key.
pub fn stream_all(
    store: Arc<dyn RecordStore>,
    page_size: usize,
) -> BoxStream<'static, StoreResult<IndexedFile>> {
    let page_size = page_size.max(1);
    stream::try_unfold(PageCursor::Start, move |cursor| {
        let store = Arc::clone(&store);
        async move {
            let after = match cursor {
                PageCursor::Start => None,
                PageCursor::After(key) => Some(key),
                PageCursor::Exhausted => return Ok(None),
            };
            let page = store.fetch_page(after, page_size).await?;
            let next = match page.last() {
                None => return Ok(None),
                Some(last) if page.len() >= page_size => PageCursor::After(last.key()),
                Some(_) => PageCursor::Exhausted,
            };
            let items = stream::iter(page.into_iter().map(Ok::<_, RecordStoreError>));
            Ok::<_, RecordStoreError>(Some((items, next)))
        }
    })
    .try_flatten()
    .boxed()
}

/// In-memory implementation for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<BTreeMap<RecordKey, IndexedFile>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn upsert(&self, mut record: IndexedFile) -> StoreResult<UpsertOutcome> {
        let mut records = self.records.write().await;
        match records.get(&record.key()) {
            Some(existing) => {
                record.indexed_unix_ms = existing.indexed_unix_ms;
                records.insert(record.key(), record);
                Ok(UpsertOutcome::Replaced)
            }
            None => {
                records.insert(record.key(), record);
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn count(&self) -> StoreResult<u64> {
        let records = self.records.read().await;
        Ok(records.len() as u64)
    }

    async fn get(&self, key: RecordKey) -> StoreResult<Option<IndexedFile>> {
        let records = self.records.read().await;
        Ok(records.get(&key).cloned())
    }

    async fn fetch_page(
        &self,
        after: Option<RecordKey>,
        limit: usize,
    ) -> StoreResult<Vec<IndexedFile>> {
        let records = self.records.read().await;
        let lower = match after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        Ok(records
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }
}

#[cfg(test)]
pub(crate) fn sample_record(conversation_id: i64, message_id: i64) -> IndexedFile {
    IndexedFile {
        conversation_id,
        message_id,
        media_id: format!("media-{conversation_id}-{message_id}"),
        media_unique_id: format!("unique-{message_id}"),
        media_kind: MediaKind::Document,
        file_name: Some(format!("file-{message_id}.pdf")),
        file_size: 1_024,
        caption: String::new(),
        indexed_unix_ms: 1,
    }
}
