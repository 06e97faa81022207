//! SQLite-backed `RecordStore` implementation with durable persistence.

use crate::{
    IndexedFile, MediaKind, RecordKey, RecordStore, RecordStoreError, StoreResult, UpsertOutcome,
};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SELECT_COLUMNS: &str = "conversation_id, message_id, media_id, media_unique_id, \
     media_kind, file_name, file_size, caption, indexed_unix_ms";

/// Persistent SQLite store keyed by `(conversation_id, message_id)`.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    db_path: PathBuf,
}

impl SqliteRecordStore {
    /// Creates a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        let connection = open_connection(&store.db_path)?;
        initialize_schema(&connection)?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn with_connection<T, F>(&self, operation: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = open_connection(&db_path)?;
            operation(&mut connection)
        })
        .await?
    }
}

fn open_connection(db_path: &Path) -> StoreResult<Connection> {
    let connection = Connection::open(db_path)?;
    connection.busy_timeout(Duration::from_secs(5))?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        "#,
    )?;
    Ok(connection)
}

fn initialize_schema(connection: &Connection) -> StoreResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS indexed_files (
            conversation_id INTEGER NOT NULL,
            message_id INTEGER NOT NULL,
            media_id TEXT NOT NULL,
            media_unique_id TEXT NOT NULL,
            media_kind TEXT NOT NULL,
            file_name TEXT NULL,
            file_size INTEGER NOT NULL,
            caption TEXT NOT NULL,
            indexed_unix_ms INTEGER NOT NULL,
            PRIMARY KEY (conversation_id, message_id)
        ) WITHOUT ROWID;
        "#,
    )?;
    Ok(())
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn upsert(&self, record: IndexedFile) -> StoreResult<UpsertOutcome> {
        self.with_connection(move |connection| {
            let file_size = u64_to_db("file_size", record.file_size)?;
            let indexed_unix_ms = u64_to_db("indexed_unix_ms", record.indexed_unix_ms)?;
            let transaction =
                connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let existing = transaction
                .query_row(
                    "SELECT 1 FROM indexed_files WHERE conversation_id = ?1 AND message_id = ?2",
                    params![record.conversation_id, record.message_id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;

            transaction.execute(
                r#"
                INSERT INTO indexed_files (
                    conversation_id, message_id, media_id, media_unique_id, media_kind,
                    file_name, file_size, caption, indexed_unix_ms
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT (conversation_id, message_id) DO UPDATE SET
                    media_id = excluded.media_id,
                    media_unique_id = excluded.media_unique_id,
                    media_kind = excluded.media_kind,
                    file_name = excluded.file_name,
                    file_size = excluded.file_size,
                    caption = excluded.caption
                "#,
                params![
                    record.conversation_id,
                    record.message_id,
                    record.media_id,
                    record.media_unique_id,
                    record.media_kind.as_str(),
                    record.file_name,
                    file_size,
                    record.caption,
                    indexed_unix_ms,
                ],
            )?;
            transaction.commit()?;

            Ok(if existing.is_some() {
                UpsertOutcome::Replaced
            } else {
                UpsertOutcome::Inserted
            })
        })
        .await
    }

    async fn count(&self) -> StoreResult<u64> {
        self.with_connection(|connection| {
            let count: i64 =
                connection.query_row("SELECT COUNT(*) FROM indexed_files", [], |row| row.get(0))?;
            u64_from_db("count", count)
        })
        .await
    }

    async fn get(&self, key: RecordKey) -> StoreResult<Option<IndexedFile>> {
        self.with_connection(move |connection| {
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM indexed_files \
                 WHERE conversation_id = ?1 AND message_id = ?2"
            );
            let row = connection
                .query_row(
                    &sql,
                    params![key.conversation_id, key.message_id],
                    read_raw_row,
                )
                .optional()?;
            row.map(RawIndexedFile::into_record).transpose()
        })
        .await
    }

    async fn fetch_page(
        &self,
        after: Option<RecordKey>,
        limit: usize,
    ) -> StoreResult<Vec<IndexedFile>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_connection(move |connection| {
            let raw_rows = match after {
                Some(key) => {
                    let sql = format!(
                        "SELECT {SELECT_COLUMNS} FROM indexed_files \
                         WHERE (conversation_id, message_id) > (?1, ?2) \
                         ORDER BY conversation_id, message_id LIMIT ?3"
                    );
                    let mut statement = connection.prepare(&sql)?;
                    let rows = statement.query_map(
                        params![key.conversation_id, key.message_id, limit],
                        read_raw_row,
                    )?;
                    rows.collect::<Result<Vec<_>, _>>()?
                }
                None => {
                    let sql = format!(
                        "SELECT {SELECT_COLUMNS} FROM indexed_files \
                         ORDER BY conversation_id, message_id LIMIT ?1"
                    );
                    let mut statement = connection.prepare(&sql)?;
                    let rows = statement.query_map(params![limit], read_raw_row)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                }
            };
            raw_rows
                .into_iter()
                .map(RawIndexedFile::into_record)
                .collect()
        })
        .await
    }
}

struct RawIndexedFile {
    conversation_id: i64,
    message_id: i64,
    media_id: String,
    media_unique_id: String,
    media_kind: String,
    file_name: Option<String>,
    file_size: i64,
    caption: String,
    indexed_unix_ms: i64,
}

impl RawIndexedFile {
    fn into_record(self) -> StoreResult<IndexedFile> {
        let media_kind = MediaKind::parse(&self.media_kind).ok_or_else(|| {
            RecordStoreError::InvalidPersistedValue {
                field: "media_kind",
                value: self.media_kind.clone(),
            }
        })?;
        Ok(IndexedFile {
            conversation_id: self.conversation_id,
            message_id: self.message_id,
            media_id: self.media_id,
            media_unique_id: self.media_unique_id,
            media_kind,
            file_name: self.file_name,
            file_size: u64_from_db("file_size", self.file_size)?,
            caption: self.caption,
            indexed_unix_ms: u64_from_db("indexed_unix_ms", self.indexed_unix_ms)?,
        })
    }
}

fn read_raw_row(row: &Row<'_>) -> rusqlite::Result<RawIndexedFile> {
    Ok(RawIndexedFile {
        conversation_id: row.get(0)?,
        message_id: row.get(1)?,
        media_id: row.get(2)?,
        media_unique_id: row.get(3)?,
        media_kind: row.get(4)?,
        file_name: row.get(5)?,
        file_size: row.get(6)?,
        caption: row.get(7)?,
        indexed_unix_ms: row.get(8)?,
    })
}

fn u64_to_db(field: &'static str, value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| RecordStoreError::ValueOutOfRange {
        field,
        value: value.to_string(),
    })
}

fn u64_from_db(field: &'static str, value: i64) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| RecordStoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}
