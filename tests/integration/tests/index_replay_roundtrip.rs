use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use futures_util::TryStreamExt;
use mediarelay_core::MediaKind;
use mediarelay_platform::{
    ConversationMetadata, ConversationRef, MediaAttachment, PlatformClient, PlatformError,
    PlatformIdentity, PlatformMessage, SentMessage,
};
use mediarelay_runtime::{
    AdmissionError, CoordinatorConfig, IndexingConfig, JobError, JobKind, ProgressSink,
    RelayCoordinator, ReplayConfig, WalkerConfig,
};
use mediarelay_store::{stream_all, IndexedFile, RecordStore, SqliteRecordStore};
use tokio::sync::Mutex as AsyncMutex;

const SOURCE: i64 = -1_001_000;
const TARGET: i64 = -2_002_000;

/// Platform double holding one source conversation and recording every send.
struct ScriptedConversation {
    messages: BTreeMap<i64, PlatformMessage>,
    fetch_rate_limits: AsyncMutex<HashMap<i64, VecDeque<Duration>>>,
    send_rate_limits: AsyncMutex<HashMap<String, VecDeque<Duration>>>,
    rejected_media: Vec<String>,
    fetches: AsyncMutex<Vec<Vec<i64>>>,
    sends: AsyncMutex<Vec<(i64, String, String)>>,
}

impl ScriptedConversation {
    fn new(media_ids: &[i64], text_ids: &[i64]) -> Self {
        let mut messages = BTreeMap::new();
        for id in media_ids {
            messages.insert(*id, media_message(*id));
        }
        for id in text_ids {
            messages.insert(
                *id,
                PlatformMessage {
                    conversation_id: SOURCE,
                    message_id: *id,
                    empty: false,
                    caption: "just text".to_string(),
                    media: None,
                },
            );
        }
        Self {
            messages,
            fetch_rate_limits: AsyncMutex::new(HashMap::new()),
            send_rate_limits: AsyncMutex::new(HashMap::new()),
            rejected_media: Vec::new(),
            fetches: AsyncMutex::new(Vec::new()),
            sends: AsyncMutex::new(Vec::new()),
        }
    }

    fn reject_media(mut self, media_id: &str) -> Self {
        self.rejected_media.push(media_id.to_string());
        self
    }

    async fn rate_limit_fetch(&self, first_id: i64, wait: Duration) {
        self.fetch_rate_limits
            .lock()
            .await
            .entry(first_id)
            .or_default()
            .push_back(wait);
    }

    async fn rate_limit_send(&self, media_id: &str, wait: Duration) {
        self.send_rate_limits
            .lock()
            .await
            .entry(media_id.to_string())
            .or_default()
            .push_back(wait);
    }

    async fn sent_media(&self) -> Vec<String> {
        self.sends
            .lock()
            .await
            .iter()
            .map(|(_, media_id, _)| media_id.clone())
            .collect()
    }
}

fn media_message(message_id: i64) -> PlatformMessage {
    PlatformMessage {
        conversation_id: SOURCE,
        message_id,
        empty: false,
        caption: format!("<i>episode {message_id}</i>"),
        media: Some(MediaAttachment {
            kind: MediaKind::Document,
            media_id: format!("file-{message_id}"),
            media_unique_id: format!("unique-{message_id}"),
            file_name: Some(format!("episode-{message_id}.mkv")),
            file_size: 1_000 + message_id as u64,
        }),
    }
}

#[async_trait]
impl PlatformClient for ScriptedConversation {
    async fn get_me(&self) -> Result<PlatformIdentity, PlatformError> {
        Ok(PlatformIdentity {
            id: 99,
            display_name: "Archive Relay".to_string(),
            username: Some("archive_relay_bot".to_string()),
        })
    }

    async fn fetch_conversation_metadata(
        &self,
        _conversation: &ConversationRef,
    ) -> Result<ConversationMetadata, PlatformError> {
        Ok(ConversationMetadata {
            id: SOURCE,
            title: Some("Archive".to_string()),
            username: Some("archive".to_string()),
            kind: Some("channel".to_string()),
        })
    }

    async fn fetch_latest_message(
        &self,
        _conversation: &ConversationRef,
    ) -> Result<Option<PlatformMessage>, PlatformError> {
        Ok(self.messages.values().next_back().cloned())
    }

    async fn fetch_messages_by_ids(
        &self,
        _conversation: &ConversationRef,
        message_ids: &[i64],
    ) -> Result<Vec<PlatformMessage>, PlatformError> {
        self.fetches.lock().await.push(message_ids.to_vec());
        let first_id = message_ids.first().copied().unwrap_or_default();
        if let Some(wait) = self
            .fetch_rate_limits
            .lock()
            .await
            .get_mut(&first_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(PlatformError::RateLimited { retry_after: wait });
        }
        Ok(message_ids
            .iter()
            .filter_map(|id| self.messages.get(id).cloned())
            .collect())
    }

    async fn send_document(
        &self,
        conversation: &ConversationRef,
        media_id: &str,
        caption: &str,
    ) -> Result<SentMessage, PlatformError> {
        if let Some(wait) = self
            .send_rate_limits
            .lock()
            .await
            .get_mut(media_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(PlatformError::RateLimited { retry_after: wait });
        }
        if self.rejected_media.iter().any(|rejected| rejected == media_id) {
            return Err(PlatformError::Api {
                code: 400,
                description: "Bad Request: wrong file identifier".to_string(),
            });
        }
        let conversation_id = conversation.as_id().unwrap_or_default();
        let mut sends = self.sends.lock().await;
        sends.push((conversation_id, media_id.to_string(), caption.to_string()));
        Ok(SentMessage {
            conversation_id,
            message_id: sends.len() as i64,
        })
    }

    async fn send_text(
        &self,
        conversation: &ConversationRef,
        _text: &str,
    ) -> Result<SentMessage, PlatformError> {
        Ok(SentMessage {
            conversation_id: conversation.as_id().unwrap_or_default(),
            message_id: 1,
        })
    }

    async fn edit_text(
        &self,
        _conversation: &ConversationRef,
        _message_id: i64,
        _text: &str,
    ) -> Result<(), PlatformError> {
        Ok(())
    }
}

#[derive(Default)]
struct CollectingSink {
    texts: AsyncMutex<Vec<String>>,
}

#[async_trait]
impl ProgressSink for CollectingSink {
    async fn publish(&self, text: &str) {
        self.texts.lock().await.push(text.to_string());
    }
}

fn coordinator_config() -> CoordinatorConfig {
    CoordinatorConfig {
        indexing: IndexingConfig {
            walker: WalkerConfig {
                window_size: 10,
                error_backoff: Duration::from_secs(5),
                rate_limit_ceiling: Duration::from_secs(3_600),
            },
            window_delay: Duration::from_secs(3),
        },
        replay: ReplayConfig {
            record_delay: Duration::from_secs(2),
            page_size: 4,
            progress_every: 10,
        },
    }
}

async fn connected(
    platform: Arc<ScriptedConversation>,
    store: Arc<SqliteRecordStore>,
) -> RelayCoordinator {
    let coordinator = RelayCoordinator::new(platform, store, coordinator_config());
    coordinator.connect().await.expect("connect");
    coordinator
}

async fn stored_records(store: Arc<SqliteRecordStore>) -> Vec<IndexedFile> {
    stream_all(store, 3)
        .try_collect()
        .await
        .expect("stream records")
}

#[tokio::test(start_paused = true)]
async fn integration_indexing_twice_yields_the_same_record_set() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let store =
        Arc::new(SqliteRecordStore::new(tempdir.path().join("records.sqlite")).expect("store"));
    let platform = Arc::new(ScriptedConversation::new(&[3, 8, 15, 22, 23], &[1, 9, 20]));
    let coordinator = connected(platform.clone(), store.clone()).await;
    let source = ConversationRef::Handle("@archive".to_string());

    let first = coordinator
        .run_indexing(&source, &CollectingSink::default())
        .await
        .expect("first indexing");
    let records_after_first = stored_records(store.clone()).await;
    let second = coordinator
        .run_indexing(&source, &CollectingSink::default())
        .await
        .expect("second indexing");
    let records_after_second = stored_records(store.clone()).await;

    assert_eq!(first.files_saved, 5);
    assert_eq!(second.files_saved, 5);
    assert_eq!(first.messages_processed, 8);
    assert_eq!(first.windows_walked, 3);
    assert_eq!(records_after_first, records_after_second);
    assert_eq!(store.count().await.expect("count"), 5);
    let keys: Vec<String> = records_after_second
        .iter()
        .map(|record| record.key().to_string())
        .collect();
    assert_eq!(
        keys,
        vec![
            format!("{SOURCE}_3"),
            format!("{SOURCE}_8"),
            format!("{SOURCE}_15"),
            format!("{SOURCE}_22"),
            format!("{SOURCE}_23"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn integration_rate_limited_window_is_indexed_exactly_once() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let store =
        Arc::new(SqliteRecordStore::new(tempdir.path().join("records.sqlite")).expect("store"));
    let platform = Arc::new(ScriptedConversation::new(&[2, 11, 12, 19], &[]));
    platform.rate_limit_fetch(9, Duration::from_secs(30)).await;
    let coordinator = connected(platform.clone(), store.clone()).await;

    let report = coordinator
        .run_indexing(&ConversationRef::Id(SOURCE), &CollectingSink::default())
        .await
        .expect("indexing");

    assert_eq!(report.files_saved, 4);
    assert_eq!(store.count().await.expect("count"), 4);
    let fetches = platform.fetches.lock().await.clone();
    assert_eq!(fetches.len(), 3);
    assert_eq!(fetches[1], fetches[2]);
}

#[tokio::test(start_paused = true)]
async fn integration_replay_forwards_stored_records_in_key_order() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let path = tempdir.path().join("records.sqlite");
    let store = Arc::new(SqliteRecordStore::new(&path).expect("store"));
    let media_ids: Vec<i64> = (1..=12).collect();
    let platform = Arc::new(ScriptedConversation::new(&media_ids, &[]).reject_media("file-3"));
    platform
        .rate_limit_send("file-7", Duration::from_secs(4))
        .await;
    platform
        .rate_limit_send("file-7", Duration::from_secs(4))
        .await;
    let coordinator = connected(platform.clone(), store.clone()).await;

    coordinator
        .run_indexing(&ConversationRef::Id(SOURCE), &CollectingSink::default())
        .await
        .expect("indexing");

    let reopened = Arc::new(SqliteRecordStore::new(&path).expect("reopen"));
    let coordinator = connected(platform.clone(), reopened).await;
    let sink = CollectingSink::default();
    let report = coordinator
        .run_replay(&ConversationRef::Id(TARGET), &sink)
        .await
        .expect("replay");

    assert_eq!(report.total, 12);
    assert_eq!(report.sent, 10);
    assert_eq!(report.failed, 2);
    let expected: Vec<String> = (1..=12)
        .filter(|id| *id != 3 && *id != 7)
        .map(|id| format!("file-{id}"))
        .collect();
    assert_eq!(platform.sent_media().await, expected);

    let sends = platform.sends.lock().await.clone();
    assert!(sends.iter().all(|(target, _, _)| *target == TARGET));
    assert_eq!(sends[0].2, "<i>episode 1</i>");

    let texts = sink.texts.lock().await.clone();
    assert!(texts
        .last()
        .expect("terminal text")
        .contains("Forwarding complete!"));
}

#[tokio::test(start_paused = true)]
async fn integration_concurrent_job_requests_admit_only_one() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let store =
        Arc::new(SqliteRecordStore::new(tempdir.path().join("records.sqlite")).expect("store"));
    let platform = Arc::new(ScriptedConversation::new(&[4, 5, 6], &[]));
    let coordinator = connected(platform.clone(), store.clone()).await;

    let indexing = coordinator
        .start_indexing(
            ConversationRef::Id(SOURCE),
            Arc::new(CollectingSink::default()),
        )
        .expect("indexing admitted");
    let rejected = coordinator
        .start_replay(
            ConversationRef::Id(TARGET),
            Arc::new(CollectingSink::default()),
        )
        .expect_err("replay rejected");
    assert_eq!(
        rejected,
        AdmissionError::JobActive(JobError::Busy {
            active: JobKind::Indexing
        })
    );

    indexing.await.expect("join").expect("indexing");
    let replay = coordinator
        .start_replay(
            ConversationRef::Id(TARGET),
            Arc::new(CollectingSink::default()),
        )
        .expect("replay admitted after indexing");
    let report = replay.await.expect("join").expect("replay");
    assert_eq!(report.sent, 3);
    assert!(!coordinator.is_job_running());
}

#[tokio::test]
async fn integration_empty_store_replay_sends_nothing() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let store =
        Arc::new(SqliteRecordStore::new(tempdir.path().join("records.sqlite")).expect("store"));
    let platform = Arc::new(ScriptedConversation::new(&[1, 2], &[]));
    let coordinator = connected(platform.clone(), store).await;

    let report = coordinator
        .run_replay(&ConversationRef::Id(TARGET), &CollectingSink::default())
        .await
        .expect("replay");
    assert_eq!((report.sent, report.failed), (0, 0));
    assert!(platform.sent_media().await.is_empty());
}
