use async_trait::async_trait;
use mediarelay_core::MediaKind;
use mediarelay_platform::{
    ConversationMetadata, ConversationRef, MediaAttachment, PlatformClient, PlatformError,
    PlatformIdentity, PlatformMessage, SentMessage,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::progress::ProgressSink;

pub(crate) const SOURCE_CONVERSATION: i64 = -100_200;

pub(crate) fn media_message(conversation_id: i64, message_id: i64) -> PlatformMessage {
    PlatformMessage {
        conversation_id,
        message_id,
        empty: false,
        caption: format!("<b>caption {message_id}</b>"),
        media: Some(MediaAttachment {
            kind: if message_id % 2 == 0 {
                MediaKind::Video
            } else {
                MediaKind::Document
            },
            media_id: format!("media-{message_id}"),
            media_unique_id: format!("unique-{message_id}"),
            file_name: Some(format!("file-{message_id}.bin")),
            file_size: 512,
        }),
    }
}

pub(crate) fn text_message(conversation_id: i64, message_id: i64) -> PlatformMessage {
    PlatformMessage {
        conversation_id,
        message_id,
        empty: false,
        caption: String::new(),
        media: None,
    }
}

pub(crate) fn empty_slot(conversation_id: i64, message_id: i64) -> PlatformMessage {
    PlatformMessage {
        conversation_id,
        message_id,
        empty: true,
        caption: String::new(),
        media: None,
    }
}

fn rate_limited(wait: Duration) -> PlatformError {
    PlatformError::RateLimited { retry_after: wait }
}

fn api_error(description: &str) -> PlatformError {
    PlatformError::Api {
        code: 400,
        description: description.to_string(),
    }
}

/// Scripted platform double. Windows are addressed by the first id of the
/// `fetch_messages_by_ids` request.
#[derive(Default)]
pub(crate) struct FakePlatform {
    history: Mutex<BTreeMap<i64, PlatformMessage>>,
    unreachable: AtomicBool,
    logged_out: AtomicBool,
    latest_rate_limits: Mutex<VecDeque<Duration>>,
    window_rate_limits: Mutex<HashMap<i64, VecDeque<Duration>>>,
    failing_windows: Mutex<HashSet<i64>>,
    fetch_requests: Mutex<Vec<Vec<i64>>>,
    failing_media: Mutex<HashSet<String>>,
    media_rate_limits: Mutex<HashMap<String, VecDeque<Duration>>>,
    send_attempts: Mutex<Vec<String>>,
    sent_documents: Mutex<Vec<(ConversationRef, String, String)>>,
    fail_status: AtomicBool,
    sent_texts: Mutex<Vec<String>>,
    edits: Mutex<Vec<(i64, String)>>,
    next_message_id: AtomicI64,
}

impl FakePlatform {
    pub(crate) fn with_history(messages: impl IntoIterator<Item = PlatformMessage>) -> Self {
        let platform = Self::default();
        {
            let mut history = platform.history.lock().expect("history lock");
            for message in messages {
                history.insert(message.message_id, message);
            }
        }
        platform
    }

    pub(crate) fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub(crate) fn set_logged_out(&self, logged_out: bool) {
        self.logged_out.store(logged_out, Ordering::SeqCst);
    }

    pub(crate) fn rate_limit_latest(&self, waits: impl IntoIterator<Item = Duration>) {
        self.latest_rate_limits
            .lock()
            .expect("latest lock")
            .extend(waits);
    }

    pub(crate) fn rate_limit_window(&self, first_id: i64, waits: impl IntoIterator<Item = Duration>) {
        self.window_rate_limits
            .lock()
            .expect("window lock")
            .entry(first_id)
            .or_default()
            .extend(waits);
    }

    pub(crate) fn fail_window(&self, first_id: i64) {
        self.failing_windows
            .lock()
            .expect("failing windows lock")
            .insert(first_id);
    }

    pub(crate) fn fail_media(&self, media_id: &str) {
        self.failing_media
            .lock()
            .expect("failing media lock")
            .insert(media_id.to_string());
    }

    pub(crate) fn rate_limit_media(&self, media_id: &str, waits: impl IntoIterator<Item = Duration>) {
        self.media_rate_limits
            .lock()
            .expect("media lock")
            .entry(media_id.to_string())
            .or_default()
            .extend(waits);
    }

    pub(crate) fn fail_status_messages(&self, fail: bool) {
        self.fail_status.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fetch_requests(&self) -> Vec<Vec<i64>> {
        self.fetch_requests.lock().expect("fetch lock").clone()
    }

    pub(crate) fn send_attempts(&self) -> Vec<String> {
        self.send_attempts.lock().expect("attempts lock").clone()
    }

    pub(crate) fn sent_media_ids(&self) -> Vec<String> {
        self.sent_documents
            .lock()
            .expect("sent lock")
            .iter()
            .map(|(_, media_id, _)| media_id.clone())
            .collect()
    }

    pub(crate) fn sent_documents(&self) -> Vec<(ConversationRef, String, String)> {
        self.sent_documents.lock().expect("sent lock").clone()
    }

    pub(crate) fn sent_texts(&self) -> Vec<String> {
        self.sent_texts.lock().expect("texts lock").clone()
    }

    pub(crate) fn edits(&self) -> Vec<(i64, String)> {
        self.edits.lock().expect("edits lock").clone()
    }

    fn next_id(&self) -> i64 {
        self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn get_me(&self) -> Result<PlatformIdentity, PlatformError> {
        if self.logged_out.load(Ordering::SeqCst) {
            return Err(PlatformError::Api {
                code: 401,
                description: "Unauthorized".to_string(),
            });
        }
        Ok(PlatformIdentity {
            id: 1,
            display_name: "Relay".to_string(),
            username: Some("relay_bot".to_string()),
        })
    }

    async fn fetch_conversation_metadata(
        &self,
        conversation: &ConversationRef,
    ) -> Result<ConversationMetadata, PlatformError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(api_error("Bad Request: chat not found"));
        }
        Ok(ConversationMetadata {
            id: conversation.as_id().unwrap_or(SOURCE_CONVERSATION),
            title: Some("Archive".to_string()),
            username: None,
            kind: Some("channel".to_string()),
        })
    }

    async fn fetch_latest_message(
        &self,
        _conversation: &ConversationRef,
    ) -> Result<Option<PlatformMessage>, PlatformError> {
        if let Some(wait) = self
            .latest_rate_limits
            .lock()
            .expect("latest lock")
            .pop_front()
        {
            return Err(rate_limited(wait));
        }
        let history = self.history.lock().expect("history lock");
        Ok(history.values().next_back().cloned())
    }

    async fn fetch_messages_by_ids(
        &self,
        _conversation: &ConversationRef,
        message_ids: &[i64],
    ) -> Result<Vec<PlatformMessage>, PlatformError> {
        self.fetch_requests
            .lock()
            .expect("fetch lock")
            .push(message_ids.to_vec());
        let first_id = message_ids.first().copied().unwrap_or_default();

        let scripted_wait = self
            .window_rate_limits
            .lock()
            .expect("window lock")
            .get_mut(&first_id)
            .and_then(VecDeque::pop_front);
        if let Some(wait) = scripted_wait {
            return Err(rate_limited(wait));
        }
        if self
            .failing_windows
            .lock()
            .expect("failing windows lock")
            .contains(&first_id)
        {
            return Err(api_error("Internal: window unavailable"));
        }

        let history = self.history.lock().expect("history lock");
        Ok(message_ids
            .iter()
            .filter_map(|id| history.get(id).cloned())
            .collect())
    }

    async fn send_document(
        &self,
        conversation: &ConversationRef,
        media_id: &str,
        caption: &str,
    ) -> Result<SentMessage, PlatformError> {
        self.send_attempts
            .lock()
            .expect("attempts lock")
            .push(media_id.to_string());

        let scripted_wait = self
            .media_rate_limits
            .lock()
            .expect("media lock")
            .get_mut(media_id)
            .and_then(VecDeque::pop_front);
        if let Some(wait) = scripted_wait {
            return Err(rate_limited(wait));
        }
        if self
            .failing_media
            .lock()
            .expect("failing media lock")
            .contains(media_id)
        {
            return Err(api_error("Bad Request: wrong file identifier"));
        }

        self.sent_documents.lock().expect("sent lock").push((
            conversation.clone(),
            media_id.to_string(),
            caption.to_string(),
        ));
        Ok(SentMessage {
            conversation_id: conversation.as_id().unwrap_or_default(),
            message_id: self.next_id(),
        })
    }

    async fn send_text(
        &self,
        conversation: &ConversationRef,
        text: &str,
    ) -> Result<SentMessage, PlatformError> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(api_error("Bad Request: not enough rights"));
        }
        self.sent_texts
            .lock()
            .expect("texts lock")
            .push(text.to_string());
        Ok(SentMessage {
            conversation_id: conversation.as_id().unwrap_or_default(),
            message_id: self.next_id(),
        })
    }

    async fn edit_text(
        &self,
        _conversation: &ConversationRef,
        message_id: i64,
        text: &str,
    ) -> Result<(), PlatformError> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(api_error("Bad Request: not enough rights"));
        }
        self.edits
            .lock()
            .expect("edits lock")
            .push((message_id, text.to_string()));
        Ok(())
    }
}

/// Collects every published text.
#[derive(Default)]
pub(crate) struct RecordingSink {
    texts: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub(crate) fn texts(&self) -> Vec<String> {
        self.texts.lock().expect("sink lock").clone()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn publish(&self, text: &str) {
        self.texts
            .lock()
            .expect("sink lock")
            .push(text.to_string());
    }
}
