//! Status text rendering and the sinks that surface it.
//!
//! Running jobs render their counters with an `HH:MM:SS` clock; completion
//! summaries use `HHh MMm SSs`. Texts are HTML because the platform status
//! message is sent with HTML parse mode.

use async_trait::async_trait;
use mediarelay_core::{escape_html, format_clock, format_duration_hms};
use mediarelay_platform::{ConversationRef, PlatformClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::indexing_runtime::IndexingReport;
use crate::job_guard::JobKind;
use crate::replay_runtime::ReplayReport;

/// Destination for progress text. Publishing never fails a job.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn publish(&self, text: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexingProgress {
    pub files_saved: u64,
    pub messages_processed: u64,
    pub windows_walked: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayProgress {
    pub sent: u64,
    pub failed: u64,
    pub total: u64,
    pub elapsed: Duration,
}

pub fn render_indexing_started(conversation: &ConversationRef) -> String {
    format!(
        "Starting indexing for chat <code>{}</code>...",
        escape_html(&conversation.to_string())
    )
}

pub fn render_indexing_progress(conversation: &ConversationRef, progress: &IndexingProgress) -> String {
    format!(
        "<b>Indexing...</b>\n\nChat: <code>{}</code>\nFiles saved: <code>{}</code>\nMessages scanned: <code>{}</code>\nTime: {}",
        escape_html(&conversation.to_string()),
        progress.files_saved,
        progress.messages_processed,
        format_clock(progress.elapsed)
    )
}

pub fn render_indexing_summary(report: &IndexingReport) -> String {
    let mut text = format!(
        "<b>Indexing complete!</b>\n\nChat: <code>{}</code>\nNew/updated files: <code>{}</code>\nMessages scanned: <code>{}</code>\nDuration: {}",
        escape_html(&report.conversation),
        report.files_saved,
        report.messages_processed,
        format_duration_hms(report.duration)
    );
    if report.windows_abandoned > 0 {
        text.push_str(&format!(
            "\nSkipped windows: <code>{}</code>",
            report.windows_abandoned
        ));
    }
    text
}

pub fn render_replay_started(target: &ConversationRef, total: u64) -> String {
    format!(
        "Found <b>{total}</b> files. Starting to forward to <code>{}</code>...",
        escape_html(&target.to_string())
    )
}

pub fn render_replay_progress(progress: &ReplayProgress) -> String {
    format!(
        "<b>Forwarding...</b>\n\nSent: <code>{}/{}</code>\nErrors: <code>{}</code>\nTime: {}",
        progress.sent,
        progress.total,
        progress.failed,
        format_clock(progress.elapsed)
    )
}

pub fn render_replay_summary(report: &ReplayReport) -> String {
    if report.total == 0 {
        return "The record store is empty. No files to forward.".to_string();
    }
    format!(
        "<b>Forwarding complete!</b>\n\nSent: <code>{}</code>\nFailed: <code>{}</code>\nDuration: {}",
        report.sent,
        report.failed,
        format_duration_hms(report.duration)
    )
}

pub fn render_job_failure(kind: JobKind, error: &str) -> String {
    format!(
        "<b>{} failed.</b>\n\nDetails: <code>{}</code>",
        match kind {
            JobKind::Indexing => "Indexing",
            JobKind::Replay => "Forwarding",
        },
        escape_html(error)
    )
}

#[derive(Debug, Default)]
struct StatusMessageState {
    message_id: Option<i64>,
    last_text: Option<String>,
}

/// Keeps one status message per job up to date in a platform conversation.
///
/// The first publish sends a message; later publishes edit it in place.
/// Publishing the same text twice in a row is a no-op.
pub struct StatusMessageSink {
    client: Arc<dyn PlatformClient>,
    conversation: ConversationRef,
    state: Mutex<StatusMessageState>,
}

impl StatusMessageSink {
    pub fn new(client: Arc<dyn PlatformClient>, conversation: ConversationRef) -> Self {
        Self {
            client,
            conversation,
            state: Mutex::new(StatusMessageState::default()),
        }
    }

    pub async fn message_id(&self) -> Option<i64> {
        self.state.lock().await.message_id
    }
}

#[async_trait]
impl ProgressSink for StatusMessageSink {
    async fn publish(&self, text: &str) {
        let mut state = self.state.lock().await;
        if state.last_text.as_deref() == Some(text) {
            return;
        }

        let current_message = state.message_id;
        let result = match current_message {
            Some(message_id) => {
                self.client
                    .edit_text(&self.conversation, message_id, text)
                    .await
            }
            None => self
                .client
                .send_text(&self.conversation, text)
                .await
                .map(|sent| state.message_id = Some(sent.message_id)),
        };

        match result {
            Ok(()) => state.last_text = Some(text.to_string()),
            Err(error) => warn!(
                conversation = %self.conversation,
                error = %error,
                "failed to publish status message"
            ),
        }
    }
}

/// Logs progress text for headless runs.
#[derive(Debug, Clone)]
pub struct TracingProgressSink {
    job: &'static str,
}

impl TracingProgressSink {
    pub fn new(job: &'static str) -> Self {
        Self { job }
    }
}

#[async_trait]
impl ProgressSink for TracingProgressSink {
    async fn publish(&self, text: &str) {
        let plain = text.replace("\n\n", " | ").replace('\n', " | ");
        info!(job = self.job, "{plain}");
    }
}
