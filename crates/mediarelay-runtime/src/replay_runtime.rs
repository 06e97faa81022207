use futures_util::TryStreamExt;
use mediarelay_platform::{ConversationRef, PlatformClient, PlatformError};
use mediarelay_store::{
    stream_all, IndexedFile, RecordStore, RecordStoreError, DEFAULT_STREAM_PAGE_SIZE,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::indexing_runtime::serialize_duration_ms;
use crate::progress::{render_replay_progress, render_replay_started, ProgressSink, ReplayProgress};

pub const DEFAULT_RECORD_DELAY: Duration = Duration::from_secs(2);
pub const PROGRESS_EVERY_RECORDS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    /// Pause after every record, sent or failed.
    pub record_delay: Duration,
    pub page_size: usize,
    pub progress_every: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            record_delay: DEFAULT_RECORD_DELAY,
            page_size: DEFAULT_STREAM_PAGE_SIZE,
            progress_every: PROGRESS_EVERY_RECORDS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub target: String,
    pub total: u64,
    pub sent: u64,
    pub failed: u64,
    #[serde(rename = "duration_ms", serialize_with = "serialize_duration_ms")]
    pub duration: Duration,
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read indexed files: {0}")]
    Store(#[from] RecordStoreError),
}

/// Re-sends every stored record to one destination conversation.
pub struct ReplayRuntime {
    client: Arc<dyn PlatformClient>,
    store: Arc<dyn RecordStore>,
    config: ReplayConfig,
}

impl ReplayRuntime {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        store: Arc<dyn RecordStore>,
        config: ReplayConfig,
    ) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    /// Streams the store in key order and sends each record once.
    ///
    /// Per-record failures are counted and never end the run. An empty store
    /// returns a report with `total == 0` without contacting the platform.
    pub async fn run(
        &self,
        target: &ConversationRef,
        sink: &dyn ProgressSink,
    ) -> Result<ReplayReport, ReplayError> {
        let total = self.store.count().await?;
        let mut report = ReplayReport {
            target: target.to_string(),
            total,
            ..ReplayReport::default()
        };
        if total == 0 {
            info!(target = %target, "record store is empty; nothing to replay");
            return Ok(report);
        }

        sink.publish(&render_replay_started(target, total)).await;
        info!(target = %target, total, "replay started");

        let started = Instant::now();
        let progress_every = self.config.progress_every.max(1);
        let mut records = stream_all(Arc::clone(&self.store), self.config.page_size);
        while let Some(record) = records.try_next().await? {
            match self.send_with_single_retry(target, &record).await {
                Ok(()) => report.sent = report.sent.saturating_add(1),
                Err(error) => {
                    report.failed = report.failed.saturating_add(1);
                    warn!(
                        target = %target,
                        record = %record.key(),
                        media_id = %record.media_id,
                        error = %error,
                        "failed to replay record"
                    );
                }
            }

            let processed = report.sent.saturating_add(report.failed);
            if processed % progress_every == 0 {
                let progress = ReplayProgress {
                    sent: report.sent,
                    failed: report.failed,
                    total,
                    elapsed: started.elapsed(),
                };
                sink.publish(&render_replay_progress(&progress)).await;
            }
            sleep(self.config.record_delay).await;
        }

        report.duration = started.elapsed();
        info!(
            target = %target,
            sent = report.sent,
            failed = report.failed,
            "replay finished"
        );
        Ok(report)
    }

    async fn send_with_single_retry(
        &self,
        target: &ConversationRef,
        record: &IndexedFile,
    ) -> Result<(), PlatformError> {
        let first = self
            .client
            .send_document(target, &record.media_id, &record.caption)
            .await;
        let error = match first {
            Ok(_) => return Ok(()),
            Err(error) => error,
        };
        let Some(wait) = error.rate_limit_wait() else {
            return Err(error);
        };

        info!(
            target = %target,
            record = %record.key(),
            retry_after_ms = wait.as_millis() as u64,
            "rate limited while replaying; waiting before one retry"
        );
        sleep(wait).await;
        self.client
            .send_document(target, &record.media_id, &record.caption)
            .await
            .map(|_| ())
    }
}
