//! Job coordination: session state, admission, and job execution.

use mediarelay_platform::{ConversationRef, PlatformClient, PlatformError, PlatformIdentity};
use mediarelay_store::{RecordStore, RecordStoreError};
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::indexing_runtime::{IndexingConfig, IndexingError, IndexingReport, IndexingRuntime};
use crate::job_guard::{JobError, JobGuard, JobKind, JobPermit};
use crate::progress::{
    render_indexing_summary, render_job_failure, render_replay_summary, ProgressSink,
};
use crate::replay_runtime::{ReplayConfig, ReplayError, ReplayReport, ReplayRuntime};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub indexing: IndexingConfig,
    pub replay: ReplayConfig,
}

/// Reasons a job request is rejected before anything runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error(transparent)]
    JobActive(#[from] JobError),
    #[error("the platform session is not logged in")]
    NotLoggedIn,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error(transparent)]
    Indexing(#[from] IndexingError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayStatus {
    pub logged_in: bool,
    pub account: Option<String>,
    pub total_records: u64,
    pub indexing_active: bool,
    pub replay_active: bool,
}

impl RelayStatus {
    pub fn render(&self) -> String {
        let yes_no = |flag: bool| if flag { "yes" } else { "no" };
        let active = |flag: bool| if flag { "running" } else { "idle" };
        format!(
            "<b>Relay status</b>\n\nLogged in: {}\nIndexed files: <code>{}</code>\nIndexing: {}\nForwarding: {}",
            yes_no(self.logged_in),
            self.total_records,
            active(self.indexing_active),
            active(self.replay_active)
        )
    }
}

/// Owns the platform session, the record store and the job guard.
///
/// Cloning is cheap; clones share the guard and the session.
#[derive(Clone)]
pub struct RelayCoordinator {
    client: Arc<dyn PlatformClient>,
    store: Arc<dyn RecordStore>,
    guard: JobGuard,
    config: CoordinatorConfig,
    session: Arc<RwLock<Option<PlatformIdentity>>>,
}

impl RelayCoordinator {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        store: Arc<dyn RecordStore>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            client,
            store,
            guard: JobGuard::new(),
            config,
            session: Arc::new(RwLock::new(None)),
        }
    }

    /// Probes the platform identity; jobs are only admitted after a
    /// successful probe.
    pub async fn connect(&self) -> Result<PlatformIdentity, PlatformError> {
        let identity = self.client.get_me().await?;
        info!(
            account_id = identity.id,
            account = %identity.display_name,
            "platform session established"
        );
        *self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(identity.clone());
        Ok(identity)
    }

    /// Re-runs the identity probe when no session is established; a live
    /// session is returned without a platform call.
    pub async fn ensure_connected(&self) -> Result<PlatformIdentity, PlatformError> {
        match self.identity() {
            Some(identity) => Ok(identity),
            None => self.connect().await,
        }
    }

    pub fn identity(&self) -> Option<PlatformIdentity> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.identity().is_some()
    }

    pub fn is_job_running(&self) -> bool {
        self.guard.is_any_active()
    }

    pub async fn status(&self) -> Result<RelayStatus, RecordStoreError> {
        let total_records = self.store.count().await?;
        let jobs = self.guard.snapshot();
        let identity = self.identity();
        Ok(RelayStatus {
            logged_in: identity.is_some(),
            account: identity.map(|identity| match identity.username {
                Some(username) => format!("{} (@{username})", identity.display_name),
                None => identity.display_name,
            }),
            total_records,
            indexing_active: jobs.indexing,
            replay_active: jobs.replay,
        })
    }

    fn admit(&self, kind: JobKind) -> Result<JobPermit, AdmissionError> {
        if let Some(active) = self.guard.snapshot().active_kind() {
            return Err(JobError::Busy { active }.into());
        }
        if !self.is_logged_in() {
            return Err(AdmissionError::NotLoggedIn);
        }
        Ok(self.guard.try_acquire(kind)?)
    }

    /// Admits an indexing job and runs it on the tokio runtime.
    pub fn start_indexing(
        &self,
        conversation: ConversationRef,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<JoinHandle<Result<IndexingReport, IndexingError>>, AdmissionError> {
        let permit = self.admit(JobKind::Indexing)?;
        let coordinator = self.clone();
        Ok(tokio::spawn(async move {
            let _permit = permit;
            coordinator
                .execute_indexing(&conversation, sink.as_ref())
                .await
        }))
    }

    /// Admits a replay job and runs it on the tokio runtime.
    pub fn start_replay(
        &self,
        target: ConversationRef,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<JoinHandle<Result<ReplayReport, ReplayError>>, AdmissionError> {
        let permit = self.admit(JobKind::Replay)?;
        let coordinator = self.clone();
        Ok(tokio::spawn(async move {
            let _permit = permit;
            coordinator.execute_replay(&target, sink.as_ref()).await
        }))
    }

    /// Admits and runs an indexing job to completion on the current task.
    pub async fn run_indexing(
        &self,
        conversation: &ConversationRef,
        sink: &dyn ProgressSink,
    ) -> Result<IndexingReport, RunError> {
        let _permit = self.admit(JobKind::Indexing)?;
        Ok(self.execute_indexing(conversation, sink).await?)
    }

    pub async fn run_replay(
        &self,
        target: &ConversationRef,
        sink: &dyn ProgressSink,
    ) -> Result<ReplayReport, RunError> {
        let _permit = self.admit(JobKind::Replay)?;
        Ok(self.execute_replay(target, sink).await?)
    }

    async fn execute_indexing(
        &self,
        conversation: &ConversationRef,
        sink: &dyn ProgressSink,
    ) -> Result<IndexingReport, IndexingError> {
        let runtime = IndexingRuntime::new(
            Arc::clone(&self.client),
            Arc::clone(&self.store),
            self.config.indexing.clone(),
        );
        let result = runtime.run(conversation, sink).await;
        match &result {
            Ok(report) => sink.publish(&render_indexing_summary(report)).await,
            Err(error) => {
                warn!(conversation = %conversation, error = %error, "indexing job failed");
                sink.publish(&render_job_failure(JobKind::Indexing, &error.to_string()))
                    .await;
            }
        }
        result
    }

    async fn execute_replay(
        &self,
        target: &ConversationRef,
        sink: &dyn ProgressSink,
    ) -> Result<ReplayReport, ReplayError> {
        let runtime = ReplayRuntime::new(
            Arc::clone(&self.client),
            Arc::clone(&self.store),
            self.config.replay.clone(),
        );
        let result = runtime.run(target, sink).await;
        match &result {
            Ok(report) => sink.publish(&render_replay_summary(report)).await,
            Err(error) => {
                warn!(target = %target, error = %error, "replay job failed");
                sink.publish(&render_job_failure(JobKind::Replay, &error.to_string()))
                    .await;
            }
        }
        result
    }
}
