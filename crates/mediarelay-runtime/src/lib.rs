//! Indexing and replay runtimes plus the coordinator that admits them.
//!
//! Only one job runs at a time across both kinds. Progress is rendered as
//! HTML text and delivered through a [`ProgressSink`].

mod coordinator;
mod cursor_walker;
mod indexing_runtime;
mod job_guard;
mod progress;
mod replay_runtime;
#[cfg(test)]
mod test_support;

pub use coordinator::{AdmissionError, CoordinatorConfig, RelayCoordinator, RelayStatus, RunError};
pub use cursor_walker::{
    plan_windows, CursorWalker, WalkerConfig, WalkerError, WalkerStats, Window, WindowBatch,
    WindowPlan, DEFAULT_RATE_LIMIT_CEILING, DEFAULT_WINDOW_ERROR_BACKOFF, DEFAULT_WINDOW_SIZE,
};
pub use indexing_runtime::{
    indexed_file_from_message, IndexingConfig, IndexingError, IndexingReport, IndexingRuntime,
    DEFAULT_WINDOW_DELAY,
};
pub use job_guard::{JobError, JobGuard, JobKind, JobPermit, JobSnapshot};
pub use progress::{
    render_indexing_progress, render_indexing_started, render_indexing_summary,
    render_job_failure, render_replay_progress, render_replay_started, render_replay_summary,
    IndexingProgress, ProgressSink, ReplayProgress, StatusMessageSink, TracingProgressSink,
};
pub use replay_runtime::{
    ReplayConfig, ReplayError, ReplayReport, ReplayRuntime, DEFAULT_RECORD_DELAY,
    PROGRESS_EVERY_RECORDS,
};
