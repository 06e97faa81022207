//! Process-wide single-flight admission for indexing and replay jobs.

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Indexing,
    Replay,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Indexing => "indexing",
            Self::Replay => "replay",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("a {active} job is already running")]
    Busy { active: JobKind },
}

/// Read-only view of the job flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub indexing: bool,
    pub replay: bool,
}

impl JobSnapshot {
    pub fn any_active(&self) -> bool {
        self.indexing || self.replay
    }

    pub fn active_kind(&self) -> Option<JobKind> {
        if self.indexing {
            Some(JobKind::Indexing)
        } else if self.replay {
            Some(JobKind::Replay)
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
struct JobFlags {
    indexing: bool,
    replay: bool,
}

impl JobFlags {
    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            indexing: self.indexing,
            replay: self.replay,
        }
    }

    fn flag_mut(&mut self, kind: JobKind) -> &mut bool {
        match kind {
            JobKind::Indexing => &mut self.indexing,
            JobKind::Replay => &mut self.replay,
        }
    }
}

/// At most one job of any kind is active at a time.
///
/// Flags only change through [`JobGuard::try_acquire`] and the drop of the
/// returned [`JobPermit`].
#[derive(Debug, Clone, Default)]
pub struct JobGuard {
    flags: Arc<Mutex<JobFlags>>,
}

impl JobGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, kind: JobKind) -> Result<JobPermit, JobError> {
        let mut flags = lock_flags(&self.flags);
        if let Some(active) = flags.snapshot().active_kind() {
            return Err(JobError::Busy { active });
        }
        *flags.flag_mut(kind) = true;
        Ok(JobPermit {
            kind,
            flags: Arc::clone(&self.flags),
        })
    }

    pub fn snapshot(&self) -> JobSnapshot {
        lock_flags(&self.flags).snapshot()
    }

    pub fn is_any_active(&self) -> bool {
        self.snapshot().any_active()
    }
}

/// Admission token for one running job. Dropping it clears the job's flag.
#[derive(Debug)]
pub struct JobPermit {
    kind: JobKind,
    flags: Arc<Mutex<JobFlags>>,
}

impl JobPermit {
    pub fn kind(&self) -> JobKind {
        self.kind
    }
}

impl Drop for JobPermit {
    fn drop(&mut self) {
        *lock_flags(&self.flags).flag_mut(self.kind) = false;
    }
}

// A panic while holding the lock cannot leave the two booleans inconsistent.
fn lock_flags(flags: &Mutex<JobFlags>) -> MutexGuard<'_, JobFlags> {
    flags.lock().unwrap_or_else(PoisonError::into_inner)
}
