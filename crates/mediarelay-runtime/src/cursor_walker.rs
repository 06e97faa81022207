//! Descending window traversal over a conversation's message-id space.
//!
//! The walker probes the most recent message id, then fetches fixed-size
//! windows from that id down to 1. A rate-limited window is retried after the
//! requested wait; any other failure abandons the window after a backoff
//! pause. Rate-limit waits are bounded per window by a ceiling.

use mediarelay_platform::{ConversationRef, PlatformClient, PlatformError, PlatformMessage};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

pub const DEFAULT_WINDOW_SIZE: usize = 100;
pub const DEFAULT_WINDOW_ERROR_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_RATE_LIMIT_CEILING: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkerConfig {
    pub window_size: usize,
    /// Pause after a window is abandoned because of a non-rate-limit error.
    pub error_backoff: Duration,
    /// Maximum total rate-limit wait spent on one window or on the probe.
    pub rate_limit_ceiling: Duration,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            error_backoff: DEFAULT_WINDOW_ERROR_BACKOFF,
            rate_limit_ceiling: DEFAULT_RATE_LIMIT_CEILING,
        }
    }
}

/// Inclusive, descending id range `[high..=low]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub high: i64,
    pub low: i64,
}

impl Window {
    pub fn ids(&self) -> Vec<i64> {
        (self.low..=self.high).rev().collect()
    }

    pub fn len(&self) -> usize {
        usize::try_from(self.high - self.low + 1).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.high < self.low
    }
}

/// Lazy iterator over the windows covering `upper_bound..=1`.
#[derive(Debug, Clone)]
pub struct WindowPlan {
    next_high: i64,
    size: i64,
}

impl Iterator for WindowPlan {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if self.next_high <= 0 {
            return None;
        }
        let high = self.next_high;
        let low = high.saturating_sub(self.size - 1).max(1);
        self.next_high = high.saturating_sub(self.size);
        Some(Window { high, low })
    }
}

pub fn plan_windows(upper_bound: i64, window_size: usize) -> WindowPlan {
    let size = i64::try_from(window_size.max(1)).unwrap_or(i64::MAX);
    WindowPlan {
        next_high: upper_bound,
        size,
    }
}

#[derive(Debug, Error)]
pub enum WalkerError {
    #[error(
        "traversal stalled{}: rate-limit waits would reach {requested_total:?}, above the {ceiling:?} ceiling",
        describe_window(.window)
    )]
    Stalled {
        window: Option<Window>,
        requested_total: Duration,
        ceiling: Duration,
    },
    #[error("failed to resolve the latest message: {0}")]
    UpperBound(#[source] PlatformError),
}

fn describe_window(window: &Option<Window>) -> String {
    match window {
        Some(window) => format!(" on window {}..{}", window.high, window.low),
        None => " while resolving the latest message".to_string(),
    }
}

/// One successfully fetched window. Missing ids are absent from `messages`.
#[derive(Debug, Clone)]
pub struct WindowBatch {
    pub window: Window,
    pub messages: Vec<PlatformMessage>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkerStats {
    pub windows_walked: u64,
    pub windows_abandoned: u64,
    pub rate_limit_waits: u64,
}

enum Attempt<T> {
    Done(T),
    Failed(PlatformError),
}

pub struct CursorWalker {
    client: Arc<dyn PlatformClient>,
    conversation: ConversationRef,
    config: WalkerConfig,
    plan: Option<WindowPlan>,
    stats: WalkerStats,
}

impl CursorWalker {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        conversation: ConversationRef,
        config: WalkerConfig,
    ) -> Self {
        Self {
            client,
            conversation,
            config,
            plan: None,
            stats: WalkerStats::default(),
        }
    }

    pub fn stats(&self) -> WalkerStats {
        self.stats
    }

    /// Resolves the most recent message id and prepares the window plan.
    ///
    /// Returns `None` when the conversation has no messages; the walk is then
    /// empty.
    pub async fn resolve_upper_bound(&mut self) -> Result<Option<i64>, WalkerError> {
        let client = &self.client;
        let conversation = &self.conversation;
        let attempt = retry_rate_limited(
            self.config.rate_limit_ceiling,
            None,
            conversation,
            &mut self.stats,
            move || client.fetch_latest_message(conversation),
        )
        .await?;

        let upper_bound = match attempt {
            Attempt::Done(latest) => latest
                .map(|message| message.message_id)
                .filter(|id| *id > 0),
            Attempt::Failed(error) => return Err(WalkerError::UpperBound(error)),
        };
        self.plan = Some(plan_windows(
            upper_bound.unwrap_or_default(),
            self.config.window_size,
        ));
        debug!(conversation = %self.conversation, ?upper_bound, "resolved traversal upper bound");
        Ok(upper_bound)
    }

    /// Fetches the next window, skipping windows that fail with errors other
    /// than rate limits. Returns `None` once the origin has been reached.
    pub async fn next_batch(&mut self) -> Result<Option<WindowBatch>, WalkerError> {
        if self.plan.is_none() {
            self.resolve_upper_bound().await?;
        }

        loop {
            let Some(window) = self.plan.as_mut().and_then(Iterator::next) else {
                return Ok(None);
            };
            let ids = window.ids();
            let ids = ids.as_slice();
            let client = &self.client;
            let conversation = &self.conversation;
            let attempt = retry_rate_limited(
                self.config.rate_limit_ceiling,
                Some(window),
                conversation,
                &mut self.stats,
                move || client.fetch_messages_by_ids(conversation, ids),
            )
            .await?;

            match attempt {
                Attempt::Done(messages) => {
                    self.stats.windows_walked = self.stats.windows_walked.saturating_add(1);
                    return Ok(Some(WindowBatch { window, messages }));
                }
                Attempt::Failed(error) => {
                    self.stats.windows_abandoned = self.stats.windows_abandoned.saturating_add(1);
                    warn!(
                        conversation = %self.conversation,
                        window_high = window.high,
                        window_low = window.low,
                        backoff_ms = self.config.error_backoff.as_millis() as u64,
                        error = %error,
                        "abandoning window after fetch error"
                    );
                    sleep(self.config.error_backoff).await;
                }
            }
        }
    }
}

async fn retry_rate_limited<T, F, Fut>(
    ceiling: Duration,
    window: Option<Window>,
    conversation: &ConversationRef,
    stats: &mut WalkerStats,
    mut operation: F,
) -> Result<Attempt<T>, WalkerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PlatformError>>,
{
    let mut waited = Duration::ZERO;
    loop {
        match operation().await {
            Ok(value) => return Ok(Attempt::Done(value)),
            Err(error) => {
                let Some(wait) = error.rate_limit_wait() else {
                    return Ok(Attempt::Failed(error));
                };
                let requested_total = waited.saturating_add(wait);
                if requested_total > ceiling {
                    return Err(WalkerError::Stalled {
                        window,
                        requested_total,
                        ceiling,
                    });
                }
                warn!(
                    conversation = %conversation,
                    window_high = window.map(|window| window.high),
                    retry_after_ms = wait.as_millis() as u64,
                    "rate limited while traversing; waiting before retrying"
                );
                stats.rate_limit_waits = stats.rate_limit_waits.saturating_add(1);
                sleep(wait).await;
                waited = requested_total;
            }
        }
    }
}
