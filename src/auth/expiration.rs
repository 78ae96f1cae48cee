//! One-shot token expiration task.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tracing::debug;

/// Future run when the timer fires.
pub type ExpirationTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Owned, cancellable deferred task. At most one is outstanding: arming always
/// cancels the previous one.
#[derive(Debug, Default)]
pub struct ExpirationTimer {
    handle: Option<JoinHandle<()>>,
}

impl ExpirationTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending task and schedule `task` after `delay`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(&mut self, delay: StdDuration, task: ExpirationTask) {
        self.cancel();

        debug!("Token expiration task scheduled in {} seconds", delay.as_secs());
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detach so that re-arming from inside `task` cannot abort it.
            tokio::spawn(task);
        }));
    }

    /// Cancel the pending task, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether a task is waiting to fire.
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for ExpirationTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Delay until a token must be renewed: `expires_on - now - offset`, never negative.
pub fn renewal_delay(
    expires_on: DateTime<Utc>,
    now: DateTime<Utc>,
    offset_seconds: u64,
) -> StdDuration {
    let offset = Duration::seconds(offset_seconds.min(u64::from(u32::MAX)) as i64);
    (expires_on - now)
        .checked_sub(&offset)
        .and_then(|d| d.to_std().ok())
        .unwrap_or(StdDuration::ZERO)
}
