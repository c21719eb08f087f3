// ABOUTME: Deployment-scoped deadline and cancellation signal.
// ABOUTME: Every suspension point in a run is bounded through a DeployScope.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a guarded operation stopped before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    /// The caller's own limit elapsed; the deployment budget remains.
    #[error("stage timed out")]
    StageTimeout,
    #[error("deployment deadline exceeded")]
    DeadlineExceeded,
    #[error("deployment cancelled")]
    Cancelled,
}

/// Triggers cancellation of a scope. Clones share the same signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Deadline plus cancellation shared by everything one run does.
#[derive(Debug, Clone)]
pub struct DeployScope {
    deadline: Instant,
    cancel: watch::Receiver<bool>,
}

impl DeployScope {
    /// Create a scope that expires after `budget`.
    pub fn new(budget: Duration) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let scope = Self {
            deadline: Instant::now() + budget,
            cancel: rx,
        };
        (scope, CancelHandle { tx: Arc::new(tx) })
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// `limit` capped at the remaining budget.
    pub fn bounded(&self, limit: Duration) -> Duration {
        limit.min(self.remaining())
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Set once the scope can no longer run anything.
    pub fn interrupted(&self) -> Option<Interrupted> {
        if self.is_cancelled() {
            Some(Interrupted::Cancelled)
        } else if self.remaining().is_zero() {
            Some(Interrupted::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Run `fut` until it finishes, `limit` elapses, the deadline passes,
    /// or the scope is cancelled, whichever comes first.
    pub async fn guard<F>(&self, limit: Option<Duration>, fut: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }

        let (until, cause) = match limit {
            Some(limit) if Instant::now() + limit < self.deadline => {
                (Instant::now() + limit, Interrupted::StageTimeout)
            }
            _ => (self.deadline, Interrupted::DeadlineExceeded),
        };

        let mut cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => Err(Interrupted::Cancelled),
            result = tokio::time::timeout_at(until, fut) => result.map_err(|_| cause),
        }
    }

    /// Sleep for `duration`, cut short by the deadline or cancellation.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        self.guard(None, tokio::time::sleep(duration)).await
    }
}

/// Resolves once cancellation is signalled. A dropped handle never cancels.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}
