//! Per-operation deadline and cancellation.
//!
//! Every lifecycle callback receives an [`OperationContext`]. Waits, retries
//! and HTTP calls made on its behalf stop when the deadline passes or the host
//! cancels the operation, whichever comes first.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;

/// Upper bound for contexts that are not tied to a resource timeout.
const UNBOUNDED: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Deadline plus cancellation signal for one operation.
#[derive(Debug, Clone)]
pub struct OperationContext {
    deadline: Instant,
    timeout: Duration,
    cancel: CancellationToken,
}

impl OperationContext {
    /// A context that expires `timeout` from now.
    pub fn new(timeout: Duration) -> Self {
        Self::with_token(timeout, CancellationToken::new())
    }

    /// A context that expires `timeout` from now and is cancelled with `cancel`.
    pub fn with_token(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            timeout,
            cancel,
        }
    }

    /// A context with no practical deadline.
    pub fn background() -> Self {
        Self::new(UNBOUNDED)
    }

    /// A child context whose deadline never exceeds the parent's.
    ///
    /// Cancelling the parent cancels the child, not the other way round.
    pub fn child(&self, timeout: Duration) -> Self {
        let deadline = self.deadline.min(Instant::now() + timeout);
        Self {
            deadline,
            timeout: timeout.min(self.timeout),
            cancel: self.cancel.child_token(),
        }
    }

    /// The instant after which the operation must stop.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// The timeout the context was created with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Cancel this context and its children.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the host cancelled the operation.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The underlying cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Error if the context is already done.
    pub fn check(&self) -> Result<(), ProviderError> {
        if self.is_cancelled() {
            return Err(self.cancelled_error());
        }
        if self.is_expired() {
            return Err(self.deadline_error());
        }
        Ok(())
    }

    /// Sleep for `duration`, returning early with an error on cancellation or
    /// when the deadline falls inside the sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ProviderError> {
        let wake = Instant::now() + duration;
        let until = wake.min(self.deadline);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.cancelled_error()),
            _ = tokio::time::sleep_until(until) => {
                if until < wake {
                    Err(self.deadline_error())
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Drive `fut` to completion unless the context finishes first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.cancelled_error()),
            _ = tokio::time::sleep_until(self.deadline) => Err(self.deadline_error()),
            result = fut => result,
        }
    }

    pub(crate) fn deadline_error(&self) -> ProviderError {
        ProviderError::DeadlineExceeded(format!(
            "timeout after {}",
            crate::schema::format_duration(self.timeout)
        ))
    }

    pub(crate) fn cancelled_error(&self) -> ProviderError {
        ProviderError::Cancelled("operation cancelled by host".to_string())
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::background()
    }
}
