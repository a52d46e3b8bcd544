//! Polling vendor state until it settles.
//!
//! Most vendor APIs accept a request and finish the work asynchronously. A
//! [`WaitFor`] polls a refresh function until the reported status reaches one
//! of the target states, failing on unexpected states, on non-transient
//! errors, on timeout or on cancellation.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::classify::{classify, ErrorKind};
use crate::context::OperationContext;
use crate::error::ProviderError;
use crate::schema::format_duration;

/// Synthetic state reported when the refresh function gets a 404.
pub const DELETED: &str = "DELETED";

/// Exponential backoff with a ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    /// Start at `initial` and double up to `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// The delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next.min(self.max);
        self.next = (self.next * 2).min(self.max);
        delay
    }

    /// Go back to the initial delay.
    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(10))
    }
}

/// What to poll for and how often.
///
/// ```ignore
/// let zone = WaitFor::new(&["PENDING"], &["ACTIVE"])
///     .with_delay(Duration::from_secs(2))
///     .wait(&ctx, "DNS zone to become ACTIVE", || async {
///         let zone = client.get_zone(&id).await?;
///         Ok((zone.clone(), zone.status))
///     })
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct WaitFor {
    pending: Vec<String>,
    target: Vec<String>,
    delay: Duration,
    min_interval: Duration,
    poll_interval: Option<Duration>,
    timeout: Option<Duration>,
    transient_grace: u32,
}

impl WaitFor {
    /// Wait while the state is in `pending` until it is in `target`.
    pub fn new(pending: &[&str], target: &[&str]) -> Self {
        Self {
            pending: pending.iter().map(|s| s.to_string()).collect(),
            target: target.iter().map(|s| s.to_string()).collect(),
            delay: Duration::ZERO,
            min_interval: Duration::ZERO,
            poll_interval: None,
            timeout: None,
            transient_grace: 5,
        }
    }

    /// Wait for the object to disappear.
    pub fn deleted(pending: &[&str]) -> Self {
        Self::new(pending, &[DELETED])
    }

    /// Time before the first refresh.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Lower bound between two refreshes.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Fixed interval between refreshes instead of exponential backoff.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Bound the wait below the operation deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// How many consecutive transient refresh errors are tolerated.
    pub fn with_transient_grace(mut self, attempts: u32) -> Self {
        self.transient_grace = attempts;
        self
    }

    fn is_target(&self, state: &str) -> bool {
        self.target.iter().any(|s| s == state)
    }

    fn is_pending(&self, state: &str) -> bool {
        self.pending.iter().any(|s| s == state)
    }

    /// Poll `refresh` until it reports a target state.
    ///
    /// `refresh` returns the current object and its state tag. A not-found
    /// error becomes the [`DELETED`] state with no object. Returns the object
    /// observed in the target state.
    pub async fn wait<T, F, Fut>(
        &self,
        ctx: &OperationContext,
        what: &str,
        mut refresh: F,
    ) -> Result<Option<T>, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(T, String), ProviderError>>,
    {
        let ctx = match self.timeout {
            Some(timeout) => ctx.child(timeout),
            None => ctx.clone(),
        };
        let mut backoff = Backoff::default();
        let mut transient_errors = 0u32;
        let mut last_state = String::new();

        if !self.delay.is_zero() {
            ctx.sleep(self.delay)
                .await
                .map_err(|e| self.interrupted(&ctx, e, &last_state, what))?;
        }

        loop {
            ctx.check()
                .map_err(|e| self.interrupted(&ctx, e, &last_state, what))?;

            let observed = match ctx.run(refresh()).await {
                Ok((value, state)) => Some((Some(value), state)),
                Err(err) if is_interrupt(&err) => {
                    return Err(self.interrupted(&ctx, err, &last_state, what));
                },
                Err(err) => match classify(&err) {
                    ErrorKind::NotFound => Some((None, DELETED.to_string())),
                    ErrorKind::Transient if transient_errors < self.transient_grace => {
                        transient_errors += 1;
                        debug!(what, transient_errors, error = %err, "transient refresh error");
                        None
                    },
                    _ => return Err(err),
                },
            };

            if let Some((value, state)) = observed {
                transient_errors = 0;
                if state != last_state {
                    debug!(what, state = %state, "observed state");
                    last_state = state;
                }
                if self.is_target(&last_state) {
                    return Ok(value);
                }
                if !self.is_pending(&last_state) {
                    return Err(ProviderError::UnexpectedState {
                        state: last_state,
                        target: self.target.join(", "),
                    });
                }
            }

            let wait = self
                .poll_interval
                .unwrap_or_else(|| backoff.next_delay())
                .max(self.min_interval);
            ctx.sleep(wait)
                .await
                .map_err(|e| self.interrupted(&ctx, e, &last_state, what))?;
        }
    }

    fn interrupted(
        &self,
        ctx: &OperationContext,
        err: ProviderError,
        last_state: &str,
        what: &str,
    ) -> ProviderError {
        match err {
            ProviderError::DeadlineExceeded(_) => {
                let last = if last_state.is_empty() {
                    "none".to_string()
                } else {
                    format!("'{}'", last_state)
                };
                ProviderError::DeadlineExceeded(format!(
                    "timeout while waiting for {} (last state: {}, timeout: {})",
                    what,
                    last,
                    format_duration(ctx.timeout())
                ))
            },
            other => other,
        }
    }
}

fn is_interrupt(err: &ProviderError) -> bool {
    matches!(err, ProviderError::DeadlineExceeded(_) | ProviderError::Cancelled(_))
}
