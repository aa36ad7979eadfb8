//! Bounded, retried invocation of a single unit of work.
//!
//! Every stage-executing call goes through [`invoke`] with an
//! [`ActivityOptions`]: a per-attempt timeout plus a small [`RetryPolicy`].
//! Exhaustion surfaces as [`PipelineError::ActivityExhausted`]; the owning
//! state machine decides whether that is fatal. A permanent error (see
//! [`PipelineError::is_permanent`]) ends the invocation on the spot and is
//! returned unchanged.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::{FailureKind, PipelineError, Result};

/// Upper bound on attempts accepted from configuration.
pub const MAX_ATTEMPTS_CAP: u32 = 5;

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// delay = initial_interval * attempt
    Linear,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay in milliseconds before the first retry.
    pub initial_interval_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_interval_ms: u64, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS_CAP),
            initial_interval_ms,
            backoff,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ms = match self.backoff {
            Backoff::Fixed => self.initial_interval_ms,
            Backoff::Linear => self.initial_interval_ms * u64::from(attempt.max(1)),
        };
        Duration::from_millis(ms)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.clamp(1, MAX_ATTEMPTS_CAP)
    }
}

/// Timeout and retry settings for one activity invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityOptions {
    /// Applies to each attempt, not to the whole invocation.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ActivityOptions {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self { timeout, retry }
    }
}

/// Why one attempt failed.
#[derive(Debug)]
pub enum AttemptError {
    /// Worth another attempt while the policy allows.
    Retry(FailureKind),
    /// Stop now and hand this error to the caller.
    Abort(PipelineError),
}

impl From<FailureKind> for AttemptError {
    fn from(kind: FailureKind) -> Self {
        AttemptError::Retry(kind)
    }
}

impl From<PipelineError> for AttemptError {
    fn from(err: PipelineError) -> Self {
        if err.is_permanent() {
            AttemptError::Abort(err)
        } else {
            AttemptError::Retry(FailureKind::from(err))
        }
    }
}

/// Run `work` until it succeeds or the retry policy is exhausted.
///
/// `work` is called once per attempt so each attempt gets a fresh future.
/// A timed-out attempt counts as a [`FailureKind::System`] failure.
pub async fn invoke<T, E, F, Fut>(name: &str, options: &ActivityOptions, mut work: F) -> Result<T>
where
    E: Into<AttemptError>,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let attempts = options.retry.attempts();
    let mut last_failure = FailureKind::System("activity never ran".into());

    for attempt in 1..=attempts {
        debug!(activity = name, attempt, "invoking activity");
        match timeout(options.timeout, work(attempt)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => match err.into() {
                AttemptError::Retry(kind) => last_failure = kind,
                AttemptError::Abort(err) => {
                    warn!(activity = name, attempt, error = %err, "activity failed permanently");
                    return Err(err);
                }
            },
            Err(_) => {
                last_failure = FailureKind::System(format!(
                    "timed out after {}ms",
                    options.timeout.as_millis()
                ));
            }
        }

        if attempt < attempts {
            let delay = options.retry.delay_for_attempt(attempt);
            warn!(
                activity = name,
                attempt,
                max_attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                reason = %last_failure,
                "activity attempt failed, retrying"
            );
            sleep(delay).await;
        }
    }

    Err(PipelineError::ActivityExhausted {
        activity: name.to_string(),
        attempts,
        reason: last_failure,
    })
}
