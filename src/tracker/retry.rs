//! Retry with exponential backoff for tracker calls
//!
//! Reads are retried on any transient failure. Writes are only retried when the
//! tracker explicitly rejected the request (rate limiting), because a write that
//! timed out or hit a 5xx may already have been applied remotely.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_retries: u32,

    /// Initial backoff duration
    pub initial_backoff: Duration,

    /// Maximum backoff duration, also caps tracker-provided retry-after hints
    pub max_backoff: Duration,

    /// Backoff multiplier
    pub multiplier: f64,

    /// Add up to 25% random jitter
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Short backoff, used by tests and interactive commands
    pub fn quick() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Calculate backoff duration for a given attempt (0-based)
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff.as_secs_f64());

        let secs = if self.jitter {
            capped * (1.0 + jitter_fraction() * 0.25)
        } else {
            capped
        };

        Duration::from_secs_f64(secs)
    }
}

/// Pseudo-random value in [0.0, 1.0) taken from the clock's sub-second nanos
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

/// Retry classification for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Transient failure, retry with backoff
    Retry,
    /// The remote asked us to wait this long
    RetryAfter(Duration),
    /// Permanent failure
    NoRetry,
}

/// Trait for errors that can indicate whether to retry
pub trait RetryableError {
    fn retry_decision(&self) -> RetryDecision;
}

/// Whether a call may safely be repeated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Read,
    Write,
}

impl CallKind {
    fn allows(&self, decision: RetryDecision) -> bool {
        match (self, decision) {
            (_, RetryDecision::NoRetry) => false,
            (CallKind::Read, _) => true,
            (CallKind::Write, RetryDecision::RetryAfter(_)) => true,
            (CallKind::Write, RetryDecision::Retry) => false,
        }
    }
}

/// Execute an async call with retry logic
///
/// Returns the first success, or the last error once retries are exhausted or
/// the error is not retryable for this `kind` of call.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    kind: CallKind,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        let err = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        let decision = err.retry_decision();
        if !kind.allows(decision) {
            debug!(
                operation = operation_name,
                attempt = attempt,
                ?kind,
                "Not retrying: {}",
                err
            );
            return Err(err);
        }

        if attempt >= config.max_retries {
            warn!(
                operation = operation_name,
                attempts = attempt + 1,
                "Giving up after {} attempts: {}",
                attempt + 1,
                err
            );
            return Err(err);
        }

        let backoff = match decision {
            RetryDecision::RetryAfter(d) => d.min(config.max_backoff),
            _ => config.backoff_duration(attempt),
        };

        warn!(
            operation = operation_name,
            attempt = attempt + 1,
            max_attempts = config.max_retries + 1,
            backoff_secs = backoff.as_secs_f64(),
            "Retrying after error: {}",
            err
        );

        sleep(backoff).await;
        attempt += 1;
    }
}
