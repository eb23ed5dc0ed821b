//! Bounded retry with a pluggable delay strategy.
//!
//! The delay strategy is injected so unit tests can run with zero delays
//! instead of mocking timers.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

/// Linear backoff: `base × attempt` after the Nth failed attempt.
pub fn linear_backoff(base: Duration) -> impl Fn(u32) -> Duration {
    move |attempt| base.saturating_mul(attempt)
}

/// Run `op` up to `max_attempts` times. Success on any attempt
/// short-circuits; between attempts, sleep `delay_for(attempt_number)`. Only
/// the last attempt's error is surfaced.
pub async fn retry_with_backoff<T, F, Fut, D>(
    label: &str,
    max_attempts: u32,
    delay_for: D,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    D: Fn(u32) -> Duration,
{
    let max_attempts = max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match op().await {
            Ok(val) => return Ok(val),
            Err(err) => {
                if attempt >= max_attempts {
                    return Err(err);
                }
                let backoff = delay_for(attempt);
                warn!(
                    label,
                    attempt,
                    max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "attempt failed; backing off before retry"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
    unreachable!("retry loop returns on every path")
}
