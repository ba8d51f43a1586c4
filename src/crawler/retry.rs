//! Retry and backoff discipline around single client calls
//!
//! Failures reported by the query client fall into three classes:
//! - `Transient`: retried with exponential backoff plus jitter, bounded by
//!   `max_attempts`
//! - `RateLimited`: one sleep until the quota window resets, then one more
//!   try that does not consume an attempt
//! - `Fatal`: returned immediately
//!
//! Every sleep here races the crawl's cancellation token.

use crate::client::FetchError;
use crate::config::CrawlerConfig;
use crate::model::{CrawlMetrics, RateLimitState};
use crate::HarvestError;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Backoff and quota settings for one crawl
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts allowed for transient failures, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Ceiling for computed backoff. Server `Retry-After` hints are not capped.
    pub max_delay: Duration,

    /// Jitter as a percentage of the computed delay (0-100).
    pub jitter_pct: u8,

    /// Pause before the next request when strictly fewer than this many remain.
    pub quota_threshold: u32,

    /// Added to every wait for a quota reset to absorb clock skew.
    pub rate_limit_margin: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&CrawlerConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            jitter_pct: config.jitter_pct.min(100),
            quota_threshold: config.quota_threshold,
            rate_limit_margin: config.rate_limit_margin(),
        }
    }

    /// Delay before retry number `retry` (zero-based)
    ///
    /// `base_delay * 2^retry`, with jitter applied, never above `max_delay`.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        let computed = self.base_delay.saturating_mul(factor).min(self.max_delay);
        apply_jitter(computed, self.jitter_pct).min(self.max_delay)
    }

    /// How long to wait for the quota window described by `state` to reset
    pub fn rate_limit_wait(&self, state: &RateLimitState, now: DateTime<Utc>) -> Duration {
        state.time_until_reset(now) + self.rate_limit_margin
    }

    /// Pre-flight quota check before issuing the next request
    ///
    /// Sleeps until the window resets when the last reported quota is below
    /// the threshold and the reset is still ahead of us.
    pub async fn respect_quota(
        &self,
        state: Option<&RateLimitState>,
        metrics: &mut CrawlMetrics,
        cancel: &CancellationToken,
    ) -> Result<(), HarvestError> {
        let Some(state) = state else {
            return Ok(());
        };
        if state.remaining >= self.quota_threshold {
            return Ok(());
        }

        let now = Utc::now();
        if state.reset_at <= now {
            return Ok(());
        }

        let wait = self.rate_limit_wait(state, now);
        tracing::warn!(
            remaining = state.remaining,
            reset_at = %state.reset_at,
            "Rate limit nearly exhausted, pausing for {:.1}s",
            wait.as_secs_f64()
        );
        metrics.rate_limit_waits += 1;
        sleep_or_cancel(wait, cancel).await
    }

    /// Runs `op` until it succeeds or fails in a way that should not be retried
    ///
    /// # Returns
    ///
    /// * `Ok(T)` - The first successful result
    /// * `Err(HarvestError::Fetch)` - The client reported a fatal failure
    /// * `Err(HarvestError::RetriesExhausted)` - `max_attempts` transient failures
    /// * `Err(HarvestError::RateLimitPersisted)` - Still rate limited after waiting
    /// * `Err(HarvestError::Interrupted)` - Cancelled while waiting
    pub async fn execute<T, F, Fut>(
        &self,
        metrics: &mut CrawlMetrics,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, HarvestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut failures: u32 = 0;
        let mut waited_for_reset = false;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(HarvestError::Interrupted),
                result = op() => result,
            };

            match result {
                Ok(value) => return Ok(value),

                Err(FetchError::Fatal(message)) => return Err(HarvestError::Fetch(message)),

                Err(FetchError::RateLimited(state)) => {
                    if waited_for_reset {
                        return Err(HarvestError::RateLimitPersisted {
                            reset_at: state.reset_at,
                        });
                    }
                    waited_for_reset = true;

                    let wait = self.rate_limit_wait(&state, Utc::now());
                    tracing::warn!(
                        reset_at = %state.reset_at,
                        "Rate limit exhausted, waiting {:.1}s for reset",
                        wait.as_secs_f64()
                    );
                    metrics.errors_retried += 1;
                    metrics.rate_limit_waits += 1;
                    sleep_or_cancel(wait, cancel).await?;
                }

                Err(FetchError::Transient {
                    message,
                    retry_after,
                }) => {
                    failures += 1;
                    if failures >= self.max_attempts {
                        return Err(HarvestError::RetriesExhausted {
                            attempts: failures,
                            last: message,
                        });
                    }

                    let mut delay = self.backoff_delay(failures - 1);
                    if let Some(hint) = retry_after {
                        delay = delay.max(hint);
                    }
                    tracing::warn!(
                        attempt = failures,
                        max_attempts = self.max_attempts,
                        "Request failed: {}; retrying in {:.1}s",
                        message,
                        delay.as_secs_f64()
                    );
                    metrics.errors_retried += 1;
                    sleep_or_cancel(delay, cancel).await?;
                }
            }
        }
    }
}

/// Sleeps for `duration` unless the token fires first
pub async fn sleep_or_cancel(
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), HarvestError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HarvestError::Interrupted),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

fn apply_jitter(delay: Duration, jitter_pct: u8) -> Duration {
    if jitter_pct == 0 || delay.is_zero() {
        return delay;
    }
    let millis = delay.as_millis() as f64;
    let span = millis * f64::from(jitter_pct) / 100.0;
    let offset = rand::rng().random_range(-span..=span);
    Duration::from_millis((millis + offset).max(0.0) as u64)
}
