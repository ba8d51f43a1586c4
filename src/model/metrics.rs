use chrono::{DateTime, Utc};
use std::fmt;

/// Why a crawl run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The requested number of entities was fetched
    TargetReached,
    /// The server reported no more results
    StreamExhausted,
    /// The caller cancelled the run
    Cancelled,
    /// The run's time budget ran out
    DeadlineExceeded,
    /// The target was zero or negative, so nothing was requested
    NotStarted,
    /// A fatal error ended the run
    Aborted,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TargetReached => "target reached",
            Self::StreamExhausted => "stream exhausted",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline exceeded",
            Self::NotStarted => "not started",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for a single crawl run
///
/// Owned by the coordinator while the run is in progress and handed back to
/// the caller when it ends, whether it completed or aborted.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlMetrics {
    /// Entities returned by the server during this run
    pub entities_fetched: u64,

    /// Batches committed to storage
    pub batches_flushed: u64,

    /// Retries of any kind (transient, rate limit, empty page)
    pub errors_retried: u64,

    /// Pauses spent waiting for the rate-limit window to reset
    pub rate_limit_waits: u64,

    /// Rows created in storage
    pub rows_inserted: u64,

    /// Existing rows whose star count actually changed
    pub rows_updated: u64,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stop_reason: Option<StopReason>,
}

impl CrawlMetrics {
    /// Starts a new, zeroed set of metrics
    pub fn start() -> Self {
        Self {
            entities_fetched: 0,
            batches_flushed: 0,
            errors_retried: 0,
            rate_limit_waits: 0,
            rows_inserted: 0,
            rows_updated: 0,
            started_at: Utc::now(),
            finished_at: None,
            stop_reason: None,
        }
    }

    /// Records the end of the run
    pub fn finish(&mut self, reason: StopReason) {
        self.finished_at = Some(Utc::now());
        self.stop_reason = Some(reason);
    }

    /// Wall-clock duration of the run so far
    pub fn duration(&self) -> std::time::Duration {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }

    /// Entities fetched per second
    pub fn rate(&self) -> f64 {
        let secs = self.duration().as_secs_f64();
        if secs > 0.0 {
            self.entities_fetched as f64 / secs
        } else {
            0.0
        }
    }
}

impl Default for CrawlMetrics {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_start_zeroed() {
        let metrics = CrawlMetrics::start();
        assert_eq!(metrics.entities_fetched, 0);
        assert_eq!(metrics.batches_flushed, 0);
        assert_eq!(metrics.errors_retried, 0);
        assert!(metrics.finished_at.is_none());
        assert!(metrics.stop_reason.is_none());
    }

    #[test]
    fn test_finish_records_reason() {
        let mut metrics = CrawlMetrics::start();
        metrics.finish(StopReason::StreamExhausted);

        assert_eq!(metrics.stop_reason, Some(StopReason::StreamExhausted));
        let finished = metrics.finished_at.unwrap();
        assert!(finished >= metrics.started_at);
    }

    #[test]
    fn test_duration_is_frozen_after_finish() {
        let mut metrics = CrawlMetrics::start();
        metrics.finish(StopReason::TargetReached);
        let first = metrics.duration();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(metrics.duration(), first);
    }
}
