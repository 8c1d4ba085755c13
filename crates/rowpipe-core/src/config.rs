//! Run-scoped configuration for pipes and pipe loops.
//!
//! Every knob lives on a value passed at construction, so tests can shrink
//! timeouts without touching other runs.

use std::time::Duration;

/// Default pipe capacity (records)
pub const DEFAULT_CAPACITY: usize = 1_000;

/// Default stall-timeout budget for a producer blocked on a full pipe (5 minutes)
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_millis(300_000);

/// Default sleep between capacity re-checks on a full pipe
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default batch size for [`BufferedPipe`](crate::BufferedPipe)
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Consumer backoff bounds after empty drains
pub const DEFAULT_MIN_SLEEP: Duration = Duration::from_millis(10);
pub const DEFAULT_MAX_SLEEP: Duration = Duration::from_millis(1_000);

/// Capacity and backpressure settings for a [`RecordPipe`](crate::RecordPipe)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeConfig {
    /// Maximum records buffered at once
    pub capacity: usize,
    /// Give up adding after the pipe stays full this long
    pub max_wait: Duration,
    /// Sleep between re-checks while full
    pub poll_interval: Duration,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_wait: DEFAULT_MAX_WAIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PipeConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Poll interval never exceeds the wait budget, and is never zero
    pub(crate) fn effective_poll_interval(&self) -> Duration {
        self.poll_interval
            .min(self.max_wait)
            .max(Duration::from_millis(1))
    }
}

/// Settings for one [`PipeLoop`](crate::PipeLoop) run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Diagnostics label used in log lines and errors
    pub label: String,
    /// Fail when no records arrive for this long while the producer runs
    pub timeout: Option<Duration>,
    /// Stop consuming (and terminate the pipe) after this many records
    pub record_limit: Option<usize>,
    pub min_sleep: Duration,
    pub max_sleep: Duration,
}

impl LoopConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            timeout: None,
            record_limit: None,
            min_sleep: DEFAULT_MIN_SLEEP,
            max_sleep: DEFAULT_MAX_SLEEP,
        }
    }

    /// Backoff bounds with a non-zero floor, so empty polls never busy-spin
    pub(crate) fn effective_sleep_bounds(&self) -> (Duration, Duration) {
        let min = self.min_sleep.max(Duration::from_millis(1));
        (min, self.max_sleep.max(min))
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::new("pipe-loop")
    }
}
