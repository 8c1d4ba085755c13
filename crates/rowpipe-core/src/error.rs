//! Error types for pipes and pipe loops

use std::time::Duration;

/// Message carried by every stall timeout; callers match on it in logs.
pub const STALL_TIMEOUT_MESSAGE: &str =
    "giving up adding record to pipe, due to pipe staying full too long";

/// Error from adding records to a pipe.
#[derive(Debug)]
pub enum PipeError {
    /// Pipe stayed at capacity longer than its `max_wait` budget
    StallTimeout { capacity: usize, waited: Duration },
    /// Pipe was terminated (record limit reached or consumer gone)
    Terminated,
    /// Rejected configuration (e.g. zero capacity)
    InvalidConfig(String),
}

impl std::fmt::Display for PipeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StallTimeout { capacity, waited } => write!(
                f,
                "{STALL_TIMEOUT_MESSAGE} (capacity {capacity}, waited {}ms)",
                waited.as_millis()
            ),
            Self::Terminated => write!(f, "pipe terminated"),
            Self::InvalidConfig(msg) => write!(f, "invalid pipe config: {msg}"),
        }
    }
}

impl std::error::Error for PipeError {}

impl PipeError {
    pub fn is_stall_timeout(&self) -> bool {
        matches!(self, Self::StallTimeout { .. })
    }
}

/// Error from a producer/consumer pipe loop run.
///
/// The first error observed wins; the other side's outcome is discarded.
#[derive(Debug)]
pub enum LoopError {
    /// Producer (or its final flush) gave up on a full pipe
    StallTimeout(PipeError),
    /// Producer callable or its final flush failed
    Producer(anyhow::Error),
    /// Consumer callable failed
    Consumer(anyhow::Error),
    /// Producer thread panicked
    ProducerPanicked(String),
    /// No records consumed within the run's timeout budget
    Idle { label: String, idle: Duration },
}

impl std::fmt::Display for LoopError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StallTimeout(e) => write!(f, "{e}"),
            Self::Producer(e) => write!(f, "producer failed: {e:#}"),
            Self::Consumer(e) => write!(f, "consumer failed: {e:#}"),
            Self::ProducerPanicked(msg) => write!(f, "producer panicked: {msg}"),
            Self::Idle { label, idle } => write!(
                f,
                "{label}: producer appears to have stopped producing records (idle {}ms)",
                idle.as_millis()
            ),
        }
    }
}

impl std::error::Error for LoopError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::StallTimeout(e) => Some(e),
            Self::Producer(e) | Self::Consumer(e) => Some(&**e),
            _ => None,
        }
    }
}

impl LoopError {
    /// Classify a producer-side error, lifting stall timeouts out of `anyhow`.
    pub(crate) fn from_producer(err: anyhow::Error) -> Self {
        match err.downcast::<PipeError>() {
            Ok(e) if e.is_stall_timeout() => Self::StallTimeout(e),
            Ok(e) => Self::Producer(e.into()),
            Err(e) => Self::Producer(e),
        }
    }

    pub fn is_stall_timeout(&self) -> bool {
        matches!(self, Self::StallTimeout(_))
    }

    /// Stall timeouts and panics count as producer failures too
    pub fn is_producer_failure(&self) -> bool {
        matches!(
            self,
            Self::StallTimeout(_) | Self::Producer(_) | Self::ProducerPanicked(_)
        )
    }

    pub fn is_consumer_failure(&self) -> bool {
        matches!(self, Self::Consumer(_))
    }
}
