//! Bounded record pipe and the capability trait shared by its decorators

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::config::PipeConfig;
use crate::error::PipeError;
use crate::record::Record;

/// Add/drain/count capability shared by [`RecordPipe`] and every decorator.
///
/// One producer adds, one consumer drains; implementations synchronize
/// internally so both sides can call concurrently without external locking.
pub trait Pipe: Send + Sync {
    /// Append one record, blocking while the pipe is full
    fn add_record(&self, record: Record) -> Result<(), PipeError> {
        self.add_records(vec![record])
    }

    /// Append records in order, blocking while the pipe is full
    fn add_records(&self, records: Vec<Record>) -> Result<(), PipeError>;

    /// Take every record currently buffered (non-blocking, possibly empty)
    fn consume_available_records(&self) -> Vec<Record>;

    /// Records currently buffered and drainable
    fn count_available_records(&self) -> usize;

    /// Cumulative count of records ever accepted
    fn total_record_count(&self) -> usize;

    /// Push out anything held back by a decorator. Called once, by the
    /// producer side, after the last add.
    fn final_flush(&self) -> Result<(), PipeError> {
        Ok(())
    }

    /// Refuse further adds; wakes a producer blocked on a full pipe
    fn terminate(&self);

    fn is_terminated(&self) -> bool;
}

macro_rules! forward_pipe {
    ($($ty:ty),*) => {$(
        impl<P: Pipe + ?Sized> Pipe for $ty {
            fn add_record(&self, record: Record) -> Result<(), PipeError> {
                (**self).add_record(record)
            }
            fn add_records(&self, records: Vec<Record>) -> Result<(), PipeError> {
                (**self).add_records(records)
            }
            fn consume_available_records(&self) -> Vec<Record> {
                (**self).consume_available_records()
            }
            fn count_available_records(&self) -> usize {
                (**self).count_available_records()
            }
            fn total_record_count(&self) -> usize {
                (**self).total_record_count()
            }
            fn final_flush(&self) -> Result<(), PipeError> {
                (**self).final_flush()
            }
            fn terminate(&self) {
                (**self).terminate()
            }
            fn is_terminated(&self) -> bool {
                (**self).is_terminated()
            }
        }
    )*};
}

forward_pipe!(&P, Box<P>, Arc<P>);

/// Transform applied to every incoming batch before it is queued
pub type PostRecordAction = Box<dyn Fn(Vec<Record>) -> Vec<Record> + Send + Sync>;

/// Fixed-capacity FIFO of records.
///
/// Backpressure is a sleep/poll loop: a producer facing a full pipe sleeps
/// `poll_interval` and re-checks, giving up with
/// [`PipeError::StallTimeout`] once the pipe has accepted nothing for
/// `max_wait`. The consumer never has to signal the producer.
pub struct RecordPipe {
    queue: Mutex<VecDeque<Record>>,
    total: AtomicUsize,
    terminated: AtomicBool,
    config: PipeConfig,
    post_record_action: Option<PostRecordAction>,
}

impl std::fmt::Debug for RecordPipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordPipe")
            .field("config", &self.config)
            .field("available", &self.count_available_records())
            .field("total", &self.total_record_count())
            .finish_non_exhaustive()
    }
}

impl Default for RecordPipe {
    fn default() -> Self {
        Self::build(PipeConfig::default())
    }
}

impl RecordPipe {
    /// Create a pipe; rejects a zero capacity
    pub fn new(config: PipeConfig) -> Result<Self, PipeError> {
        if config.capacity == 0 {
            return Err(PipeError::InvalidConfig(
                "capacity must be positive".to_string(),
            ));
        }
        Ok(Self::build(config))
    }

    fn build(config: PipeConfig) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(config.capacity)),
            total: AtomicUsize::new(0),
            terminated: AtomicBool::new(false),
            config,
            post_record_action: None,
        }
    }

    /// Install a transform run on each incoming batch before queueing.
    /// Records it drops are never counted.
    pub fn with_post_record_action(
        mut self,
        action: impl Fn(Vec<Record>) -> Vec<Record> + Send + Sync + 'static,
    ) -> Self {
        self.post_record_action = Some(Box::new(action));
        self
    }

    pub fn config(&self) -> &PipeConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Record>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Pipe for RecordPipe {
    fn add_records(&self, records: Vec<Record>) -> Result<(), PipeError> {
        let records = match &self.post_record_action {
            Some(action) => action(records),
            None => records,
        };
        let mut pending = records.into_iter().peekable();
        let mut full_since: Option<Instant> = None;

        while pending.peek().is_some() {
            if self.is_terminated() {
                return Err(PipeError::Terminated);
            }

            let accepted = {
                let mut queue = self.lock();
                let before = queue.len();
                let free = self.config.capacity.saturating_sub(before);
                queue.extend(pending.by_ref().take(free));
                let accepted = queue.len() - before;
                self.total.fetch_add(accepted, Ordering::Relaxed);
                accepted
            };

            if accepted > 0 {
                if let Some(since) = full_since.take() {
                    log::debug!(
                        "pipe accepted records after waiting {}ms",
                        since.elapsed().as_millis()
                    );
                }
                continue;
            }

            let since = *full_since.get_or_insert_with(|| {
                log::debug!(
                    "pipe full ({} records), waiting for consumer",
                    self.config.capacity
                );
                Instant::now()
            });
            let waited = since.elapsed();
            if waited >= self.config.max_wait {
                log::warn!(
                    "pipe stayed full for {}ms (budget {}ms)",
                    waited.as_millis(),
                    self.config.max_wait.as_millis()
                );
                return Err(PipeError::StallTimeout {
                    capacity: self.config.capacity,
                    waited,
                });
            }
            std::thread::sleep(self.config.effective_poll_interval());
        }
        Ok(())
    }

    fn consume_available_records(&self) -> Vec<Record> {
        Vec::from(std::mem::take(&mut *self.lock()))
    }

    fn count_available_records(&self) -> usize {
        self.lock().len()
    }

    fn total_record_count(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::Relaxed);
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Relaxed)
    }
}
