//! Batching decorator: holds records locally and forwards them in batches

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::DEFAULT_BATCH_SIZE;
use crate::error::PipeError;
use crate::pipe::Pipe;
use crate::record::Record;

/// Pipe decorator that accumulates records and forwards them to the wrapped
/// pipe one batch at a time, paying the inner pipe's locking and
/// backpressure cost once per `batch_size` records.
///
/// Records are invisible to the consumer until a batch fills or
/// [`final_flush`](Pipe::final_flush) runs. The flush must happen on the
/// producer's thread: [`PipeLoop`](crate::PipeLoop) does this after the
/// producer returns.
pub struct BufferedPipe<P> {
    inner: P,
    pending: Mutex<Vec<Record>>,
    batch_size: usize,
}

impl<P: Pipe> BufferedPipe<P> {
    pub fn new(inner: P) -> Self {
        Self::with_batch_size(inner, DEFAULT_BATCH_SIZE)
    }

    /// A `batch_size` of 0 is treated as 1 (forward every record)
    pub fn with_batch_size(inner: P, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            inner,
            pending: Mutex::new(Vec::with_capacity(batch_size)),
            batch_size,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Records held locally, not yet visible to the consumer
    pub fn pending_len(&self) -> usize {
        self.lock().len()
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Record>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forward the pending list if it reached the threshold.
    ///
    /// The pending lock is held across the forward so batches from the same
    /// decorator can never interleave out of order.
    fn push(&self, records: impl IntoIterator<Item = Record>) -> Result<(), PipeError> {
        let mut pending = self.lock();
        for record in records {
            pending.push(record);
            if pending.len() >= self.batch_size {
                let batch = std::mem::replace(&mut *pending, Vec::with_capacity(self.batch_size));
                self.inner.add_records(batch)?;
            }
        }
        Ok(())
    }
}

impl<P: Pipe> Pipe for BufferedPipe<P> {
    fn add_record(&self, record: Record) -> Result<(), PipeError> {
        self.push(std::iter::once(record))
    }

    fn add_records(&self, records: Vec<Record>) -> Result<(), PipeError> {
        self.push(records)
    }

    fn consume_available_records(&self) -> Vec<Record> {
        self.inner.consume_available_records()
    }

    fn count_available_records(&self) -> usize {
        self.inner.count_available_records()
    }

    fn total_record_count(&self) -> usize {
        self.inner.total_record_count()
    }

    fn final_flush(&self) -> Result<(), PipeError> {
        let batch = std::mem::take(&mut *self.lock());
        if !batch.is_empty() {
            log::debug!("final flush of {} buffered records", batch.len());
            self.inner.add_records(batch)?;
        }
        self.inner.final_flush()
    }

    fn terminate(&self) {
        self.inner.terminate()
    }

    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}
