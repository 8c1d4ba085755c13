//! Deduplicating decorator keyed on a subset of record fields

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use rustc_hash::FxHashSet;

use crate::error::PipeError;
use crate::pipe::Pipe;
use crate::record::{Record, Value};

/// Key identifying "the same" record for deduplication
pub type RecordKey = Vec<Value>;

/// Fields whose values together identify a record.
/// Missing fields contribute [`Value::Null`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueKey {
    fields: Vec<String>,
}

impl UniqueKey {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn key_of(&self, record: &Record) -> RecordKey {
        self.fields
            .iter()
            .map(|f| record.get(f).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

type KeyFn = Box<dyn Fn(&Record) -> RecordKey + Send + Sync>;

/// Pipe decorator forwarding only the first record seen for each key.
///
/// The seen-key set grows for the life of the pipe; duplicates are dropped
/// silently. A key is only remembered once the inner pipe has accepted its
/// record.
pub struct DistinctPipe<P> {
    inner: P,
    key_fn: KeyFn,
    seen: Mutex<FxHashSet<RecordKey>>,
    discarded: AtomicUsize,
}

impl<P: Pipe> DistinctPipe<P> {
    pub fn new(inner: P, key: UniqueKey) -> Self {
        Self::with_key_fn(inner, move |r| key.key_of(r))
    }

    /// Deduplicate on an arbitrary computed key
    pub fn with_key_fn(
        inner: P,
        key_fn: impl Fn(&Record) -> RecordKey + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner,
            key_fn: Box::new(key_fn),
            seen: Mutex::new(FxHashSet::default()),
            discarded: AtomicUsize::new(0),
        }
    }

    pub fn seen_key_count(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Records dropped as duplicates so far
    pub fn discarded_count(&self) -> usize {
        self.discarded.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: Pipe> Pipe for DistinctPipe<P> {
    fn add_records(&self, records: Vec<Record>) -> Result<(), PipeError> {
        // Held across the forward so a failed batch can un-see its keys
        // before another producer checks them.
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        let mut fresh = Vec::new();
        let mut kept = Vec::with_capacity(before);
        for record in records {
            let key = (self.key_fn)(&record);
            if seen.insert(key.clone()) {
                fresh.push(key);
                kept.push(record);
            }
        }
        let dropped = before - kept.len();
        if dropped > 0 {
            self.discarded.fetch_add(dropped, Ordering::Relaxed);
        }
        if kept.is_empty() {
            return Ok(());
        }

        let result = self.inner.add_records(kept);
        if result.is_err() {
            for key in &fresh {
                seen.remove(key);
            }
        }
        result
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
        self.inner.final_flush()
    }

    fn terminate(&self) {
        self.inner.terminate()
    }

    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}
