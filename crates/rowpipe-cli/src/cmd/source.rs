//! Synthetic record producer standing in for a query result stream

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rowpipe_core::{Pipe, Record, Value};

const CATEGORIES: [&str; 5] = ["alpha", "beta", "gamma", "delta", "epsilon"];

/// Deterministic row generator.
///
/// Row `i` carries `id = i / repeat`, so `repeat > 1` yields runs of rows
/// sharing an id (exercises the distinct pipe).
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    pub rows: usize,
    pub repeat: usize,
    pub start: DateTime<Utc>,
}

impl SyntheticSource {
    pub fn new(rows: usize, repeat: usize) -> Self {
        Self {
            rows,
            repeat: repeat.max(1),
            start: Utc::now(),
        }
    }

    pub fn record(&self, i: usize) -> Record {
        let id = (i / self.repeat) as i64;
        let category = CATEGORIES[i % CATEGORIES.len()];
        // every 10th row has no score
        let score = (i % 10 != 0).then(|| (i % 1_000) as f64 / 10.0);
        Record::new()
            .with("id", id)
            .with("seq", i as i64)
            .with("category", category)
            .with("score", score)
            .with("active", i % 3 != 0)
            .with(
                "created_at",
                Value::DateTime(self.start + ChronoDuration::seconds(i as i64)),
            )
    }

    /// Emit every row into `pipe`, returning the number emitted
    pub fn produce<P: Pipe + ?Sized>(&self, pipe: &P) -> anyhow::Result<usize> {
        for i in 0..self.rows {
            pipe.add_record(self.record(i))?;
        }
        log::debug!("synthetic source emitted {} rows", self.rows);
        Ok(self.rows)
    }
}
