//! Arguments and pipe assembly shared by the run subcommands

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use rowpipe_core::{BufferedPipe, DistinctPipe, Pipe, PipeLoop, RecordPipe, UniqueKey};

use crate::config::Config;

#[derive(Args, Debug, Clone)]
pub struct PipeArgs {
    /// Number of synthetic rows to produce
    #[arg(long, default_value_t = 100_000)]
    pub rows: usize,

    /// Emit each id this many times in a row
    #[arg(long, default_value_t = 1)]
    pub repeat: usize,

    /// Pipe capacity in records
    #[arg(long)]
    pub capacity: Option<usize>,

    /// Producer-side batch size (1 disables buffering)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Field making up the uniqueness key (repeatable)
    #[arg(long = "distinct-field")]
    pub distinct_fields: Vec<String>,

    /// Give up when the pipe stays full this long
    #[arg(long)]
    pub max_wait_ms: Option<u64>,

    /// Stop after consuming this many records
    #[arg(long)]
    pub limit: Option<usize>,

    /// Artificial delay per consumer call (simulates a slow sink)
    #[arg(long, default_value_t = 0)]
    pub consumer_delay_ms: u64,
}

impl PipeArgs {
    /// Bounded pipe, wrapped in buffering and dedup decorators as requested
    pub fn build_pipe(&self, config: &Config) -> Result<Arc<dyn Pipe>> {
        let mut pipe_config = config.pipe.pipe_config();
        if let Some(capacity) = self.capacity {
            pipe_config.capacity = capacity;
        }
        if let Some(ms) = self.max_wait_ms {
            pipe_config.max_wait = Duration::from_millis(ms);
        }

        let mut pipe: Box<dyn Pipe> = Box::new(RecordPipe::new(pipe_config)?);

        let batch_size = self.batch_size.unwrap_or(config.pipe.batch_size);
        if batch_size > 1 {
            pipe = Box::new(BufferedPipe::with_batch_size(pipe, batch_size));
        }
        if !self.distinct_fields.is_empty() {
            let key = UniqueKey::new(self.distinct_fields.iter().cloned());
            pipe = Box::new(DistinctPipe::new(pipe, key));
        }
        log::debug!(
            "pipe: capacity {}, batch size {batch_size}, distinct on {:?}",
            pipe_config.capacity,
            self.distinct_fields
        );
        Ok(Arc::from(pipe))
    }

    pub fn build_loop(&self, config: &Config, label: &str) -> PipeLoop {
        let mut loop_config = config.run_loop.loop_config(label);
        if self.limit.is_some() {
            loop_config.record_limit = self.limit;
        }
        PipeLoop::with_config(loop_config)
    }

    /// Expected consumed count, when it can be known up front
    pub fn expected_rows(&self) -> Option<u64> {
        if !self.distinct_fields.is_empty() {
            return None;
        }
        let rows = self.limit.map_or(self.rows, |l| l.min(self.rows));
        Some(rows as u64)
    }

    pub fn consumer_delay(&self) -> Option<Duration> {
        (self.consumer_delay_ms > 0).then(|| Duration::from_millis(self.consumer_delay_ms))
    }
}
