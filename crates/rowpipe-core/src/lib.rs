//! rowpipe core - bounded record pipes for streaming large result sets
//!
//! A producer adds records to a fixed-capacity [`RecordPipe`] (optionally
//! wrapped in [`BufferedPipe`] / [`DistinctPipe`]) while a consumer drains
//! it; [`PipeLoop`] runs the pair and owns the final-flush ordering.

pub mod buffered;
pub mod config;
pub mod distinct;
pub mod error;
pub mod logging;
pub mod pipe;
pub mod pipe_loop;
pub mod progress;
pub mod record;
pub mod sink;
pub mod stats;

// Re-exports for convenience
pub use buffered::BufferedPipe;
pub use config::{DEFAULT_BATCH_SIZE, DEFAULT_CAPACITY, LoopConfig, PipeConfig};
pub use distinct::{DistinctPipe, RecordKey, UniqueKey};
pub use error::{LoopError, PipeError, STALL_TIMEOUT_MESSAGE};
pub use logging::{ProgressAwareLogger, Verbosity, init_logging};
pub use pipe::{Pipe, PostRecordAction, RecordPipe};
pub use pipe_loop::{LoopOutcome, PipeLoop, run_pipe_loop};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use record::{Record, Value};
pub use sink::{
    NdjsonSink, cleanup_tmp_files, count_ndjson_rows, drain_at_most, drain_into,
};
pub use stats::{FieldStat, FieldStats};
