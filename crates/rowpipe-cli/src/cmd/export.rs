//! Export subcommand - stream synthetic rows through a pipe into NDJSON

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use rowpipe_core::{NdjsonSink, SharedProgress, cleanup_tmp_files, drain_at_most, fmt_num};

use super::common::PipeArgs;
use super::source::SyntheticSource;
use crate::config::Config;

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[command(flatten)]
    pub pipe: PipeArgs,

    /// Output directory (default: from config)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output file stem; writes {name}.ndjson
    #[arg(long, default_value = "export")]
    pub name: String,
}

/// Export summary
#[derive(Debug)]
pub struct ExportSummary {
    pub produced: Option<usize>,
    pub written: usize,
    pub path: PathBuf,
    pub limit_reached: bool,
    pub elapsed: std::time::Duration,
}

pub fn run(args: ExportArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let summary = export(&args, config, progress)?;

    println!();
    println!("=== Export Summary ===");
    if let Some(produced) = summary.produced {
        println!("Produced: {}", fmt_num(produced));
    }
    println!("Written: {}", fmt_num(summary.written));
    if summary.limit_reached {
        println!("Stopped at record limit");
    }
    println!("Output: {}", summary.path.display());
    println!("Time: {:.1}s", summary.elapsed.as_secs_f64());
    Ok(())
}

pub fn export(
    args: &ExportArgs,
    config: &Config,
    progress: &SharedProgress,
) -> Result<ExportSummary> {
    let output_dir = args
        .output
        .clone()
        .unwrap_or_else(|| config.output.default_dir.clone());
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    cleanup_tmp_files(&output_dir)?;

    let pipe = args.pipe.build_pipe(config)?;
    let pipe_loop = args.pipe.build_loop(config, &args.name);
    let source = SyntheticSource::new(args.pipe.rows, args.pipe.repeat);
    let delay = args.pipe.consumer_delay();

    let mut sink = NdjsonSink::new(&args.name, &output_dir)?;
    let pb = progress.run_bar(&args.name, args.pipe.expected_rows());

    let limit = pipe_loop.config().record_limit;
    let mut drain = drain_at_most(pipe.as_ref(), limit, |record| {
        sink.write_record(&record)?;
        Ok(())
    });
    let outcome = pipe_loop.run_shared(
        Arc::clone(&pipe),
        move |p| source.produce(p),
        || {
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            let n = drain()?;
            pb.inc(n as u64);
            Ok(n)
        },
    )?;
    drop(drain);
    pb.finish_and_clear();

    let path = sink.final_path().to_path_buf();
    let written = sink.finalize()?;
    log::info!("{}: wrote {} rows", args.name, fmt_num(written));

    Ok(ExportSummary {
        produced: outcome.producer,
        written,
        path,
        limit_reached: outcome.limit_reached,
        elapsed: outcome.elapsed,
    })
}
