//! rowpipe - drive bounded record pipes from the command line
//!
//! Streams synthetic result sets through a producer/consumer pipe loop,
//! for tuning capacity, batch size and stall budgets against a sink.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "rowpipe")]
#[command(about = "Stream record sets through bounded producer/consumer pipes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./rowpipe.toml or ~/.config/rowpipe/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// No-progress budget in seconds for a run
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Stream rows into an NDJSON file
    Export(cmd::export::ExportArgs),
    /// Stream rows into per-field statistics
    Stats(cmd::stats::StatsArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(rowpipe_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug  (progress bars show activity)
    //   non-TTY: info unless --debug          (logs are the only progress indicator)
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = is_tty && !cli.debug;
    rowpipe_core::init_logging(rowpipe_core::Verbosity::from_flags(quiet, cli.debug), multi)?;

    let mut config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };
    if cli.timeout_secs.is_some() {
        config.run_loop.timeout_secs = cli.timeout_secs;
    }

    match cli.command {
        Command::Export(args) => cmd::export::run(args, &config, &progress),
        Command::Stats(args) => cmd::stats::run(args, &config, &progress),
        Command::Config => {
            use comfy_table::{
                Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
            };

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);

            table.add_row(vec![
                "Output directory",
                &config.output.default_dir.display().to_string(),
            ]);
            table.add_row(vec!["Pipe capacity", &config.pipe.capacity.to_string()]);
            table.add_row(vec!["Batch size", &config.pipe.batch_size.to_string()]);
            table.add_row(vec![
                "Stall timeout",
                &format!("{}ms", config.pipe.max_wait_ms),
            ]);
            table.add_row(vec![
                "Poll interval",
                &format!("{}ms", config.pipe.poll_interval_ms),
            ]);
            table.add_row(vec![
                "Run timeout",
                &config
                    .run_loop
                    .timeout_secs
                    .map_or_else(|| "none".to_string(), |s| format!("{s}s")),
            ]);
            table.add_row(vec![
                "Consumer backoff",
                &format!(
                    "{}..{}ms",
                    config.run_loop.min_sleep_ms, config.run_loop.max_sleep_ms
                ),
            ]);

            eprintln!("\n{table}");
            Ok(())
        }
    }
}
