//! Stats subcommand - aggregate field statistics from a streamed run

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use rowpipe_core::{FieldStats, SharedProgress, drain_at_most, fmt_num};

use super::common::PipeArgs;
use super::source::SyntheticSource;
use crate::config::Config;

#[derive(Args, Debug)]
pub struct StatsArgs {
    #[command(flatten)]
    pub pipe: PipeArgs,
}

pub fn run(args: StatsArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let stats = collect(&args.pipe, config, progress)?;
    eprintln!("\n{}", render(&stats));
    Ok(())
}

pub fn collect(
    args: &PipeArgs,
    config: &Config,
    progress: &SharedProgress,
) -> Result<FieldStats> {
    let pipe = args.build_pipe(config)?;
    let pipe_loop = args.build_loop(config, "stats");
    let source = SyntheticSource::new(args.rows, args.repeat);
    let pb = progress.run_bar("stats", args.expected_rows());

    let mut stats = FieldStats::new();
    let delay = args.consumer_delay();
    let limit = pipe_loop.config().record_limit;
    let mut drain = drain_at_most(pipe.as_ref(), limit, |record| {
        stats.observe(&record);
        Ok(())
    });
    pipe_loop.run_shared(
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
    Ok(stats)
}

fn render(stats: &FieldStats) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Field").fg(Color::Cyan),
            Cell::new("Non-null").fg(Color::Cyan),
            Cell::new("Fill").fg(Color::Cyan),
            Cell::new("Types").fg(Color::Cyan),
        ]);

    for (name, stat) in stats.fields() {
        let types = stat
            .types
            .iter()
            .map(|(t, n)| format!("{t}: {}", fmt_num(*n)))
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            name.to_string(),
            fmt_num(stat.non_null),
            format!("{:.1}%", stats.fill_rate(name) * 100.0),
            types,
        ]);
    }
    table.add_row(vec![
        "(records)".to_string(),
        fmt_num(stats.records()),
        String::new(),
        String::new(),
    ]);
    table
}
