//! rttrace: repair and analyze real-time scheduler instrumentation traces.

mod cmds;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rttrace")]
#[command(about = "Repair and analyze real-time scheduler instrumentation traces")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Repair record order in a raw capture file
    Sort(cmds::sort::SortOpts),
    /// Extract paired latency observations from a raw capture file
    Csv(cmds::csv::CsvOpts),
    /// Dump the raw records of a capture file
    Dump(cmds::dump::DumpOpts),
    /// Print structured trace files in global time order
    Events(cmds::events::EventsOpts),
    /// Compute per-job statistics from structured trace files
    Jobs(cmds::jobs::JobsOpts),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Sort(opts) => cmds::sort::run(&opts),
        Commands::Csv(opts) => cmds::csv::run(&opts),
        Commands::Dump(opts) => cmds::dump::run(&opts),
        Commands::Events(opts) => cmds::events::run(&opts),
        Commands::Jobs(opts) => cmds::jobs::run(&opts),
    }
}
