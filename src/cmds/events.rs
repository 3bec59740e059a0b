use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;

use rttrace::mapping;
use rttrace::merge::MergeIndex;
use rttrace::EventKind;

#[derive(Debug, Args)]
pub struct EventsOpts {
    /// Structured per-run trace files
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Print the number of loaded records
    #[arg(short = 'c', long)]
    pub count: bool,

    /// Find the task-system release instant and exit
    #[arg(short = 'r', long)]
    pub release: bool,

    /// With --release: fall back to the first nonzero event time if no
    /// system release record exists
    #[arg(short = 'f', long)]
    pub first_nonzero: bool,
}

pub fn run(opts: &EventsOpts) -> Result<()> {
    let records = mapping::load_event_files(&opts.files)?;
    if opts.count {
        println!("Loaded {} events.", records.len());
    }

    let mut index = MergeIndex::build(&records);
    let mut out = io::stdout().lock();
    let mut first_nonzero = None;

    while let Some(idx) = index.take_next() {
        let rec = &records[idx as usize];
        let time = rec.event_time();
        if time != 0 && first_nonzero.is_none() {
            first_nonzero = Some(time);
        }
        if opts.release {
            if rec.kind() == Some(EventKind::SysRelease) {
                println!("{:.2}ms", rec.sys_release().1 as f64 / 1_000_000.0);
                return Ok(());
            }
        } else {
            writeln!(out, "[{:10}] {}", time / 1_000_000, rec.describe())?;
        }
    }

    if opts.release {
        match (opts.first_nonzero, first_nonzero) {
            (true, Some(time)) => println!("{:.2}ms", time as f64 / 1_000_000.0),
            _ => bail!("could not find task system release time"),
        }
    }
    Ok(())
}
