use std::mem;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Args;

use rttrace::mapping;
use rttrace::record::TraceRecord;
use rttrace::Reorderer;

#[derive(Debug, Args)]
pub struct SortOpts {
    /// Raw capture file to repair
    pub file: PathBuf,

    /// Restore byte order before repairing (capture host had the opposite
    /// endianness)
    #[arg(short = 'e', long)]
    pub endian_swap: bool,

    /// Write the repaired trace here instead of back into the input file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Cycle-counter rate in cycles per nanosecond; enables the
    /// implausible-latency filter
    #[arg(long)]
    pub cycles_per_ns: Option<f64>,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(opts: &SortOpts) -> Result<()> {
    let start = Instant::now();

    let mut records = mapping::load_records(&opts.file)?;
    if opts.endian_swap {
        mapping::restore_byte_order(&mut records);
    }

    let stats = Reorderer {
        cycles_per_ns: opts.cycles_per_ns,
    }
    .run(&mut records);

    mapping::store_records(opts.output.as_ref().unwrap_or(&opts.file), &records)?;

    let elapsed = start.elapsed().as_secs_f64();
    let mib = (records.len() * mem::size_of::<TraceRecord>()) as f64 / 1024.0 / 1024.0;
    if opts.json {
        eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        eprintln!("{stats}");
        eprintln!("Size          : {mib:10.2} MiB");
        eprintln!("Time          : {elapsed:10.2} s");
        eprintln!("Throughput    : {:10.2} MiB/s", mib / elapsed.max(1e-9));
    }
    Ok(())
}
