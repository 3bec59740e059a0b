use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;

use rttrace::mapping;
use rttrace::record;
use rttrace::sink::{BinarySink, CsvSink, SampleSink};
use rttrace::{PairFinder, PairingConfig};

#[derive(Debug, Args)]
pub struct CsvOpts {
    /// Event name ("SCHED", "CXS_START"), or numeric id
    pub event: String,

    /// Raw capture file (run `sort` on it first)
    pub file: PathBuf,

    /// Emit raw little-endian f32 durations instead of CSV rows
    #[arg(short, long)]
    pub binary: bool,

    /// Write observations here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Only use samples recorded on this cpu
    #[arg(long)]
    pub only_cpu: Option<u8>,

    /// Discard samples recorded on this cpu
    #[arg(long)]
    pub avoid_cpu: Option<u8>,

    /// Keep pairs that belong to best-effort tasks
    #[arg(long)]
    pub best_effort: bool,

    /// Discard observations longer than this many cycles
    #[arg(short, long)]
    pub threshold: Option<u64>,

    /// Tolerate up to this many interleaved records between start and end
    #[arg(short, long)]
    pub interleaving: Option<u32>,

    /// Keep observations disturbed by interrupts
    #[arg(long)]
    pub keep_interrupted: bool,

    /// Print the outcome summary as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(opts: &CsvOpts) -> Result<()> {
    let Some(event) = record::event_by_name(&opts.event) else {
        bail!("unknown event: {}", opts.event);
    };

    let records = mapping::load_records(&opts.file)?;

    let mut cfg = PairingConfig::new(event);
    cfg.only_cpu = opts.only_cpu;
    cfg.avoid_cpu = opts.avoid_cpu;
    cfg.include_best_effort = opts.best_effort;
    cfg.threshold = opts.threshold;
    cfg.keep_interrupted = opts.keep_interrupted;
    if let Some(max) = opts.interleaving {
        cfg.allow_interleaving = true;
        cfg.max_interleaved = max;
    }

    let out: Box<dyn Write> = match &opts.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    };
    let mut sink: Box<dyn SampleSink> = if opts.binary {
        Box::new(BinarySink::new(out))
    } else {
        Box::new(CsvSink::new(out))
    };

    let stats = PairFinder::new(&records, cfg).extract(sink.as_mut())?;

    if opts.json {
        eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        eprintln!("{stats}");
    }
    Ok(())
}
