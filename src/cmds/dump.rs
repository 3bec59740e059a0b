use std::io::{self, Write};
use std::mem;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use rttrace::mapping;
use rttrace::record::{self, TraceRecord};

#[derive(Debug, Args)]
pub struct DumpOpts {
    /// Raw capture file
    pub file: PathBuf,
}

pub fn run(opts: &DumpOpts) -> Result<()> {
    let records = mapping::load_records(&opts.file)?;
    let mut out = io::stdout().lock();

    writeln!(out, "record size: {} bytes", mem::size_of::<TraceRecord>())?;
    writeln!(
        out,
        "layout: stamp:48 pid:16 | seq:32 | cpu:8 | event:8 | class:2 irq:1 irq_count:5"
    )?;
    for rec in &records {
        let name = record::event_name(rec.event).unwrap_or("?");
        writeln!(
            out,
            "event:{:3} ({name}) seq:{} cpu:{} pid:{} class:{} stamp:{}{}",
            rec.event,
            rec.seq_no,
            rec.cpu,
            rec.pid(),
            rec.class().as_str(),
            rec.stamp(),
            if rec.irq_flag() {
                format!(" irq:{}", rec.irq_count())
            } else {
                String::new()
            }
        )?;
    }
    Ok(())
}
