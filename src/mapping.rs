//! Input boundary: turning trace files into contiguous record vectors.
//!
//! The analytical passes only ever see an owned, randomly-indexable slice of
//! records. Missing, empty, or unreadable input fails the run here; nothing
//! downstream has to deal with I/O errors.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::mem;
use std::path::Path;

use anyhow::{bail, Context, Result};
use plain::Plain;

use crate::record::TraceRecord;
use crate::sched_event::SchedEvent;

fn load<T: Plain + Default>(path: &Path) -> Result<Vec<T>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("could not read trace file {}", path.display()))?;
    if bytes.is_empty() {
        bail!("empty trace file: {}", path.display());
    }
    let stride = mem::size_of::<T>();
    if bytes.len() % stride != 0 {
        tracing::warn!(
            file = %path.display(),
            trailing = bytes.len() % stride,
            "trace file ends in a partial record; ignoring trailing bytes"
        );
    }
    let mut records = Vec::with_capacity(bytes.len() / stride);
    for chunk in bytes.chunks_exact(stride) {
        let mut rec = T::default();
        plain::copy_from_bytes(&mut rec, chunk).expect("record buffer was too short");
        records.push(rec);
    }
    Ok(records)
}

fn store<T: Plain>(path: &Path, records: &[T]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("could not write trace file {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for rec in records {
        let bytes = unsafe { plain::as_bytes(rec) };
        out.write_all(bytes)?;
    }
    out.flush()?;
    Ok(())
}

/// Load a raw capture file.
pub fn load_records(path: &Path) -> Result<Vec<TraceRecord>> {
    load(path)
}

/// Write a (repaired) raw capture buffer back out.
pub fn store_records(path: &Path, records: &[TraceRecord]) -> Result<()> {
    store(path, records)
}

/// Load one structured per-run trace file.
pub fn load_events(path: &Path) -> Result<Vec<SchedEvent>> {
    load(path)
}

/// Write a structured trace file.
pub fn store_events(path: &Path, records: &[SchedEvent]) -> Result<()> {
    store(path, records)
}

/// Load several per-run trace files into the flat collection the merge
/// index is built over. Any unreadable file fails the whole run.
pub fn load_event_files(paths: &[impl AsRef<Path>]) -> Result<Vec<SchedEvent>> {
    let mut all = Vec::new();
    for path in paths {
        all.extend(load_events(path.as_ref())?);
    }
    Ok(all)
}

/// Restore host byte order on a buffer captured with the opposite
/// endianness. Applied once, up front, before any analysis runs.
pub fn restore_byte_order(records: &mut [TraceRecord]) {
    for rec in records {
        rec.set_raw_word(rec.raw_word().swap_bytes());
        rec.seq_no = rec.seq_no.swap_bytes();
    }
}
