//! Observation sinks.
//!
//! The pairing engine decides *what* to emit; these decide *how*. One sink
//! is selected at startup and passed down, covering both paired and
//! single-sample observations.

use std::io::{self, Write};

/// Destination for latency observations.
pub trait SampleSink {
    /// One successfully matched start/end pair. `duration` is the elapsed
    /// (or, across self-suspensions, accumulated) execution time.
    fn pair(&mut self, start: u64, end: u64, duration: u64) -> io::Result<()>;

    /// One single-sample observation.
    fn single(&mut self, value: u64) -> io::Result<()>;
}

/// Textual `start, end, duration` rows.
pub struct CsvSink<W: Write> {
    out: W,
}

impl<W: Write> CsvSink<W> {
    pub fn new(out: W) -> CsvSink<W> {
        CsvSink { out }
    }
}

impl<W: Write> SampleSink for CsvSink<W> {
    fn pair(&mut self, start: u64, end: u64, duration: u64) -> io::Result<()> {
        writeln!(self.out, "{start}, {end}, {duration}")
    }

    fn single(&mut self, value: u64) -> io::Result<()> {
        writeln!(self.out, "{value}")
    }
}

/// Raw little-endian `f32` durations, one per observation.
pub struct BinarySink<W: Write> {
    out: W,
}

impl<W: Write> BinarySink<W> {
    pub fn new(out: W) -> BinarySink<W> {
        BinarySink { out }
    }
}

impl<W: Write> SampleSink for BinarySink<W> {
    fn pair(&mut self, _start: u64, _end: u64, duration: u64) -> io::Result<()> {
        self.out.write_all(&(duration as f32).to_le_bytes())
    }

    fn single(&mut self, value: u64) -> io::Result<()> {
        self.out.write_all(&(value as f32).to_le_bytes())
    }
}

/// Discards everything; useful when only the counters matter.
#[derive(Default)]
pub struct NullSink;

impl SampleSink for NullSink {
    fn pair(&mut self, _start: u64, _end: u64, _duration: u64) -> io::Result<()> {
        Ok(())
    }

    fn single(&mut self, _value: u64) -> io::Result<()> {
        Ok(())
    }
}
