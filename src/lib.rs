//! rttrace library - trace repair and analysis for real-time scheduler
//! instrumentation.
//!
//! Capture buffers are written by many cpus concurrently and arrive slightly
//! out of order; structured per-run traces arrive as several files. This
//! library restores order and extracts latency and per-job statistics.
//!
//! # Modules
//!
//! - [`record`] - the fixed-size raw record model and event-id space
//! - [`mapping`] - loading trace files into record buffers
//! - [`reorder`] - sequence-number based repair of write-order violations
//! - [`pairing`] - start/end matching into latency observations
//! - [`sink`] - CSV and binary observation sinks
//! - [`sched_event`] - the structured per-task record model
//! - [`merge`] - k-way merge of per-run files into one time order
//! - [`tasks`] - task discovery and per-task event chains
//! - [`job_stats`] - per-job response/lateness/tardiness statistics
//!
//! # Example
//!
//! ```no_run
//! use rttrace::{mapping, pairing::{PairFinder, PairingConfig}, reorder, sink::CsvSink};
//! use rttrace::record::event_id;
//!
//! let mut buf = mapping::load_records(std::path::Path::new("trace.bin"))?;
//! let stats = reorder::reorder(&mut buf);
//! eprintln!("{stats}");
//!
//! let cfg = PairingConfig::new(event_id::SCHED_START);
//! let mut sink = CsvSink::new(std::io::stdout().lock());
//! let counts = PairFinder::new(&buf, cfg).extract(&mut sink)?;
//! eprintln!("{counts}");
//! # anyhow::Ok(())
//! ```

pub mod job_stats;
pub mod mapping;
pub mod merge;
pub mod pairing;
pub mod record;
pub mod reorder;
pub mod sched_event;
pub mod sink;
pub mod tasks;

// Re-export for convenience
pub use pairing::{PairFinder, PairingConfig, PairingStats};
pub use record::{TaskClass, TraceRecord};
pub use reorder::{reorder, Reorderer, ReorderStats};
pub use sched_event::{EventKind, SchedEvent};
pub use tasks::TaskSet;
