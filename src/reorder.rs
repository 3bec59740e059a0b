//! Sequence reconciliation: repairing write-order violations in a capture
//! buffer.
//!
//! Multiple cpus write into one shared buffer without synchronizing, so a
//! record can land a few slots away from where its global sequence number
//! says it belongs. The buffer is almost sorted; inversions are local and
//! bounded by the contention window. Repair is a pure permutation plus
//! selective sentinel invalidation over one mutable slice. It never adds or
//! removes records and is best-effort throughout: anything unrepairable is
//! counted and left in place.
//!
//! Callers must have exclusive access to the buffer for the duration of a
//! repair pass; the repaired slice can be shared freely afterwards.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::record::{event_id, is_cross_cpu, TraceRecord};

/// How far ahead of the current position a displaced record is searched for.
pub const LOOK_AHEAD: usize = 1024;

/// Out-of-range sequence numbers tolerated during one look-ahead scan before
/// the search gives up. Guards against scanning deep into garbage after a
/// counter wrap.
const MAX_OUT_OF_RANGE: u32 = 64;

/// Wrap-safe distance bound for a sequence number to count as "near" the
/// expected one.
const SEQ_IN_RANGE: u32 = 16 * LOOK_AHEAD as u32;

/// Per-run reconciliation counters. The diagnostic surface of a repair pass;
/// none of these conditions is fatal.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReorderStats {
    /// Records in the buffer.
    pub total: u64,
    /// Displaced records moved back to their sequence position.
    pub reordered: u64,
    /// Positions where the expected sequence number was not found in the
    /// look-ahead window.
    pub holes: u64,
    /// Records invalidated by the per-cpu timestamp trend check.
    pub non_monotonic: u64,
    /// Relocations abandoned because they would have reordered a same-cpu or
    /// same-task stream.
    pub aborted_moves: u64,
    /// Latency observations invalidated as physically impossible.
    pub implausible: u64,
}

impl fmt::Display for ReorderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total         : {:10}", self.total)?;
        writeln!(f, "Holes         : {:10}", self.holes)?;
        writeln!(f, "Reordered     : {:10}", self.reordered)?;
        writeln!(f, "Non-monotonic : {:10}", self.non_monotonic)?;
        writeln!(f, "Aborted moves : {:10}", self.aborted_moves)?;
        write!(f, "Implausible   : {:10}", self.implausible)
    }
}

/// Configuration for one reconciliation run.
#[derive(Debug, Default, Clone)]
pub struct Reorderer {
    /// Cycle-counter rate. Supplying it enables the implausible-latency
    /// filter, which needs to compare cycle spans against nanosecond
    /// latency values.
    pub cycles_per_ns: Option<f64>,
}

impl Reorderer {
    pub fn new() -> Reorderer {
        Reorderer::default()
    }

    /// Run all repair phases over `buf` in place and return the counters.
    pub fn run(&self, buf: &mut [TraceRecord]) -> ReorderStats {
        let mut stats = ReorderStats {
            total: buf.len() as u64,
            ..ReorderStats::default()
        };
        mark_timestamp_spikes(buf, &mut stats);
        repair_sequence(buf, &mut stats);
        if let Some(rate) = self.cycles_per_ns {
            filter_implausible_latencies(buf, rate, &mut stats);
        }
        stats
    }
}

/// Convenience wrapper for the common no-filter case.
pub fn reorder(buf: &mut [TraceRecord]) -> ReorderStats {
    Reorderer::new().run(buf)
}

#[derive(Default)]
struct CpuTrend {
    // last two accepted samples: (stamp, buffer index), oldest first
    prev: Option<(u64, usize)>,
    last: Option<(u64, usize)>,
}

/// Phase 1: per-cpu timestamp trend check.
///
/// A sample whose stamp jumps ahead of the one that follows it on the same
/// cpu cannot be trusted; it was disturbed while being taken. Such spikes
/// are invalidated in place, never relocated. This pass only inspects.
fn mark_timestamp_spikes(buf: &mut [TraceRecord], stats: &mut ReorderStats) {
    let mut trends: HashMap<u8, CpuTrend> = HashMap::new();

    for idx in 0..buf.len() {
        let rec = buf[idx];
        if !rec.is_valid() || is_cross_cpu(rec.event) {
            continue;
        }
        let stamp = rec.stamp();
        let trend = trends.entry(rec.cpu).or_default();
        match (trend.prev, trend.last) {
            (Some((p2, _)), Some((p1, last_idx))) if p2 < p1 && p2 < stamp && p1 >= stamp => {
                // p1 overshot: ...p2 < stamp <= p1 means p1 is out of trend
                tracing::debug!(
                    cpu = rec.cpu,
                    index = last_idx,
                    stamp = p1,
                    "invalidating out-of-trend timestamp"
                );
                buf[last_idx].invalidate();
                stats.non_monotonic += 1;
                trend.last = Some((stamp, idx));
            }
            _ => {
                trend.prev = trend.last;
                trend.last = Some((stamp, idx));
            }
        }
    }
}

enum Candidate {
    /// The expected sequence number, at this index.
    Exact(usize),
    /// No exact match; the in-range record closest to the expected number.
    Closest(usize),
    None,
}

/// Scan the look-ahead window starting at `pos` for the record carrying
/// `expected`. Distances are computed with wrapping arithmetic so a counter
/// wrap inside the window does not confuse the search.
fn find_expected(buf: &[TraceRecord], pos: usize, expected: u32) -> Candidate {
    let end = buf.len().min(pos + LOOK_AHEAD);
    let mut best: Option<(usize, u32)> = None;
    let mut misses = 0u32;

    for (idx, rec) in buf[pos..end].iter().enumerate() {
        if rec.seq_no == expected {
            return Candidate::Exact(pos + idx);
        }
        let dist = rec.seq_no.wrapping_sub(expected);
        if dist < SEQ_IN_RANGE {
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((pos + idx, dist));
            }
        } else {
            misses += 1;
            if misses > MAX_OUT_OF_RANGE {
                break;
            }
        }
    }
    match best {
        Some((idx, _)) => Candidate::Closest(idx),
        None => Candidate::None,
    }
}

/// A relocation is safe only if it does not jump the candidate over another
/// record of the same cpu or the same task: those streams are individually
/// causally ordered. Cross-cpu signal events are exempt; they carry the cpu
/// they concern, not the cpu that recorded them.
fn move_is_safe(buf: &[TraceRecord], pos: usize, cand: usize) -> bool {
    let candidate = &buf[cand];
    if is_cross_cpu(candidate.event) {
        return true;
    }
    let pid = candidate.pid();
    for rec in &buf[pos..cand] {
        if !rec.is_valid() {
            continue;
        }
        if rec.cpu == candidate.cpu {
            return false;
        }
        if pid != 0 && rec.pid() == pid {
            return false;
        }
    }
    true
}

/// Shift the candidate back into `pos`, moving everything in between one
/// slot forward. Stable for the guarded region.
fn shift_back(buf: &mut [TraceRecord], pos: usize, cand: usize) {
    buf[pos..=cand].rotate_right(1);
}

/// Phase 2: hole detection and repair.
///
/// Walks the buffer expecting each record to carry the previous sequence
/// number plus one. On a mismatch the displaced record is searched for in a
/// bounded window and, if the sequentiality guard allows, shifted back into
/// place.
fn repair_sequence(buf: &mut [TraceRecord], stats: &mut ReorderStats) {
    let mut last_seqno: Option<u32> = None;

    for pos in 0..buf.len() {
        if let Some(last) = last_seqno {
            let expected = last.wrapping_add(1);
            if buf[pos].seq_no != expected {
                match find_expected(buf, pos, expected) {
                    Candidate::Exact(cand) => {
                        if move_is_safe(buf, pos, cand) {
                            shift_back(buf, pos, cand);
                            stats.reordered += 1;
                        } else {
                            tracing::debug!(
                                position = pos,
                                candidate = cand,
                                "relocation would break causal order; leaving hole"
                            );
                            stats.aborted_moves += 1;
                            stats.holes += 1;
                        }
                    }
                    Candidate::Closest(cand) => {
                        // No exact match in the window: a genuine hole. The
                        // nearest in-range record still moves up so scanning
                        // resumes on locally sorted data.
                        tracing::debug!(
                            position = pos,
                            found = buf[cand].seq_no,
                            expected,
                            "unrepaired sequence hole"
                        );
                        stats.holes += 1;
                        if cand != pos {
                            if move_is_safe(buf, pos, cand) {
                                shift_back(buf, pos, cand);
                            } else {
                                stats.aborted_moves += 1;
                            }
                        }
                    }
                    Candidate::None => {
                        stats.holes += 1;
                    }
                }
            }
        }
        last_seqno = Some(buf[pos].seq_no);
    }
}

/// Phase 3: implausible release-latency filter.
///
/// A release-latency observation can never exceed the longest span the cpu
/// spent non-preemptable around it; larger values indicate measurement
/// disturbance and are invalidated. The bound is taken from the enclosing
/// scheduler-entry/exit marker pair on the same cpu. Records with no
/// enclosing section are left alone.
fn filter_implausible_latencies(buf: &mut [TraceRecord], cycles_per_ns: f64, stats: &mut ReorderStats) {
    let mut np_entry: HashMap<u8, u64> = HashMap::new();

    for idx in 0..buf.len() {
        let rec = buf[idx];
        match rec.event {
            event_id::SCHED_START | event_id::SCHED2_START => {
                np_entry.insert(rec.cpu, rec.stamp());
            }
            event_id::RELEASE_LATENCY | event_id::TIMER_LATENCY => {
                let Some(&entered) = np_entry.get(&rec.cpu) else {
                    continue;
                };
                let Some(span_cycles) = np_exit_span(&buf[idx + 1..], rec.cpu, entered) else {
                    continue;
                };
                let bound_ns = span_cycles as f64 / cycles_per_ns;
                if rec.stamp() as f64 > bound_ns {
                    tracing::debug!(
                        cpu = rec.cpu,
                        latency_ns = rec.stamp(),
                        bound_ns,
                        "invalidating implausible latency observation"
                    );
                    buf[idx].invalidate();
                    stats.implausible += 1;
                }
            }
            _ => {}
        }
    }
}

fn np_exit_span(rest: &[TraceRecord], cpu: u8, entered: u64) -> Option<u64> {
    for rec in rest.iter().take(LOOK_AHEAD) {
        if rec.cpu == cpu && matches!(rec.event, event_id::SCHED_END | event_id::SCHED2_END) {
            return rec.stamp().checked_sub(entered);
        }
    }
    None
}
