//! The event pairing engine: matching start records to their ends.
//!
//! End ids are the start id plus one. Scheduler-range ids pair on the cpu
//! that recorded them; task-range ids pair on the task id and may span cpus
//! and self-suspensions; latency-range ids are single observations carrying
//! their value in the stamp field.
//!
//! The input may still contain unrepaired holes and sentinel-invalidated
//! records; searches abort on holes and skip invalidated records. Every
//! start record resolves to exactly one outcome counter.

use anyhow::Result;
use serde::Serialize;

use crate::record::{event_id, is_single, is_task_paired, TaskClass, TraceRecord};
use crate::sink::SampleSink;

/// Default budget of unexpected same-stream records tolerated between a
/// start and its end when interleaving is permitted.
pub const DEFAULT_MAX_INTERLEAVED: u32 = 3;

/// Matching configuration for one extraction run over one event id.
#[derive(Debug, Clone)]
pub struct PairingConfig {
    /// Start id of the interval of interest (or the single-sample id).
    pub event: u8,
    /// Permit unrelated same-stream records between start and end.
    pub allow_interleaving: bool,
    /// Skipped-record budget per start when interleaving is permitted.
    pub max_interleaved: u32,
    /// Restrict matching to this cpu.
    pub only_cpu: Option<u8>,
    /// Discard starts recorded on this cpu.
    pub avoid_cpu: Option<u8>,
    /// Keep pairs where neither endpoint belongs to a real-time task.
    pub include_best_effort: bool,
    /// Discard observations longer than this many cycles.
    pub threshold: Option<u64>,
    /// Keep pairs disturbed by interrupts instead of counting them out.
    pub keep_interrupted: bool,
    /// Seeing this id during a search breaks the pair. Defaults to the
    /// start id itself (a repeated start means the end was lost).
    pub stop_id: Option<u8>,
}

impl PairingConfig {
    pub fn new(event: u8) -> PairingConfig {
        PairingConfig {
            event,
            allow_interleaving: false,
            max_interleaved: DEFAULT_MAX_INTERLEAVED,
            only_cpu: None,
            avoid_cpu: None,
            include_best_effort: false,
            threshold: None,
            keep_interrupted: false,
            stop_id: None,
        }
    }
}

/// Mutually exclusive outcome counters plus the interleave tally.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PairingStats {
    /// Records in the buffer.
    pub total: u64,
    /// Leading records before the first end of the requested id; excluded
    /// from matching so a truncated leading pair cannot produce garbage.
    pub skipped: u64,
    /// Starts discarded by the cpu filters.
    pub avoided: u64,
    /// Pairs (or singles) emitted.
    pub complete: u64,
    /// Starts whose end was never found (broken stream, lost end, hole).
    pub incomplete: u64,
    /// Pairs discarded because neither endpoint was a real-time task.
    pub non_rt: u64,
    /// Observations discarded by the duration threshold.
    pub filtered: u64,
    /// Intermediate same-stream records skipped across all matches.
    pub interleaved: u64,
    /// Searches abandoned because of interrupt disturbance.
    pub interrupted: u64,
}

impl std::fmt::Display for PairingStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Total       : {:10}", self.total)?;
        writeln!(f, "Skipped     : {:10}", self.skipped)?;
        writeln!(f, "Avoided     : {:10}", self.avoided)?;
        writeln!(f, "Complete    : {:10}", self.complete)?;
        writeln!(f, "Incomplete  : {:10}", self.incomplete)?;
        writeln!(f, "Non RT      : {:10}", self.non_rt)?;
        writeln!(f, "Filtered    : {:10}", self.filtered)?;
        writeln!(f, "Interleaved : {:10}", self.interleaved)?;
        write!(f, "Interrupted : {:10}", self.interrupted)
    }
}

enum Match {
    Found { end: usize, skips: u32, duration: u64 },
    Incomplete,
    Interrupted,
}

/// One extraction run over an ordered record buffer.
pub struct PairFinder<'a> {
    buf: &'a [TraceRecord],
    cfg: PairingConfig,
}

impl<'a> PairFinder<'a> {
    pub fn new(buf: &'a [TraceRecord], cfg: PairingConfig) -> PairFinder<'a> {
        PairFinder { buf, cfg }
    }

    /// Walk the buffer, match every start of the configured id, and emit
    /// surviving observations into `sink`.
    pub fn extract(&self, sink: &mut dyn SampleSink) -> Result<PairingStats> {
        let mut stats = PairingStats {
            total: self.buf.len() as u64,
            ..PairingStats::default()
        };
        if is_single(self.cfg.event) {
            self.extract_singles(sink, &mut stats)?;
        } else {
            self.extract_pairs(sink, &mut stats)?;
        }
        Ok(stats)
    }

    fn cpu_filtered(&self, rec: &TraceRecord) -> bool {
        if let Some(cpu) = self.cfg.only_cpu {
            if rec.cpu != cpu {
                return true;
            }
        }
        self.cfg.avoid_cpu == Some(rec.cpu)
    }

    fn extract_singles(&self, sink: &mut dyn SampleSink, stats: &mut PairingStats) -> Result<()> {
        for rec in self.buf {
            if rec.event != self.cfg.event {
                continue;
            }
            if self.cpu_filtered(rec) {
                stats.avoided += 1;
            } else if rec.irq_flag() && !self.cfg.keep_interrupted {
                stats.interrupted += 1;
            } else if self.cfg.threshold.is_some_and(|t| rec.stamp() > t) {
                stats.filtered += 1;
            } else {
                sink.single(rec.stamp())?;
                stats.complete += 1;
            }
        }
        Ok(())
    }

    fn extract_pairs(&self, sink: &mut dyn SampleSink, stats: &mut PairingStats) -> Result<()> {
        let end_id = self.cfg.event.wrapping_add(1);
        // align past a possibly truncated leading pair
        let Some(first_end) = self.buf.iter().position(|r| r.event == end_id) else {
            stats.skipped = self.buf.len() as u64;
            return Ok(());
        };
        stats.skipped = first_end as u64;

        for start in first_end..self.buf.len() {
            let rec = &self.buf[start];
            if rec.event != self.cfg.event {
                continue;
            }
            if self.cpu_filtered(rec) {
                stats.avoided += 1;
                continue;
            }
            let matched = if is_task_paired(self.cfg.event) {
                self.find_end_by_task(start)
            } else {
                self.find_end_by_cpu(start)
            };
            match matched {
                Match::Found { end, skips, duration } => {
                    stats.interleaved += u64::from(skips);
                    let end_rec = &self.buf[end];
                    if self.cfg.threshold.is_some_and(|t| duration > t) {
                        stats.filtered += 1;
                    } else if !self.cfg.include_best_effort
                        && rec.class() != TaskClass::RealTime
                        && end_rec.class() != TaskClass::RealTime
                    {
                        stats.non_rt += 1;
                    } else {
                        sink.pair(rec.stamp(), end_rec.stamp(), duration)?;
                        stats.complete += 1;
                    }
                }
                Match::Incomplete => stats.incomplete += 1,
                Match::Interrupted => stats.interrupted += 1,
            }
        }
        Ok(())
    }

    /// True if the end sample was disturbed by interrupt handling between
    /// the two endpoints.
    fn disturbed(&self, start: &TraceRecord, end: &TraceRecord) -> bool {
        end.irq_flag() || end.irq_count() != start.irq_count()
    }

    fn find_end_by_cpu(&self, start: usize) -> Match {
        let s = &self.buf[start];
        let stop_id = self.cfg.stop_id.unwrap_or(s.event);
        let mut prev_seq = s.seq_no;
        let mut skips = 0u32;
        let mut seen_irq = false;

        for (off, rec) in self.buf[start + 1..].iter().enumerate() {
            if rec.seq_no != prev_seq.wrapping_add(1) {
                // hole in the global write order: the stream is broken here
                return if seen_irq { Match::Interrupted } else { Match::Incomplete };
            }
            prev_seq = rec.seq_no;
            if !rec.is_valid() {
                continue;
            }
            if rec.cpu != s.cpu {
                continue;
            }
            seen_irq |= rec.irq_flag();
            if rec.completes_on_cpu(s) {
                if self.disturbed(s, rec) && !self.cfg.keep_interrupted {
                    return Match::Interrupted;
                }
                return Match::Found {
                    end: start + 1 + off,
                    skips,
                    duration: rec.stamp().wrapping_sub(s.stamp()),
                };
            }
            if rec.event == stop_id {
                return Match::Incomplete;
            }
            if self.cfg.allow_interleaving && skips < self.cfg.max_interleaved {
                skips += 1;
                continue;
            }
            return Match::Incomplete;
        }
        Match::Incomplete
    }

    fn find_end_by_task(&self, start: usize) -> Match {
        let s = &self.buf[start];
        let pid = s.pid();
        let end_id = s.event.wrapping_add(1);
        let stop_id = self.cfg.stop_id.unwrap_or(s.event);
        let may_suspend = s.event >= event_id::SUSPENSION_MIN;

        let mut prev_seq = s.seq_no;
        let mut skips = 0u32;
        let mut seen_irq = false;
        // execution time accumulates in segments around self-suspensions
        let mut exec: u64 = 0;
        let mut seg_begin = s.stamp();
        let mut suspended = false;

        for (off, rec) in self.buf[start + 1..].iter().enumerate() {
            if rec.seq_no != prev_seq.wrapping_add(1) {
                return if seen_irq { Match::Interrupted } else { Match::Incomplete };
            }
            prev_seq = rec.seq_no;
            if !rec.is_valid() {
                continue;
            }
            if rec.cpu == s.cpu {
                seen_irq |= rec.irq_flag();
            }
            if rec.pid() != pid {
                continue;
            }
            match rec.event {
                event_id::LOCK_SUSPEND if may_suspend => {
                    if !suspended {
                        if rec.stamp() < seg_begin {
                            return Match::Incomplete;
                        }
                        exec += rec.stamp() - seg_begin;
                        suspended = true;
                    }
                }
                event_id::LOCK_RESUME if may_suspend => {
                    if suspended {
                        seg_begin = rec.stamp();
                        suspended = false;
                    }
                }
                // the scheduler switching the task out and back in while it
                // is suspended is expected, not interleaving
                event_id::SCHED_START
                | event_id::SCHED_END
                | event_id::SCHED2_START
                | event_id::SCHED2_END
                | event_id::CXS_START
                | event_id::CXS_END
                    if suspended => {}
                e if e == end_id => {
                    if self.disturbed(s, rec) && !self.cfg.keep_interrupted {
                        return Match::Interrupted;
                    }
                    if suspended || rec.stamp() < seg_begin {
                        return Match::Incomplete;
                    }
                    let duration = if may_suspend {
                        exec + (rec.stamp() - seg_begin)
                    } else {
                        rec.stamp() - s.stamp()
                    };
                    return Match::Found {
                        end: start + 1 + off,
                        skips,
                        duration,
                    };
                }
                e if e == stop_id => return Match::Incomplete,
                _ => {
                    if self.cfg.allow_interleaving && skips < self.cfg.max_interleaved {
                        skips += 1;
                    } else {
                        return Match::Incomplete;
                    }
                }
            }
        }
        Match::Incomplete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{CsvSink, NullSink};

    fn rt(event: u8, seq: u32, cpu: u8, pid: u16, stamp: u64) -> TraceRecord {
        TraceRecord::new(event, seq, cpu, pid, stamp).with_class(TaskClass::RealTime)
    }

    fn run(buf: &[TraceRecord], cfg: PairingConfig) -> PairingStats {
        PairFinder::new(buf, cfg)
            .extract(&mut NullSink)
            .expect("null sink cannot fail")
    }

    /// Alternating start/end pairs on one cpu; the canonical clean input.
    fn clean_pairs(n: u32) -> Vec<TraceRecord> {
        let mut buf = Vec::new();
        for i in 0..n {
            buf.push(rt(event_id::SCHED_START, 2 * i, 0, 1, u64::from(i) * 1000 + 100));
            buf.push(rt(event_id::SCHED_END, 2 * i + 1, 0, 1, u64::from(i) * 1000 + 400));
        }
        buf
    }

    #[test]
    fn test_clean_input_pairs_completely() {
        // the first pair is sacrificed to leading alignment
        let buf = clean_pairs(8);
        let stats = run(&buf, PairingConfig::new(event_id::SCHED_START));
        assert_eq!(stats.complete, 7);
        assert_eq!(stats.incomplete, 0);
        assert_eq!(stats.interleaved, 0);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn test_pairing_is_deterministic() {
        let buf = clean_pairs(5);
        let a = run(&buf, PairingConfig::new(event_id::SCHED_START));
        let b = run(&buf, PairingConfig::new(event_id::SCHED_START));
        assert_eq!(a, b);
    }

    #[test]
    fn test_csv_emission() {
        let buf = clean_pairs(2);
        let mut out = Vec::new();
        PairFinder::new(&buf, PairingConfig::new(event_id::SCHED_START))
            .extract(&mut CsvSink::new(&mut out))
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1100, 1400, 300\n");
    }

    #[test]
    fn test_missing_end_is_incomplete() {
        let mut buf = clean_pairs(3);
        buf.push(rt(event_id::SCHED_START, 6, 0, 1, 9000));
        let stats = run(&buf, PairingConfig::new(event_id::SCHED_START));
        assert_eq!(stats.complete, 2);
        assert_eq!(stats.incomplete, 1);
    }

    #[test]
    fn test_repeated_start_breaks_pair() {
        let buf = vec![
            rt(event_id::SCHED_END, 0, 0, 1, 50),
            rt(event_id::SCHED_START, 1, 0, 1, 100),
            rt(event_id::SCHED_START, 2, 0, 1, 200),
            rt(event_id::SCHED_END, 3, 0, 1, 300),
        ];
        let stats = run(&buf, PairingConfig::new(event_id::SCHED_START));
        // first start aborts on the repeated start; the second completes
        assert_eq!(stats.incomplete, 1);
        assert_eq!(stats.complete, 1);
    }

    #[test]
    fn test_interleaving_budget() {
        let buf = vec![
            rt(event_id::SCHED_END, 0, 0, 1, 50),
            rt(event_id::SCHED_START, 1, 0, 1, 100),
            rt(event_id::TICK_START, 2, 0, 1, 150),
            rt(event_id::TICK_END, 3, 0, 1, 160),
            rt(event_id::SCHED_END, 4, 0, 1, 300),
        ];
        let strict = run(&buf, PairingConfig::new(event_id::SCHED_START));
        assert_eq!(strict.complete, 0);
        assert_eq!(strict.incomplete, 1);

        let mut cfg = PairingConfig::new(event_id::SCHED_START);
        cfg.allow_interleaving = true;
        let loose = run(&buf, cfg);
        assert_eq!(loose.complete, 1);
        assert_eq!(loose.interleaved, 2);
    }

    #[test]
    fn test_configured_stop_id_breaks_pair() {
        let buf = vec![
            rt(event_id::SCHED_END, 0, 0, 1, 50),
            rt(event_id::SCHED_START, 1, 0, 1, 100),
            rt(event_id::TICK_START, 2, 0, 1, 150),
            rt(event_id::SCHED_END, 3, 0, 1, 300),
        ];
        let mut cfg = PairingConfig::new(event_id::SCHED_START);
        cfg.allow_interleaving = true;
        cfg.stop_id = Some(event_id::TICK_START);
        let stats = run(&buf, cfg);
        assert_eq!(stats.incomplete, 1);
        assert_eq!(stats.complete, 0);
    }

    #[test]
    fn test_sequence_hole_aborts_search() {
        let buf = vec![
            rt(event_id::SCHED_END, 0, 0, 1, 50),
            rt(event_id::SCHED_START, 1, 0, 1, 100),
            rt(event_id::SCHED_END, 5, 0, 1, 300),
        ];
        let stats = run(&buf, PairingConfig::new(event_id::SCHED_START));
        assert_eq!(stats.complete, 0);
        assert_eq!(stats.incomplete, 1);
    }

    #[test]
    fn test_interrupted_end_takes_precedence() {
        let buf = vec![
            rt(event_id::SCHED_END, 0, 0, 1, 50),
            rt(event_id::SCHED_START, 1, 0, 1, 100),
            rt(event_id::SCHED_END, 2, 0, 1, 300).with_irq(1),
        ];
        let stats = run(&buf, PairingConfig::new(event_id::SCHED_START));
        assert_eq!(stats.interrupted, 1);
        assert_eq!(stats.complete, 0);

        let mut cfg = PairingConfig::new(event_id::SCHED_START);
        cfg.keep_interrupted = true;
        let kept = run(&buf, cfg);
        assert_eq!(kept.interrupted, 0);
        assert_eq!(kept.complete, 1);
    }

    #[test]
    fn test_threshold_filter() {
        let buf = clean_pairs(3);
        let mut cfg = PairingConfig::new(event_id::SCHED_START);
        cfg.threshold = Some(100);
        let stats = run(&buf, cfg);
        // every pair lasts 300 cycles
        assert_eq!(stats.filtered, 2);
        assert_eq!(stats.complete, 0);
    }

    #[test]
    fn test_best_effort_pairs_are_dropped_by_default() {
        let buf = vec![
            TraceRecord::new(event_id::SCHED_END, 0, 0, 1, 50),
            TraceRecord::new(event_id::SCHED_START, 1, 0, 1, 100),
            TraceRecord::new(event_id::SCHED_END, 2, 0, 1, 300),
        ];
        let stats = run(&buf, PairingConfig::new(event_id::SCHED_START));
        assert_eq!(stats.non_rt, 1);

        let mut cfg = PairingConfig::new(event_id::SCHED_START);
        cfg.include_best_effort = true;
        let kept = run(&buf, cfg);
        assert_eq!(kept.complete, 1);
    }

    #[test]
    fn test_cpu_filters() {
        let mut buf = clean_pairs(3);
        for rec in &mut buf[2..4] {
            rec.cpu = 1;
        }
        // cpu 1 now holds one full pair; seq numbers are still global
        let mut only = PairingConfig::new(event_id::SCHED_START);
        only.only_cpu = Some(0);
        let stats = run(&buf, only);
        assert_eq!(stats.avoided, 1);

        let mut avoid = PairingConfig::new(event_id::SCHED_START);
        avoid.avoid_cpu = Some(1);
        let stats = run(&buf, avoid);
        assert_eq!(stats.avoided, 1);
    }

    #[test]
    fn test_by_task_pairing_spans_cpus() {
        let buf = vec![
            rt(event_id::SYSCALL_IN_END, 0, 0, 7, 50),
            rt(event_id::SYSCALL_IN_START, 1, 0, 7, 100),
            rt(event_id::SYSCALL_IN_END, 2, 1, 7, 260),
        ];
        let stats = run(&buf, PairingConfig::new(event_id::SYSCALL_IN_START));
        assert_eq!(stats.complete, 1);
    }

    #[test]
    fn test_self_suspension_accumulates_segments() {
        // lock acquisition with one suspension: 100..150 and 400..480 count,
        // the suspension gap and the context switches inside it do not
        let pid = 9;
        let buf = vec![
            rt(event_id::LOCK_END, 0, 0, pid, 10),
            rt(event_id::LOCK_START, 1, 0, pid, 100),
            rt(event_id::LOCK_SUSPEND, 2, 0, pid, 150),
            rt(event_id::SCHED_START, 3, 0, pid, 200),
            rt(event_id::SCHED_END, 4, 0, pid, 210),
            rt(event_id::LOCK_RESUME, 5, 0, pid, 400),
            rt(event_id::LOCK_END, 6, 0, pid, 480),
        ];
        let mut out = Vec::new();
        let stats = PairFinder::new(&buf, PairingConfig::new(event_id::LOCK_START))
            .extract(&mut CsvSink::new(&mut out))
            .unwrap();
        assert_eq!(stats.complete, 1);
        assert_eq!(String::from_utf8(out).unwrap(), "100, 480, 130\n");
    }

    #[test]
    fn test_backward_segment_boundary_is_broken() {
        let pid = 9;
        let buf = vec![
            rt(event_id::LOCK_END, 0, 0, pid, 10),
            rt(event_id::LOCK_START, 1, 0, pid, 100),
            rt(event_id::LOCK_SUSPEND, 2, 0, pid, 150),
            rt(event_id::LOCK_RESUME, 3, 0, pid, 400),
            rt(event_id::LOCK_END, 4, 0, pid, 399),
        ];
        let stats = run(&buf, PairingConfig::new(event_id::LOCK_START));
        assert_eq!(stats.complete, 0);
        assert_eq!(stats.incomplete, 1);
    }

    #[test]
    fn test_end_while_suspended_is_broken() {
        let pid = 9;
        let buf = vec![
            rt(event_id::LOCK_END, 0, 0, pid, 10),
            rt(event_id::LOCK_START, 1, 0, pid, 100),
            rt(event_id::LOCK_SUSPEND, 2, 0, pid, 150),
            rt(event_id::LOCK_END, 3, 0, pid, 300),
        ];
        let stats = run(&buf, PairingConfig::new(event_id::LOCK_START));
        assert_eq!(stats.incomplete, 1);
    }

    #[test]
    fn test_single_samples() {
        let buf = vec![
            rt(event_id::RELEASE_LATENCY, 0, 0, 0, 1500),
            rt(event_id::RELEASE_LATENCY, 1, 1, 0, 900),
            rt(event_id::RELEASE_LATENCY, 2, 0, 0, 40_000).with_irq(2),
        ];
        let mut out = Vec::new();
        let mut cfg = PairingConfig::new(event_id::RELEASE_LATENCY);
        cfg.avoid_cpu = Some(1);
        let stats = PairFinder::new(&buf, cfg)
            .extract(&mut CsvSink::new(&mut out))
            .unwrap();
        assert_eq!(stats.complete, 1);
        assert_eq!(stats.avoided, 1);
        assert_eq!(stats.interrupted, 1);
        assert_eq!(String::from_utf8(out).unwrap(), "1500\n");
    }

    #[test]
    fn test_invalidated_records_are_ignored() {
        let mut buf = clean_pairs(3);
        // invalidate an end; its start becomes incomplete, seq order intact
        buf[3].invalidate();
        let stats = run(&buf, PairingConfig::new(event_id::SCHED_START));
        assert_eq!(stats.complete, 1);
        assert_eq!(stats.incomplete, 1);
    }
}
