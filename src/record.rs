//! The raw trace record model.
//!
//! A capture buffer is a flat array of fixed-size records stamped by the
//! kernel-side instrumentation. The layout is byte-compatible with existing
//! capture files, so the packed fields are kept packed and only exposed
//! through accessors.

use bitfield::bitfield;
use plain::Plain;

bitfield! {
    /// First word of a record: 48-bit cycle stamp plus the 16-bit task id of
    /// the task that was current when the sample was taken.
    #[repr(transparent)]
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct StampWord(u64);
    impl Debug;
    pub u64, stamp, set_stamp: 47, 0;
    pub u16, pid, set_pid: 63, 48;
}

bitfield! {
    /// Trailing flags byte: task class, plus interrupt bookkeeping filled in
    /// when an interrupt was serviced while the sample was being recorded.
    #[repr(transparent)]
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct RecordFlags(u8);
    impl Debug;
    pub u8, class_raw, set_class_raw: 1, 0;
    pub irq_flag, set_irq_flag: 2;
    pub u8, irq_count, set_irq_count: 7, 3;
}

/// Scheduling class of the task a record is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskClass {
    BestEffort,
    RealTime,
    Unknown,
}

impl TaskClass {
    pub fn from_raw(raw: u8) -> TaskClass {
        match raw {
            0 => TaskClass::BestEffort,
            1 => TaskClass::RealTime,
            _ => TaskClass::Unknown,
        }
    }

    fn as_raw(self) -> u8 {
        match self {
            TaskClass::BestEffort => 0,
            TaskClass::RealTime => 1,
            TaskClass::Unknown => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskClass::BestEffort => "BE",
            TaskClass::RealTime => "RT",
            TaskClass::Unknown => "UNKNOWN",
        }
    }
}

/// One fixed-size instrumentation sample, 16 bytes on disk and in memory.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TraceRecord {
    word: StampWord,
    pub seq_no: u32,
    pub cpu: u8,
    pub event: u8,
    flags: RecordFlags,
    _pad: u8,
}

unsafe impl Plain for TraceRecord {}

impl TraceRecord {
    pub fn new(event: u8, seq_no: u32, cpu: u8, pid: u16, stamp: u64) -> TraceRecord {
        let mut word = StampWord(0);
        word.set_stamp(stamp);
        word.set_pid(pid);
        TraceRecord {
            word,
            seq_no,
            cpu,
            event,
            flags: RecordFlags(0),
            _pad: 0,
        }
    }

    pub fn with_class(mut self, class: TaskClass) -> TraceRecord {
        self.flags.set_class_raw(class.as_raw());
        self
    }

    pub fn with_irq(mut self, count: u8) -> TraceRecord {
        self.flags.set_irq_flag(true);
        self.flags.set_irq_count(count & 0x1f);
        self
    }

    pub fn stamp(&self) -> u64 {
        self.word.stamp()
    }

    pub fn set_stamp(&mut self, stamp: u64) {
        self.word.set_stamp(stamp);
    }

    pub fn pid(&self) -> u16 {
        self.word.pid()
    }

    pub fn class(&self) -> TaskClass {
        TaskClass::from_raw(self.flags.class_raw())
    }

    pub fn irq_flag(&self) -> bool {
        self.flags.irq_flag()
    }

    pub fn irq_count(&self) -> u8 {
        self.flags.irq_count()
    }

    /// A sentinel-invalidated record stays in the buffer but is excluded
    /// from all further analysis.
    pub fn is_valid(&self) -> bool {
        self.event != event_id::INVALID
    }

    pub fn invalidate(&mut self) {
        self.event = event_id::INVALID;
    }

    /// Raw first word, for the byte-order restoration pass.
    pub(crate) fn raw_word(&self) -> u64 {
        self.word.0
    }

    pub(crate) fn set_raw_word(&mut self, word: u64) {
        self.word.0 = word;
    }

    /// True if `self` is the end record matching `start` in per-cpu pairing.
    pub fn completes_on_cpu(&self, start: &TraceRecord) -> bool {
        self.cpu == start.cpu && self.event == start.event.wrapping_add(1)
    }

    /// True if `self` is the end record matching `start` in per-task pairing.
    pub fn completes_for_task(&self, start: &TraceRecord) -> bool {
        self.pid() == start.pid() && self.event == start.event.wrapping_add(1)
    }
}

/// The event-id space. End ids are the matching start id plus one.
pub mod event_id {
    /// Sentinel for records excluded from analysis; below the lowest real id.
    pub const INVALID: u8 = 0;

    pub const SYSCALL_IN_START: u8 = 10;
    pub const SYSCALL_IN_END: u8 = 11;
    pub const SYSCALL_OUT_START: u8 = 20;
    pub const SYSCALL_OUT_END: u8 = 21;

    /// Task-paired ids from here on may self-suspend mid-interval.
    pub const SUSPENSION_MIN: u8 = 30;

    pub const LOCK_START: u8 = 30;
    pub const LOCK_END: u8 = 31;
    pub const READ_LOCK_START: u8 = 32;
    pub const READ_LOCK_END: u8 = 33;
    pub const LOCK_SUSPEND: u8 = 38;
    pub const LOCK_RESUME: u8 = 39;
    pub const UNLOCK_START: u8 = 40;
    pub const UNLOCK_END: u8 = 41;
    pub const READ_UNLOCK_START: u8 = 42;
    pub const READ_UNLOCK_END: u8 = 43;

    /// Ids at or below this bound carry a task id and pair per task.
    pub const TASK_PAIRED_MAX: u8 = 99;

    pub const SCHED_START: u8 = 100;
    pub const SCHED_END: u8 = 101;
    pub const SCHED2_START: u8 = 102;
    pub const SCHED2_END: u8 = 103;
    pub const CXS_START: u8 = 104;
    pub const CXS_END: u8 = 105;
    pub const RELEASE_START: u8 = 106;
    pub const RELEASE_END: u8 = 107;
    pub const XCALL_START: u8 = 108;
    pub const XCALL_END: u8 = 109;
    pub const TICK_START: u8 = 110;
    pub const TICK_END: u8 = 111;
    pub const QUANTUM_BOUNDARY_START: u8 = 112;
    pub const QUANTUM_BOUNDARY_END: u8 = 113;
    pub const SCHED_TIMER_START: u8 = 114;
    pub const SCHED_TIMER_END: u8 = 115;
    pub const PLUGIN_SCHED_START: u8 = 120;
    pub const PLUGIN_SCHED_END: u8 = 121;
    pub const PLUGIN_TICK_START: u8 = 130;
    pub const PLUGIN_TICK_END: u8 = 131;
    pub const SEND_RESCHED_START: u8 = 190;
    pub const SEND_RESCHED_END: u8 = 191;
    pub const SEND_XCALL_START: u8 = 192;
    pub const SEND_XCALL_END: u8 = 193;

    /// Ids from here on are single observations, not start/end pairs.
    pub const SINGLE_MIN: u8 = 200;

    pub const RELEASE_LATENCY: u8 = 208;
    pub const TIMER_LATENCY: u8 = 209;
}

/// Ids that pair per task id rather than per cpu.
pub fn is_task_paired(id: u8) -> bool {
    id <= event_id::TASK_PAIRED_MAX
}

/// Ids that are emitted as single samples with the measured value in the
/// stamp field.
pub fn is_single(id: u8) -> bool {
    id >= event_id::SINGLE_MIN
}

/// Ids legitimately recorded on a different cpu than the one they concern.
/// These are exempt from per-cpu ordering checks.
pub fn is_cross_cpu(id: u8) -> bool {
    matches!(
        id,
        event_id::SEND_RESCHED_END
            | event_id::SEND_XCALL_END
            | event_id::RELEASE_LATENCY
            | event_id::TIMER_LATENCY
    )
}

const EVENT_NAMES: &[(&str, u8)] = &[
    ("SYSCALL_IN_START", event_id::SYSCALL_IN_START),
    ("SYSCALL_IN_END", event_id::SYSCALL_IN_END),
    ("SYSCALL_OUT_START", event_id::SYSCALL_OUT_START),
    ("SYSCALL_OUT_END", event_id::SYSCALL_OUT_END),
    ("LOCK_START", event_id::LOCK_START),
    ("LOCK_END", event_id::LOCK_END),
    ("READ_LOCK_START", event_id::READ_LOCK_START),
    ("READ_LOCK_END", event_id::READ_LOCK_END),
    ("LOCK_SUSPEND", event_id::LOCK_SUSPEND),
    ("LOCK_RESUME", event_id::LOCK_RESUME),
    ("UNLOCK_START", event_id::UNLOCK_START),
    ("UNLOCK_END", event_id::UNLOCK_END),
    ("READ_UNLOCK_START", event_id::READ_UNLOCK_START),
    ("READ_UNLOCK_END", event_id::READ_UNLOCK_END),
    ("SCHED_START", event_id::SCHED_START),
    ("SCHED_END", event_id::SCHED_END),
    ("SCHED2_START", event_id::SCHED2_START),
    ("SCHED2_END", event_id::SCHED2_END),
    ("CXS_START", event_id::CXS_START),
    ("CXS_END", event_id::CXS_END),
    ("RELEASE_START", event_id::RELEASE_START),
    ("RELEASE_END", event_id::RELEASE_END),
    ("XCALL_START", event_id::XCALL_START),
    ("XCALL_END", event_id::XCALL_END),
    ("TICK_START", event_id::TICK_START),
    ("TICK_END", event_id::TICK_END),
    ("QUANTUM_BOUNDARY_START", event_id::QUANTUM_BOUNDARY_START),
    ("QUANTUM_BOUNDARY_END", event_id::QUANTUM_BOUNDARY_END),
    ("SCHED_TIMER_START", event_id::SCHED_TIMER_START),
    ("SCHED_TIMER_END", event_id::SCHED_TIMER_END),
    ("PLUGIN_SCHED_START", event_id::PLUGIN_SCHED_START),
    ("PLUGIN_SCHED_END", event_id::PLUGIN_SCHED_END),
    ("PLUGIN_TICK_START", event_id::PLUGIN_TICK_START),
    ("PLUGIN_TICK_END", event_id::PLUGIN_TICK_END),
    ("SEND_RESCHED_START", event_id::SEND_RESCHED_START),
    ("SEND_RESCHED_END", event_id::SEND_RESCHED_END),
    ("SEND_XCALL_START", event_id::SEND_XCALL_START),
    ("SEND_XCALL_END", event_id::SEND_XCALL_END),
    ("RELEASE_LATENCY", event_id::RELEASE_LATENCY),
    ("TIMER_LATENCY", event_id::TIMER_LATENCY),
];

/// Resolve an event name to its numeric id.
///
/// Accepts exact names ("SCHED_START"), numeric ids ("100"), and short names
/// that expand to the start id of the pair ("SCHED" -> "SCHED_START").
pub fn event_by_name(name: &str) -> Option<u8> {
    if let Some(&(_, id)) = EVENT_NAMES.iter().find(|(n, _)| *n == name) {
        return Some(id);
    }
    if let Ok(id) = name.parse::<u8>() {
        return Some(id);
    }
    let start = format!("{name}_START");
    EVENT_NAMES.iter().find(|(n, _)| *n == start).map(|&(_, id)| id)
}

pub fn event_name(id: u8) -> Option<&'static str> {
    EVENT_NAMES.iter().find(|(_, i)| *i == id).map(|&(n, _)| n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn test_record_layout_is_stable() {
        assert_eq!(mem::size_of::<TraceRecord>(), 16);
        assert_eq!(mem::align_of::<TraceRecord>(), 8);
    }

    #[test]
    fn test_packed_fields_roundtrip() {
        let rec = TraceRecord::new(event_id::SCHED_START, 7, 3, 1234, 0xdead_beef_cafe)
            .with_class(TaskClass::RealTime)
            .with_irq(5);
        assert_eq!(rec.stamp(), 0xdead_beef_cafe);
        assert_eq!(rec.pid(), 1234);
        assert_eq!(rec.class(), TaskClass::RealTime);
        assert!(rec.irq_flag());
        assert_eq!(rec.irq_count(), 5);
        assert_eq!(rec.seq_no, 7);
        assert_eq!(rec.cpu, 3);
    }

    #[test]
    fn test_stamp_is_48_bits() {
        let mut rec = TraceRecord::new(event_id::TICK_START, 0, 0, 0xffff, 0);
        rec.set_stamp(u64::MAX);
        assert_eq!(rec.stamp(), (1 << 48) - 1);
        // the task id shares the word and must survive
        assert_eq!(rec.pid(), 0xffff);
    }

    #[test]
    fn test_pairing_predicates() {
        let start = TraceRecord::new(event_id::SCHED_START, 1, 2, 10, 100);
        let end_same_cpu = TraceRecord::new(event_id::SCHED_END, 2, 2, 11, 200);
        let end_other_cpu = TraceRecord::new(event_id::SCHED_END, 2, 3, 10, 200);
        assert!(end_same_cpu.completes_on_cpu(&start));
        assert!(!end_other_cpu.completes_on_cpu(&start));
        assert!(end_other_cpu.completes_for_task(&start));
        assert!(!end_same_cpu.completes_for_task(&start));
    }

    #[test]
    fn test_invalidation() {
        let mut rec = TraceRecord::new(event_id::TICK_START, 1, 0, 0, 0);
        assert!(rec.is_valid());
        rec.invalidate();
        assert!(!rec.is_valid());
        assert_eq!(rec.seq_no, 1);
    }

    #[test]
    fn test_id_categories() {
        assert!(is_task_paired(event_id::LOCK_START));
        assert!(is_task_paired(event_id::SYSCALL_IN_START));
        assert!(!is_task_paired(event_id::SCHED_START));
        assert!(is_single(event_id::RELEASE_LATENCY));
        assert!(!is_single(event_id::SEND_XCALL_END));
        assert!(is_cross_cpu(event_id::SEND_RESCHED_END));
        assert!(!is_cross_cpu(event_id::SEND_RESCHED_START));
    }

    #[test]
    fn test_event_name_lookup() {
        assert_eq!(event_by_name("SCHED_START"), Some(event_id::SCHED_START));
        assert_eq!(event_by_name("SCHED"), Some(event_id::SCHED_START));
        assert_eq!(event_by_name("104"), Some(event_id::CXS_START));
        assert_eq!(event_by_name("NO_SUCH_EVENT"), None);
        assert_eq!(event_name(event_id::RELEASE_LATENCY), Some("RELEASE_LATENCY"));
    }
}
