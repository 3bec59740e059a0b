//! The structured per-task trace record model.
//!
//! Structured trace files carry 24-byte records: an 8-byte header and two
//! payload words whose meaning depends on the record kind. The raw form is
//! kept byte-compatible with existing files; typed payloads are decoded at
//! the accessor boundary only.

use plain::Plain;

pub const NAME_LEN: usize = 16;

/// Record kinds. Numbering starts at one so an uninitialized record is
/// recognizable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventKind {
    Name = 1,
    Param,
    Release,
    Assigned,
    SwitchTo,
    SwitchAway,
    Completion,
    Block,
    Resume,
    Action,
    SysRelease,
    NpEnter,
    NpExit,
}

impl EventKind {
    pub fn from_raw(raw: u8) -> Option<EventKind> {
        Some(match raw {
            1 => EventKind::Name,
            2 => EventKind::Param,
            3 => EventKind::Release,
            4 => EventKind::Assigned,
            5 => EventKind::SwitchTo,
            6 => EventKind::SwitchAway,
            7 => EventKind::Completion,
            8 => EventKind::Block,
            9 => EventKind::Resume,
            10 => EventKind::Action,
            11 => EventKind::SysRelease,
            12 => EventKind::NpEnter,
            13 => EventKind::NpExit,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Name => "NAME",
            EventKind::Param => "PARAM",
            EventKind::Release => "RELEASE",
            EventKind::Assigned => "ASSIGNED",
            EventKind::SwitchTo => "SWITCH_TO",
            EventKind::SwitchAway => "SWITCH_AWAY",
            EventKind::Completion => "COMPLETION",
            EventKind::Block => "BLOCK",
            EventKind::Resume => "RESUME",
            EventKind::Action => "ACTION",
            EventKind::SysRelease => "SYS_RELEASE",
            EventKind::NpEnter => "NP_ENTER",
            EventKind::NpExit => "NP_EXIT",
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct EventHeader {
    pub kind: u8,
    pub cpu: u8,
    /// Task id; 0 marks a system event not attributable to a task.
    pub pid: u16,
    /// Job sequence number of the task at recording time.
    pub job: u32,
}

/// One structured trace record, 24 bytes on disk and in memory.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SchedEvent {
    pub hdr: EventHeader,
    data: [u64; 2],
}

unsafe impl Plain for SchedEvent {}

/// Static task parameters from a PARAM record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskParams {
    pub wcet: u32,
    pub period: u32,
    pub phase: u32,
    pub partition: u8,
}

/// Decoded COMPLETION payload. On disk `forced` shares the second payload
/// word with the execution time (bit 0 and bits 1..64 respectively).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub when: u64,
    pub forced: bool,
    pub exec_time: u64,
}

impl SchedEvent {
    fn raw(kind: EventKind, cpu: u8, pid: u16, job: u32, data: [u64; 2]) -> SchedEvent {
        SchedEvent {
            hdr: EventHeader {
                kind: kind as u8,
                cpu,
                pid,
                job,
            },
            data,
        }
    }

    pub fn name_record(cpu: u8, pid: u16, job: u32, name: &str) -> SchedEvent {
        let mut bytes = [0u8; NAME_LEN];
        let n = name.len().min(NAME_LEN - 1);
        bytes[..n].copy_from_slice(&name.as_bytes()[..n]);
        let data = [
            u64::from_ne_bytes(bytes[0..8].try_into().expect("name word")),
            u64::from_ne_bytes(bytes[8..16].try_into().expect("name word")),
        ];
        SchedEvent::raw(EventKind::Name, cpu, pid, job, data)
    }

    pub fn param_record(cpu: u8, pid: u16, job: u32, params: TaskParams) -> SchedEvent {
        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&params.wcet.to_ne_bytes());
        bytes[4..8].copy_from_slice(&params.period.to_ne_bytes());
        bytes[8..12].copy_from_slice(&params.phase.to_ne_bytes());
        bytes[12] = params.partition;
        let data = [
            u64::from_ne_bytes(bytes[0..8].try_into().expect("param word")),
            u64::from_ne_bytes(bytes[8..16].try_into().expect("param word")),
        ];
        SchedEvent::raw(EventKind::Param, cpu, pid, job, data)
    }

    pub fn release_record(cpu: u8, pid: u16, job: u32, release: u64, deadline: u64) -> SchedEvent {
        SchedEvent::raw(EventKind::Release, cpu, pid, job, [release, deadline])
    }

    pub fn switch_to_record(cpu: u8, pid: u16, job: u32, when: u64, exec_time: u32) -> SchedEvent {
        SchedEvent::raw(EventKind::SwitchTo, cpu, pid, job, [when, u64::from(exec_time)])
    }

    pub fn switch_away_record(cpu: u8, pid: u16, job: u32, when: u64, exec_time: u64) -> SchedEvent {
        SchedEvent::raw(EventKind::SwitchAway, cpu, pid, job, [when, exec_time])
    }

    pub fn completion_record(
        cpu: u8,
        pid: u16,
        job: u32,
        when: u64,
        exec_time: u64,
        forced: bool,
    ) -> SchedEvent {
        let packed = (exec_time << 1) | u64::from(forced);
        SchedEvent::raw(EventKind::Completion, cpu, pid, job, [when, packed])
    }

    pub fn block_record(cpu: u8, pid: u16, job: u32, when: u64) -> SchedEvent {
        SchedEvent::raw(EventKind::Block, cpu, pid, job, [when, 0])
    }

    pub fn resume_record(cpu: u8, pid: u16, job: u32, when: u64) -> SchedEvent {
        SchedEvent::raw(EventKind::Resume, cpu, pid, job, [when, 0])
    }

    pub fn action_record(cpu: u8, pid: u16, job: u32, when: u64, action: u8) -> SchedEvent {
        SchedEvent::raw(EventKind::Action, cpu, pid, job, [when, u64::from(action)])
    }

    pub fn sys_release_record(when: u64, release: u64) -> SchedEvent {
        SchedEvent::raw(EventKind::SysRelease, 0, 0, 0, [when, release])
    }

    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_raw(self.hdr.kind)
    }

    /// The instant this record describes, for merge ordering. Name and
    /// param records are timeless and sort to the front.
    pub fn event_time(&self) -> u64 {
        match self.kind() {
            None | Some(EventKind::Name) | Some(EventKind::Param) => 0,
            _ => self.data[0],
        }
    }

    pub fn when(&self) -> u64 {
        self.data[0]
    }

    pub fn name(&self) -> String {
        let mut bytes = [0u8; NAME_LEN];
        bytes[0..8].copy_from_slice(&self.data[0].to_ne_bytes());
        bytes[8..16].copy_from_slice(&self.data[1].to_ne_bytes());
        let len = bytes.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        String::from_utf8_lossy(&bytes[..len]).into_owned()
    }

    pub fn params(&self) -> TaskParams {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&self.data[0].to_ne_bytes());
        bytes[8..16].copy_from_slice(&self.data[1].to_ne_bytes());
        TaskParams {
            wcet: u32::from_ne_bytes(bytes[0..4].try_into().expect("param word")),
            period: u32::from_ne_bytes(bytes[4..8].try_into().expect("param word")),
            phase: u32::from_ne_bytes(bytes[8..12].try_into().expect("param word")),
            partition: bytes[12],
        }
    }

    /// (release time, absolute deadline) of a RELEASE record.
    pub fn release(&self) -> (u64, u64) {
        (self.data[0], self.data[1])
    }

    pub fn completion(&self) -> Completion {
        Completion {
            when: self.data[0],
            forced: self.data[1] & 1 != 0,
            exec_time: self.data[1] >> 1,
        }
    }

    /// Execution time reported by a SWITCH_AWAY record.
    pub fn exec_time(&self) -> u64 {
        self.data[1]
    }

    /// (when, release instant) of a SYS_RELEASE record.
    pub fn sys_release(&self) -> (u64, u64) {
        (self.data[0], self.data[1])
    }

    /// One-line human-readable rendition for trace dumps.
    pub fn describe(&self) -> String {
        let hdr = &self.hdr;
        match self.kind() {
            Some(EventKind::Name) => {
                format!("NAME        {:5}/{:<5} on CPU{} {}", hdr.pid, hdr.job, hdr.cpu, self.name())
            }
            Some(EventKind::Param) => {
                let p = self.params();
                format!(
                    "PARAM       {:5}/{:<5} on CPU{} cost={} period={} phase={} part={}",
                    hdr.pid, hdr.job, hdr.cpu, p.wcet, p.period, p.phase, p.partition
                )
            }
            Some(EventKind::Release) => {
                let (rel, dl) = self.release();
                format!(
                    "RELEASE     {:5}/{:<5} on CPU{} release={} deadline={}",
                    hdr.pid, hdr.job, hdr.cpu, rel, dl
                )
            }
            Some(EventKind::Completion) => {
                let c = self.completion();
                format!(
                    "COMPLETION  {:5}/{:<5} on CPU{} when={} exec={}{}",
                    hdr.pid,
                    hdr.job,
                    hdr.cpu,
                    c.when,
                    c.exec_time,
                    if c.forced { " forced" } else { "" }
                )
            }
            Some(EventKind::SysRelease) => {
                let (when, rel) = self.sys_release();
                format!("SYS_RELEASE             when={when} release={rel}")
            }
            Some(kind) => {
                format!(
                    "{:11} {:5}/{:<5} on CPU{} when={}",
                    kind.as_str(),
                    hdr.pid,
                    hdr.job,
                    hdr.cpu,
                    self.when()
                )
            }
            None => format!("INVALID(type={})  {:5}/{:<5}", hdr.kind, hdr.pid, hdr.job),
        }
    }
}
