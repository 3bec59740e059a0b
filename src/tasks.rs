//! Task discovery and per-task event chains.
//!
//! Draining the merge index demultiplexes the flat record collection into
//! one ordered chain per task plus one chain of system events. Tasks are
//! discovered lazily; the table has a fixed upper capacity and is built
//! once per run, read-only afterwards.
//!
//! Chain links live in one contiguous arena sized to the record count, so
//! threading a record into a chain never allocates on its own.

use std::collections::HashMap;

use crate::merge::MergeIndex;
use crate::sched_event::{EventKind, SchedEvent, TaskParams};

/// Upper bound on concurrently traced tasks. Overflow is recoverable:
/// records of surplus tasks are dropped with a diagnostic.
pub const MAX_TASKS: usize = 512;

#[derive(Debug, Clone, Copy)]
struct Link {
    rec: u32,
    next: Option<u32>,
}

/// One traced task: static name/param records plus the ordered chain of
/// everything else recorded for its pid.
#[derive(Debug)]
pub struct Task {
    pub pid: u16,
    name: Option<u32>,
    param: Option<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    pub event_count: u32,
}

impl Task {
    fn new(pid: u16) -> Task {
        Task {
            pid,
            name: None,
            param: None,
            head: None,
            tail: None,
            event_count: 0,
        }
    }
}

/// The demultiplexed view of one analysis run.
pub struct TaskSet {
    records: Vec<SchedEvent>,
    tasks: Vec<Task>,
    by_pid: HashMap<u16, usize>,
    links: Vec<Link>,
    sys_head: Option<u32>,
    sys_tail: Option<u32>,
    /// First nonzero event time seen in merge order.
    pub time0: u64,
    /// Records dropped because the task table was full (or a static record
    /// had no attributable task).
    pub dropped: u64,
}

impl TaskSet {
    /// Merge-drain `records` and thread them into per-task chains.
    pub fn demux(records: Vec<SchedEvent>) -> TaskSet {
        let mut set = TaskSet {
            links: Vec::with_capacity(records.len()),
            records,
            tasks: Vec::new(),
            by_pid: HashMap::new(),
            sys_head: None,
            sys_tail: None,
            time0: 0,
            dropped: 0,
        };

        let mut index = MergeIndex::build(&set.records);
        while let Some(idx) = index.take_next() {
            let rec = set.records[idx as usize];
            let time = rec.event_time();
            if set.time0 == 0 && time != 0 {
                set.time0 = time;
            }
            match rec.kind() {
                Some(EventKind::Name) => match set.task_slot(rec.hdr.pid) {
                    Some(t) => set.tasks[t].name = Some(idx),
                    None => set.drop_record(&rec),
                },
                Some(EventKind::Param) => match set.task_slot(rec.hdr.pid) {
                    Some(t) => set.tasks[t].param = Some(idx),
                    None => set.drop_record(&rec),
                },
                _ => {
                    if rec.hdr.pid == 0 {
                        let link = set.push_link(idx);
                        match set.sys_tail {
                            Some(tail) => set.links[tail as usize].next = Some(link),
                            None => set.sys_head = Some(link),
                        }
                        set.sys_tail = Some(link);
                    } else {
                        match set.task_slot(rec.hdr.pid) {
                            Some(t) => {
                                let link = set.push_link(idx);
                                match set.tasks[t].tail {
                                    Some(tail) => set.links[tail as usize].next = Some(link),
                                    None => set.tasks[t].head = Some(link),
                                }
                                set.tasks[t].tail = Some(link);
                                set.tasks[t].event_count += 1;
                            }
                            None => set.drop_record(&rec),
                        }
                    }
                }
            }
        }
        set
    }

    fn push_link(&mut self, rec: u32) -> u32 {
        self.links.push(Link { rec, next: None });
        (self.links.len() - 1) as u32
    }

    fn drop_record(&mut self, rec: &SchedEvent) {
        tracing::warn!(
            pid = rec.hdr.pid,
            kind = rec.hdr.kind,
            "dropping record: no task table slot"
        );
        self.dropped += 1;
    }

    fn task_slot(&mut self, pid: u16) -> Option<usize> {
        if pid == 0 {
            return None;
        }
        if let Some(&t) = self.by_pid.get(&pid) {
            return Some(t);
        }
        if self.tasks.len() >= MAX_TASKS {
            return None;
        }
        let t = self.tasks.len();
        self.tasks.push(Task::new(pid));
        self.by_pid.insert(pid, t);
        Some(t)
    }

    /// Tasks in discovery (merge) order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn task_by_pid(&self, pid: u16) -> Option<&Task> {
        self.by_pid.get(&pid).map(|&t| &self.tasks[t])
    }

    /// The task's event chain in merge order.
    pub fn chain(&self, task: &Task) -> EventChain<'_> {
        EventChain {
            set: self,
            cur: task.head,
        }
    }

    pub fn sys_events(&self) -> EventChain<'_> {
        EventChain {
            set: self,
            cur: self.sys_head,
        }
    }

    /// First system event of the given kind, if any.
    pub fn find_sys_event(&self, kind: EventKind) -> Option<&SchedEvent> {
        self.sys_events().find(|rec| rec.kind() == Some(kind))
    }

    pub fn name_of(&self, task: &Task) -> String {
        match task.name {
            Some(idx) => self.records[idx as usize].name(),
            None => "<unknown>".to_string(),
        }
    }

    pub fn params_of(&self, task: &Task) -> Option<TaskParams> {
        task.param.map(|idx| self.records[idx as usize].params())
    }

    /// Period in nanoseconds; 0 when no param record was seen.
    pub fn period_of(&self, task: &Task) -> u64 {
        self.params_of(task).map_or(0, |p| u64::from(p.period))
    }

    pub fn wcet_of(&self, task: &Task) -> u64 {
        self.params_of(task).map_or(0, |p| u64::from(p.wcet))
    }

    /// Assigned partition, if the task had a param record.
    pub fn partition_of(&self, task: &Task) -> Option<u8> {
        self.params_of(task).map(|p| p.partition)
    }
}

/// Forward iterator over one event chain.
#[derive(Clone)]
pub struct EventChain<'a> {
    set: &'a TaskSet,
    cur: Option<u32>,
}

impl<'a> Iterator for EventChain<'a> {
    type Item = &'a SchedEvent;

    fn next(&mut self) -> Option<&'a SchedEvent> {
        let link = self.set.links[self.cur? as usize];
        self.cur = link.next;
        Some(&self.set.records[link.rec as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_set() -> TaskSet {
        TaskSet::demux(vec![
            SchedEvent::sys_release_record(900, 1000),
            SchedEvent::name_record(0, 5, 0, "spin"),
            SchedEvent::param_record(0, 5, 0, TaskParams {
                wcet: 10,
                period: 100,
                phase: 0,
                partition: 2,
            }),
            SchedEvent::release_record(0, 5, 1, 1000, 1100),
            SchedEvent::completion_record(0, 5, 1, 1050, 40, false),
            SchedEvent::release_record(1, 6, 1, 1000, 1200),
        ])
    }

    #[test]
    fn test_demux_builds_per_task_chains() {
        let set = small_set();
        assert_eq!(set.task_count(), 2);

        let t5 = set.task_by_pid(5).unwrap();
        assert_eq!(t5.event_count, 2);
        assert_eq!(set.name_of(t5), "spin");
        assert_eq!(set.period_of(t5), 100);
        assert_eq!(set.partition_of(t5), Some(2));

        let kinds: Vec<_> = set.chain(t5).map(|r| r.kind().unwrap()).collect();
        assert_eq!(kinds, vec![EventKind::Release, EventKind::Completion]);
    }

    #[test]
    fn test_system_events_are_separate() {
        let set = small_set();
        let sys: Vec<_> = set.sys_events().collect();
        assert_eq!(sys.len(), 1);
        assert_eq!(
            set.find_sys_event(EventKind::SysRelease).unwrap().sys_release(),
            (900, 1000)
        );
        assert!(set.find_sys_event(EventKind::Completion).is_none());
    }

    #[test]
    fn test_time0_is_first_nonzero_time() {
        let set = small_set();
        assert_eq!(set.time0, 900);
    }

    #[test]
    fn test_chains_follow_merge_order_across_files() {
        // two "files": task 5's records split across them, times interleaved
        let mut records = vec![
            SchedEvent::switch_to_record(0, 5, 1, 300, 0),
            SchedEvent::switch_away_record(0, 5, 1, 900, 600),
        ];
        records.extend([
            SchedEvent::release_record(0, 5, 1, 100, 1100),
            SchedEvent::completion_record(0, 5, 1, 1000, 600, false),
        ]);
        let set = TaskSet::demux(records);
        let t = set.task_by_pid(5).unwrap();
        let times: Vec<u64> = set.chain(t).map(|r| r.event_time()).collect();
        assert_eq!(times, vec![100, 300, 900, 1000]);
    }

    #[test]
    fn test_missing_param_defaults() {
        let set = TaskSet::demux(vec![SchedEvent::release_record(0, 9, 1, 10, 20)]);
        let t = set.task_by_pid(9).unwrap();
        assert_eq!(set.name_of(t), "<unknown>");
        assert_eq!(set.period_of(t), 0);
        assert_eq!(set.partition_of(t), None);
    }

    #[test]
    fn test_last_writer_wins_for_static_records() {
        let set = TaskSet::demux(vec![
            SchedEvent::name_record(0, 5, 0, "old"),
            SchedEvent::name_record(0, 5, 1, "new"),
        ]);
        let t = set.task_by_pid(5).unwrap();
        // merge order ties break by index, so the later record wins
        assert_eq!(set.name_of(t), "new");
    }

    #[test]
    fn test_task_table_capacity_overflow_drops_records() {
        let records: Vec<_> = (1..=(MAX_TASKS as u16 + 1))
            .map(|pid| SchedEvent::release_record(0, pid, 1, u64::from(pid), u64::from(pid) + 10))
            .collect();
        let set = TaskSet::demux(records);
        assert_eq!(set.task_count(), MAX_TASKS);
        assert_eq!(set.dropped, 1);
    }

    #[test]
    fn test_static_record_for_pid_zero_is_dropped() {
        let set = TaskSet::demux(vec![SchedEvent::name_record(0, 0, 0, "kernel")]);
        assert_eq!(set.task_count(), 0);
        assert_eq!(set.dropped, 1);
    }
}
