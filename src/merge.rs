//! K-way merge of per-run trace files into one globally time-ordered view.
//!
//! Input files are individually (mostly) time-ordered; analysis wants the
//! union in ascending event time without concatenating and re-sorting. The
//! index is a binary min-heap holding one entry per record of the flat
//! collection, drained record by record.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::sched_event::SchedEvent;

/// Heap key: event time first, ties broken by ascending task id and then
/// buffer position so equal-time records (typically the timeless name and
/// param records) still drain in one deterministic total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct MergeKey {
    time: u64,
    pid: u16,
    index: u32,
}

pub struct MergeIndex {
    heap: BinaryHeap<Reverse<MergeKey>>,
}

impl MergeIndex {
    /// Build the index over every record of the flat collection.
    pub fn build(records: &[SchedEvent]) -> MergeIndex {
        let heap = records
            .iter()
            .enumerate()
            .map(|(index, rec)| {
                Reverse(MergeKey {
                    time: rec.event_time(),
                    pid: rec.hdr.pid,
                    index: index as u32,
                })
            })
            .collect();
        MergeIndex { heap }
    }

    /// Remove and return the index of the globally earliest remaining
    /// record; `None` once drained.
    pub fn take_next(&mut self) -> Option<u32> {
        self.heap.pop().map(|Reverse(key)| key.index)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
