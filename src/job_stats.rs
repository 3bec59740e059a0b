//! Per-job statistics over demultiplexed task chains.
//!
//! For every release record the matching completion is searched a bounded
//! number of completion hops ahead in the same chain; jobs whose completion
//! is not found within the bound are silently skipped. All times are
//! nanoseconds as recorded.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::sched_event::{EventKind, SchedEvent};
use crate::tasks::TaskSet;

/// Completion records inspected per release before the job is given up on.
/// Bounds the chain walk when completions went missing.
pub const MAX_COMPLETION_HOPS: usize = 20;

/// Task selection and gating options.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub pid: Option<u16>,
    pub name: Option<String>,
    /// Period in nanoseconds.
    pub period: Option<u64>,
    /// Skip jobs released before the task-system release instant. Requires
    /// a system release record in the trace.
    pub after_release: bool,
}

/// Statistics for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRow {
    pub pid: u16,
    pub job: u32,
    pub period: u64,
    pub response: u64,
    pub deadline_miss: bool,
    pub lateness: i64,
    pub tardiness: u64,
    pub forced: bool,
    pub exec_time: u64,
    pub preemptions: u32,
    pub migrations: u32,
}

/// One task with its parameters and per-job rows.
#[derive(Debug, Serialize)]
pub struct TaskJobs {
    pub pid: u16,
    pub name: String,
    pub wcet: u64,
    pub period: u64,
    pub partition: Option<u8>,
    pub jobs: Vec<JobRow>,
}

/// Compute job statistics for every task passing the filter.
pub fn collect(set: &TaskSet, filter: &JobFilter) -> Result<Vec<TaskJobs>> {
    let sys_release = if filter.after_release {
        match set.find_sys_event(EventKind::SysRelease) {
            Some(rec) => Some(rec.sys_release().1),
            None => bail!("could not find task system release time"),
        }
    } else {
        None
    };

    let mut out = Vec::new();
    for task in set.tasks() {
        if filter.pid.is_some_and(|pid| pid != task.pid) {
            continue;
        }
        if filter.name.as_deref().is_some_and(|n| n != set.name_of(task)) {
            continue;
        }
        if filter.period.is_some_and(|p| p != set.period_of(task)) {
            continue;
        }

        let chain: Vec<&SchedEvent> = set.chain(task).collect();
        let mut jobs = Vec::new();
        for (pos, rec) in chain.iter().enumerate() {
            if rec.kind() != Some(EventKind::Release) {
                continue;
            }
            let (release, _) = rec.release();
            if sys_release.is_some_and(|sr| release < sr) {
                continue;
            }
            if let Some(completed) = find_completion(&chain, pos, rec.hdr.job) {
                jobs.push(job_row(set.period_of(task), &chain, pos, completed));
            }
        }

        out.push(TaskJobs {
            pid: task.pid,
            name: set.name_of(task),
            wcet: set.wcet_of(task),
            period: set.period_of(task),
            partition: set.partition_of(task),
            jobs,
        });
    }
    Ok(out)
}

/// Find the completion of the job released at `chain[release_pos]`,
/// checking at most [`MAX_COMPLETION_HOPS`] completion records ahead.
fn find_completion(chain: &[&SchedEvent], release_pos: usize, job: u32) -> Option<usize> {
    let mut hops = 0;
    let mut pos = release_pos + 1;
    while hops < MAX_COMPLETION_HOPS {
        let completed = chain[pos..]
            .iter()
            .position(|r| r.kind() == Some(EventKind::Completion))?
            + pos;
        if chain[completed].hdr.job == job {
            return Some(completed);
        }
        pos = completed + 1;
        hops += 1;
    }
    None
}

fn job_row(period: u64, chain: &[&SchedEvent], release_pos: usize, completion_pos: usize) -> JobRow {
    let release_rec = chain[release_pos];
    let (release, deadline) = release_rec.release();
    let completion = chain[completion_pos].completion();

    let response = completion.when.saturating_sub(release);
    let lateness = completion.when as i64 - deadline as i64;
    let (preemptions, migrations) =
        count_preemptions(&chain[release_pos..completion_pos], release_rec.hdr.job);

    JobRow {
        pid: release_rec.hdr.pid,
        job: release_rec.hdr.job,
        period,
        response,
        deadline_miss: lateness > 0,
        lateness,
        tardiness: lateness.max(0) as u64,
        forced: completion.forced,
        exec_time: completion.exec_time,
        preemptions,
        migrations,
    }
}

/// Count scheduler switch-away -> switch-to transitions for one job, and
/// how many of them changed cpu.
fn count_preemptions(span: &[&SchedEvent], job: u32) -> (u32, u32) {
    let mut preemptions = 0;
    let mut migrations = 0;
    let mut switched_away = false;
    let mut last_cpu = 0u8;

    for rec in span {
        if rec.hdr.job != job {
            continue;
        }
        match rec.kind() {
            Some(EventKind::SwitchAway) => {
                switched_away = true;
                last_cpu = rec.hdr.cpu;
            }
            Some(EventKind::SwitchTo) if switched_away => {
                preemptions += 1;
                if rec.hdr.cpu != last_cpu {
                    migrations += 1;
                }
            }
            _ => {}
        }
    }
    (preemptions, migrations)
}
