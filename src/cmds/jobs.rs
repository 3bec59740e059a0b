use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use rttrace::job_stats::{self, JobFilter, TaskJobs};
use rttrace::mapping;
use rttrace::TaskSet;

#[derive(Debug, Args)]
pub struct JobsOpts {
    /// Structured per-run trace files
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Skip jobs released before the task-system release
    #[arg(short = 'r', long)]
    pub after_release: bool,

    /// Report milliseconds instead of nanoseconds
    #[arg(short = 'm', long)]
    pub ms: bool,

    /// Only report the task with this pid
    #[arg(short, long)]
    pub pid: Option<u16>,

    /// Only report tasks with this name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Only report tasks with this period (in the selected unit)
    #[arg(short = 't', long)]
    pub period: Option<u64>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(opts: &JobsOpts) -> Result<()> {
    let records = mapping::load_event_files(&opts.files)?;
    let set = TaskSet::demux(records);

    let filter = JobFilter {
        pid: opts.pid,
        name: opts.name.clone(),
        // the filter compares nanoseconds as recorded
        period: opts.period.map(|p| if opts.ms { p * 1_000_000 } else { p }),
        after_release: opts.after_release,
    };
    let tasks = job_stats::collect(&set, &filter)?;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    let mut out = io::stdout().lock();
    writeln!(
        out,
        "#{:>5}, {:>5}, {:>10}, {:>10}, {:>8}, {:>10}, {:>10}, {:>7}, {:>10}, {:>12}, {:>12}",
        "Task",
        "Job",
        "Period",
        "Response",
        "DL Miss?",
        "Lateness",
        "Tardiness",
        "Forced?",
        "ACET",
        "Preemptions",
        "Migrations"
    )?;
    for task in &tasks {
        print_task(&mut out, task, opts.ms)?;
    }
    Ok(())
}

fn nano_to_ms(ns: i64) -> f64 {
    ns as f64 * 1e-6
}

fn print_task(out: &mut impl Write, task: &TaskJobs, ms: bool) -> io::Result<()> {
    let partition = task.partition.map_or(-1, i64::from);
    if ms {
        writeln!(
            out,
            "# task NAME={} PID={} COST={:.2} PERIOD={:.2} CPU={}",
            task.name,
            task.pid,
            nano_to_ms(task.wcet as i64),
            nano_to_ms(task.period as i64),
            partition
        )?;
    } else {
        writeln!(
            out,
            "# task NAME={} PID={} COST={} PERIOD={} CPU={}",
            task.name, task.pid, task.wcet, task.period, partition
        )?;
    }
    for job in &task.jobs {
        if ms {
            writeln!(
                out,
                " {:5}, {:5}, {:10.2}, {:10.2}, {:8}, {:10.2}, {:10.2}, {:7}, {:10.2}, {:12}, {:12}",
                job.pid,
                job.job,
                nano_to_ms(job.period as i64),
                nano_to_ms(job.response as i64),
                u8::from(job.deadline_miss),
                nano_to_ms(job.lateness),
                nano_to_ms(job.tardiness as i64),
                u8::from(job.forced),
                nano_to_ms(job.exec_time as i64),
                job.preemptions,
                job.migrations
            )?;
        } else {
            writeln!(
                out,
                " {:5}, {:5}, {:10}, {:10}, {:8}, {:10}, {:10}, {:7}, {:10}, {:12}, {:12}",
                job.pid,
                job.job,
                job.period,
                job.response,
                u8::from(job.deadline_miss),
                job.lateness,
                job.tardiness,
                u8::from(job.forced),
                job.exec_time,
                job.preemptions,
                job.migrations
            )?;
        }
    }
    Ok(())
}
