//! The archiving pass: take the run lock, discover jobs, process each one to
//! completion in order.

use crate::commit::{archive_job, JobOutcome};
use crate::config::ArchiverConfig;
use crate::discovery::{find_ready_folders, Job};
use crate::error::ArchiveResult;
use crate::lock::{try_lock, ExclusiveLock};

/// A job that errored. Its staging folder is untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub name: String,
    pub error: String,
}

/// Per-run tally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub outcomes: Vec<JobOutcome>,
    pub failures: Vec<JobFailure>,
}

impl RunReport {
    pub fn jobs(&self) -> usize {
        self.outcomes.len() + self.failures.len()
    }

    pub fn archived(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Archived { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Skipped { .. }))
    }

    pub fn dry_runs(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::DryRun { .. }))
    }

    /// Archived jobs whose staging folder is still around.
    pub fn cleanup_warnings(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                JobOutcome::Archived {
                    cleanup_error: Some(_),
                    ..
                }
            )
        })
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// True when no job failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn count(&self, pred: impl Fn(&JobOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Another instance holds the lock; nothing was scanned.
    LockHeld,
    Completed(RunReport),
}

/// One full pass over the staging root under `lock`.
///
/// Errors returned here are run-level (lock I/O, unreadable staging root).
/// Job errors are logged and collected in the report; every discovered job
/// is attempted.
pub fn run<L: ExclusiveLock + ?Sized>(
    config: &ArchiverConfig,
    lock: &mut L,
) -> ArchiveResult<RunStatus> {
    let Some(_guard) = try_lock(lock)? else {
        tracing::info!("Another run is active; exiting.");
        return Ok(RunStatus::LockHeld);
    };

    if !config.dry_run {
        config.ensure_vault()?;
    }

    let jobs = find_ready_folders(config)?;
    if jobs.is_empty() {
        tracing::info!("Nothing to do.");
    } else {
        tracing::info!(jobs = jobs.len(), dry_run = config.dry_run, "starting archive pass");
    }

    Ok(RunStatus::Completed(process_jobs(config, &jobs)))
}

/// Archive `jobs` one after another. A failing job never stops the rest.
pub fn process_jobs(config: &ArchiverConfig, jobs: &[Job]) -> RunReport {
    let mut report = RunReport::default();

    for job in jobs {
        let span = tracing::info_span!("job", name = %job.name);
        let _entered = span.enter();

        match archive_job(config, job) {
            Ok(outcome) => {
                tracing::info!("{outcome}");
                report.outcomes.push(outcome);
            }
            Err(err) => {
                tracing::error!(error = %err, "Job failed: {}", job.name);
                report.failures.push(JobFailure {
                    name: job.name.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    report
}
