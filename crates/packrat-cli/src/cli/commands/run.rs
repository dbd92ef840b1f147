use anyhow::Context;
use packrat_core::{FileLock, RunReport, RunStatus};

use super::super::args::RunArgs;
use crate::exit_codes::{JOB_FAILED, SUCCESS};

pub fn run(args: RunArgs) -> anyhow::Result<i32> {
    let config = args.paths.to_config().with_dry_run(args.dry_run);
    let mut lock = FileLock::new(&args.lock_path);
    if args.dry_run {
        lock = lock.without_owner_record();
    }

    let status = packrat_core::run(&config, &mut lock).with_context(|| {
        format!(
            "archive pass over {} failed",
            config.staging_root.display()
        )
    })?;

    match status {
        RunStatus::LockHeld => Ok(SUCCESS),
        RunStatus::Completed(report) => {
            log_summary(&report);
            Ok(exit_code(&report))
        }
    }
}

pub(crate) fn exit_code(report: &RunReport) -> i32 {
    if report.is_clean() {
        SUCCESS
    } else {
        JOB_FAILED
    }
}

fn log_summary(report: &RunReport) {
    if report.jobs() == 0 {
        return;
    }
    tracing::info!(
        archived = report.archived(),
        skipped = report.skipped(),
        dry_run = report.dry_runs(),
        failed = report.failed(),
        cleanup_warnings = report.cleanup_warnings(),
        "run complete"
    );
    for failure in &report.failures {
        tracing::error!(job = %failure.name, "failed: {}", failure.error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packrat_core::JobFailure;

    #[test]
    fn any_failure_is_partial_failure() {
        assert_eq!(exit_code(&RunReport::default()), SUCCESS);
        let report = RunReport {
            outcomes: Vec::new(),
            failures: vec![JobFailure {
                name: "x".into(),
                error: "boom".into(),
            }],
        };
        assert_eq!(exit_code(&report), JOB_FAILED);
    }
}
