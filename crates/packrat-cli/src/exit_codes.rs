//! Process exit codes. Part of the operational contract: cron wrappers and
//! monitoring key off these.

/// Every job succeeded, nothing was ready, or another run held the lock.
pub const SUCCESS: i32 = 0;
/// The run could not start or scan (bad staging root, lock I/O, logging setup).
pub const FATAL: i32 = 1;
/// At least one job failed; the rest were still attempted.
pub const JOB_FAILED: i32 = 2;
