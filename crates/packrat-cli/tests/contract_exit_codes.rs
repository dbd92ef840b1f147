#![allow(deprecated)]
//! Process-level contract: exit codes, what stays on disk, and what gets
//! printed, for the `packrat` binary against temp staging/vault trees.

use assert_cmd::Command;
use chrono::{Datelike, Utc};
use packrat_core::{ExclusiveLock, FileLock};
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

const ENV_VARS: &[&str] = &[
    "ARCHIVE_BASE_DIR",
    "ARCHIVE_DIR",
    "ARCHIVE_DRY_RUN",
    "ARCHIVE_LOCK_PATH",
    "ARCHIVE_META_NAME",
    "PACKRAT_LOG_LEVEL",
    "PACKRAT_LOG_FILE",
    "PACKRAT_LOG_DIR",
    "PACKRAT_LOG_FORMAT",
    "RUST_LOG",
];

struct Layout {
    dir: TempDir,
}

impl Layout {
    fn new() -> Self {
        let layout = Self {
            dir: tempdir().unwrap(),
        };
        fs::create_dir_all(layout.staging()).unwrap();
        layout
    }

    fn staging(&self) -> PathBuf {
        self.dir.path().join("STAGING")
    }

    fn vault(&self) -> PathBuf {
        self.dir.path().join("VAULT")
    }

    fn lock(&self) -> PathBuf {
        self.dir.path().join("run.lock")
    }

    fn stage(&self, name: &str, seed: &str) -> PathBuf {
        let folder = self.staging().join(name);
        fs::create_dir_all(folder.join("data")).unwrap();
        fs::write(folder.join("data/a.csv"), "x,y\n1,2\n").unwrap();
        fs::write(folder.join("archive.meta.json"), seed).unwrap();
        folder
    }

    /// `packrat <sub>` pointed at this layout, isolated from the caller's env.
    fn packrat(&self, sub: &str) -> Command {
        let mut cmd = Command::cargo_bin("packrat").unwrap();
        for var in ENV_VARS {
            cmd.env_remove(var);
        }
        cmd.arg(sub)
            .arg("--no-log-file")
            .arg("--base-dir")
            .arg(self.staging())
            .arg("--archive-dir")
            .arg(self.vault());
        if sub == "run" {
            cmd.arg("--lock-path").arg(self.lock());
        }
        cmd
    }
}

fn study_archive(vault: &Path, name: &str) -> PathBuf {
    vault
        .join("STUDY")
        .join(Utc::now().year().to_string())
        .join(format!("{name}.tar.gz"))
}

#[test]
fn run_archives_ready_folder_and_exits_zero() {
    let layout = Layout::new();
    let folder = layout.stage("trial-42", r#"{"ready_to_archive": true, "type": "study"}"#);

    layout
        .packrat("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("OK     trial-42: -> "))
        .stdout(predicate::str::contains("(1 files)"));

    assert!(study_archive(&layout.vault(), "trial-42").is_file());
    assert!(!folder.exists());
}

#[test]
fn empty_staging_says_nothing_to_do() {
    let layout = Layout::new();
    layout
        .packrat("run")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Nothing to do."));
}

#[test]
fn held_lock_exits_zero_without_touching_staging() {
    let layout = Layout::new();
    let folder = layout.stage("trial-42", r#"{"ready_to_archive": true}"#);

    let mut holder = FileLock::new(layout.lock());
    assert!(holder.try_acquire().unwrap());

    layout
        .packrat("run")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Another run is active; exiting."));

    assert!(folder.join("data/a.csv").is_file());
    assert!(!layout.vault().exists());
    holder.release().unwrap();
}

#[cfg(unix)]
#[test]
fn failing_job_exits_two_and_others_still_archive() {
    let layout = Layout::new();
    let broken = layout.stage("a-broken", r#"{"ready_to_archive": true, "type": "study"}"#);
    std::os::unix::fs::symlink("/etc/hostname", broken.join("data/link")).unwrap();
    let good = layout.stage("b-good", r#"{"ready_to_archive": true, "type": "study"}"#);

    layout
        .packrat("run")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("Job failed: a-broken"));

    assert!(broken.join("data/a.csv").is_file());
    assert!(!study_archive(&layout.vault(), "a-broken").exists());
    assert!(study_archive(&layout.vault(), "b-good").is_file());
    assert!(!good.exists());
}

#[test]
fn dry_run_from_env_changes_nothing() {
    let layout = Layout::new();
    let folder = layout.stage("trial-42", r#"{"ready_to_archive": true, "type": "study"}"#);
    let seed_before = fs::read(folder.join("archive.meta.json")).unwrap();

    let expected = format!(
        "DRY    trial-42: would write {}",
        study_archive(&layout.vault(), "trial-42").display()
    );
    layout
        .packrat("run")
        .env("ARCHIVE_DRY_RUN", "1")
        .assert()
        .success()
        .stdout(predicate::str::contains(expected));

    assert!(!layout.vault().exists());
    assert_eq!(
        fs::read(folder.join("archive.meta.json")).unwrap(),
        seed_before
    );
}

#[test]
fn missing_staging_root_is_fatal() {
    let layout = Layout::new();
    fs::remove_dir(layout.staging()).unwrap();

    layout.packrat("run").assert().code(1);
}

#[test]
fn scan_reports_eligibility_as_json() {
    let layout = Layout::new();
    layout.stage("ready", r#"{"ready_to_archive": true}"#);
    layout.stage("waiting", r#"{"ready_to_archive": false}"#);

    let output = layout
        .packrat("scan")
        .arg("--format")
        .arg("json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let rows: Vec<Value> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], "ready");
    assert_eq!(rows[0]["eligible"], true);
    assert_eq!(rows[0]["bucket"], "NONSTUDY");
    assert_eq!(rows[1]["name"], "waiting");
    assert_eq!(rows[1]["eligible"], false);
    assert_eq!(rows[1]["reason"], "not ready_to_archive");

    assert!(layout.staging().join("ready/data/a.csv").is_file());
    assert!(!layout.vault().exists());
}

#[test]
fn version_prints_package_version() {
    Command::cargo_bin("packrat")
        .unwrap()
        .args(["version", "--no-log-file"])
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
