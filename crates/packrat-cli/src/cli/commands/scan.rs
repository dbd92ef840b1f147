//! `packrat scan`: what a run would pick up, without taking the lock or
//! touching the filesystem.

use anyhow::Context;
use chrono::Utc;
use packrat_core::{find_ready_folders, plan_job};
use serde_json::{json, Value};

use super::super::args::{OutputFormat, ScanArgs};
use crate::exit_codes::SUCCESS;

pub fn run(args: ScanArgs) -> anyhow::Result<i32> {
    let config = args.paths.to_config();
    let jobs = find_ready_folders(&config)
        .with_context(|| format!("failed to scan {}", config.staging_root.display()))?;
    let now = Utc::now();

    let rows: Vec<Value> = jobs
        .iter()
        .map(|job| match plan_job(&config, job, now) {
            Ok(plan) => json!({
                "name": job.name,
                "path": job.path.display().to_string(),
                "eligible": true,
                "bucket": plan.destination.bucket.as_str(),
                "destination": plan.destination.final_path.display().to_string(),
            }),
            Err(reason) => json!({
                "name": job.name,
                "path": job.path.display().to_string(),
                "eligible": false,
                "reason": reason.to_string(),
            }),
        })
        .collect();

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("no staged folders with a seed descriptor");
            }
            for row in &rows {
                println!("{}", render_row(row));
            }
        }
    }
    Ok(SUCCESS)
}

fn render_row(row: &Value) -> String {
    let name = row["name"].as_str().unwrap_or_default();
    if row["eligible"].as_bool() == Some(true) {
        format!(
            "READY  {name}: {} -> {}",
            row["bucket"].as_str().unwrap_or_default(),
            row["destination"].as_str().unwrap_or_default()
        )
    } else {
        format!(
            "SKIP   {name}: {}",
            row["reason"].as_str().unwrap_or_default()
        )
    }
}
