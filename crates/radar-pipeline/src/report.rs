use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use crate::RunSummary;

pub const SUMMARY_FILE: &str = "run_summary.json";

/// Writes `<reports_dir>/<run_id>/run_summary.json` and returns the run directory.
pub async fn write_run_report(reports_dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
    let run_dir = reports_dir.join(summary.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let body = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(run_dir.join(SUMMARY_FILE), body)
        .await
        .with_context(|| format!("writing {SUMMARY_FILE}"))?;
    Ok(run_dir)
}
