use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::now_utc_iso;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub niche: String,
    pub stem: String,
    pub success: bool,
    /// Last state reached; `done` on success.
    pub state: String,
    pub reason: Option<String>,
    pub files: Vec<String>,
}

/// End-of-batch report written to `summary.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub jobs: Vec<JobRecord>,
}

impl BatchSummary {
    pub fn start(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: now_utc_iso(),
            finished_at: None,
            jobs: Vec::new(),
        }
    }

    pub fn record(&mut self, job: JobRecord) {
        self.jobs.push(job);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(now_utc_iso());
    }

    pub fn succeeded(&self) -> u64 {
        self.jobs.iter().filter(|job| job.success).count() as u64
    }

    pub fn failed(&self) -> u64 {
        self.jobs.iter().filter(|job| !job.success).count() as u64
    }

    pub fn total(&self) -> u64 {
        self.jobs.len() as u64
    }
}

pub fn write_summary(path: &Path, summary: &BatchSummary) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(map) => map,
        _ => anyhow::bail!("batch summary did not serialize to an object"),
    };
    payload.insert("total".to_string(), Value::from(summary.total()));
    payload.insert("succeeded".to_string(), Value::from(summary.succeeded()));
    payload.insert("failed".to_string(), Value::from(summary.failed()));

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}
