use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

/// Result of one executed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    pub job_id: usize,
    /// Files the job handed to rsync (after the existence filter).
    pub files: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl TransferOutcome {
    pub fn ok(job_id: usize, files: usize) -> Self {
        Self { job_id, files, success: true, error_kind: None, error_detail: None }
    }

    pub fn failed(job_id: usize, files: usize, kind: &str, detail: String) -> Self {
        Self {
            job_id,
            files,
            success: false,
            error_kind: Some(kind.to_string()),
            error_detail: Some(detail),
        }
    }
}

/// Aggregate result of one run, handed back to the caller.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub total_files: u64,
    pub total_bytes: u64,
    pub buckets: usize,
    pub completed_files: u64,
    pub skipped_files: u64,
    pub transferred_files: u64,
    pub succeeded_jobs: usize,
    pub failed_jobs: usize,
    pub cancelled_jobs: usize,
    pub scan_warnings: u64,
    pub elapsed_secs: f64,
    pub cancelled: bool,
    pub failures: Vec<TransferOutcome>,
}

/// Process exit status for a run that was interrupted.
pub const EXIT_INTERRUPTED: i32 = 130;
/// Process exit status for a run where at least one job failed.
pub const EXIT_PARTIAL: i32 = 2;

impl SyncReport {
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failed_jobs == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            EXIT_INTERRUPTED
        } else if self.failed_jobs > 0 {
            EXIT_PARTIAL
        } else {
            0
        }
    }

    /// Log the end-of-run summary and every failed job.
    pub fn log_summary(&self) {
        tracing::info!("Transfer completed in {:.1} seconds", self.elapsed_secs);
        tracing::info!(
            "Successfully transferred: {} buckets ({} files sent, {} already present)",
            self.succeeded_jobs,
            self.transferred_files,
            self.skipped_files
        );
        if self.cancelled {
            tracing::warn!("Run interrupted: {} buckets cancelled", self.cancelled_jobs);
        }
        if self.failed_jobs > 0 {
            tracing::error!("Failed transfers: {} buckets", self.failed_jobs);
            for f in &self.failures {
                tracing::error!(
                    "Job {} failed with error: {}",
                    f.job_id,
                    f.error_detail.as_deref().unwrap_or("")
                );
            }
        }
    }

    /// One-line machine readable summary, with the failure log path if any.
    pub fn to_json_line(&self, failures_path: Option<&Path>) -> Option<String> {
        let mut v = serde_json::to_value(self).ok()?;
        if let Some(obj) = v.as_object_mut() {
            obj.insert(
                "failures_path".to_string(),
                failures_path.map(|p| p.to_string_lossy().to_string()).into(),
            );
        }
        serde_json::to_string(&v).ok()
    }
}

/// Append failed outcomes as JSON Lines to a timestamped file in `dir`.
/// Returns the written path; errors are logged and swallowed.
pub fn write_failures_jsonl(dir: &Path, failures: &[TransferOutcome]) -> Option<PathBuf> {
    if failures.is_empty() {
        return None;
    }
    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::warn!("[sync] cannot create failure log dir {}: {}", dir.display(), e);
        return None;
    }
    let path = dir.join(format!("failures_{}.jsonl", Utc::now().format("%Y%m%dT%H%M%SZ")));
    let mut f = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!("[sync] cannot open failure log {}: {}", path.display(), e);
            return None;
        }
    };
    for outcome in failures {
        let line = match serde_json::to_string(outcome) {
            Ok(l) => l,
            Err(_) => continue,
        };
        if let Err(e) = writeln!(f, "{}", line) {
            tracing::warn!("[sync] failed writing {}: {}", path.display(), e);
            return None;
        }
    }
    Some(path)
}
