use std::collections::HashSet;
use std::path::PathBuf;

use super::bucket::{Bucket, FileEntry};
use super::cancel::CancelToken;
use super::connection::ControlConnection;
use super::helpers::{home_relative, join_remote};
use crate::error::ProbeError;

/// Prefix of every response line naming a file that already exists.
pub const EXISTS_SENTINEL: &str = "exists\t";

/// Reads newline separated paths on stdin and echoes the sentinel for each
/// one that is a regular file. Wrapped in `sh -c` so the remote login shell
/// does not matter.
pub const REMOTE_PROBE_SCRIPT: &str = concat!(
    "sh -c 'while IFS= read -r p; do ",
    "[ -f \"$p\" ] && printf \"exists\\t%s\\n\" \"$p\"; ",
    "done; exit 0'"
);

/// Answers "which of these relative paths already exist at the destination".
/// Implementations must be shareable across worker threads.
pub trait ExistenceProbe: Sync {
    fn existing(&self, rel_paths: &[&str], cancel: &CancelToken)
    -> Result<HashSet<String>, ProbeError>;
}

/// Probe for a directory on this machine.
#[derive(Debug, Clone)]
pub struct LocalProbe {
    root: PathBuf,
}

impl LocalProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ExistenceProbe for LocalProbe {
    fn existing(
        &self,
        rel_paths: &[&str],
        _cancel: &CancelToken,
    ) -> Result<HashSet<String>, ProbeError> {
        Ok(rel_paths
            .iter()
            .filter(|rel| self.root.join(rel).exists())
            .map(|rel| rel.to_string())
            .collect())
    }
}

/// Probe over the shared control connection: one round trip per call.
pub struct RemoteProbe<'a> {
    conn: &'a ControlConnection,
    root: String,
}

impl<'a> RemoteProbe<'a> {
    /// `root` as written in the destination spec; a leading `~/` is resolved
    /// against the remote login directory.
    pub fn new(conn: &'a ControlConnection, root: &str) -> Self {
        Self { conn, root: home_relative(root).to_string() }
    }
}

impl ExistenceProbe for RemoteProbe<'_> {
    fn existing(
        &self,
        rel_paths: &[&str],
        cancel: &CancelToken,
    ) -> Result<HashSet<String>, ProbeError> {
        if rel_paths.is_empty() {
            return Ok(HashSet::new());
        }
        let mut input = String::new();
        for rel in rel_paths {
            input.push_str(&join_remote(&self.root, rel));
            input.push('\n');
        }
        let out = self
            .conn
            .exec(REMOTE_PROBE_SCRIPT, Some(input.into_bytes()), cancel)
            .map_err(ProbeError::Run)?;
        if !out.status.success() {
            return Err(ProbeError::Exit(out.status.code(), out.stderr_text()));
        }
        let present = parse_probe_output(&String::from_utf8_lossy(&out.stdout));
        Ok(rel_paths
            .iter()
            .filter(|rel| present.contains(&join_remote(&self.root, rel)))
            .map(|rel| rel.to_string())
            .collect())
    }
}

/// Collect the paths reported by the remote probe script.
pub fn parse_probe_output(stdout: &str) -> HashSet<String> {
    stdout
        .lines()
        .filter_map(|l| l.strip_prefix(EXISTS_SENTINEL))
        .map(str::to_string)
        .collect()
}

/// Result of filtering one bucket.
#[derive(Debug, Default)]
pub struct Filtered<'b> {
    pub pending: Vec<&'b FileEntry>,
    pub skipped: Vec<&'b FileEntry>,
}

/// Split a bucket into files that still need a transfer and files already
/// present. Probe failures keep every file pending; only cancellation is
/// returned as an error.
pub fn filter_bucket<'b>(
    probe: &dyn ExistenceProbe,
    bucket: &'b Bucket,
    cancel: &CancelToken,
) -> Result<Filtered<'b>, ProbeError> {
    let rels: Vec<&str> = bucket.iter().map(|e| e.rel_path.as_str()).collect();
    let present = match probe.existing(&rels, cancel) {
        Ok(p) => p,
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => {
            tracing::warn!(
                "[sync][probe] {}; transferring all {} files of the bucket",
                e,
                bucket.len()
            );
            HashSet::new()
        }
    };
    let mut out = Filtered::default();
    for e in bucket.iter() {
        if present.contains(&e.rel_path) {
            out.skipped.push(e);
        } else {
            out.pending.push(e);
        }
    }
    Ok(out)
}
