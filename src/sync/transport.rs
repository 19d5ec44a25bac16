use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::NamedTempFile;

use super::bucket::{Bucket, FileEntry};
use super::cancel::CancelToken;
use super::connection::ControlConnection;
use super::destination::Destination;
use super::process::run_to_completion;
use crate::error::JobError;

/// One bucket bound to where and how it is transferred. Created once per
/// bucket and owned by the worker that executes it.
#[derive(Debug)]
pub struct Job<'a> {
    pub id: usize,
    pub bucket: Bucket,
    pub source_base: &'a Path,
    pub destination: &'a Destination,
    pub extra_args: &'a [String],
}

/// Moves the files named in a manifest to the destination.
/// Implementations must be shareable across worker threads.
pub trait Transport: Sync {
    fn transfer(&self, job: &Job<'_>, manifest: &Path, cancel: &CancelToken)
    -> Result<(), JobError>;
}

/// Write the newline separated file list for one job. The file is removed
/// when the returned handle is dropped or closed.
pub fn write_manifest(files: &[&FileEntry]) -> Result<NamedTempFile, JobError> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".rsync_filelist_")
        .suffix(".txt")
        .tempfile()
        .map_err(|e| JobError::Manifest(e.to_string()))?;
    {
        let mut w = std::io::BufWriter::new(tmp.as_file_mut());
        for f in files {
            writeln!(w, "{}", f.rel_path).map_err(|e| JobError::Manifest(e.to_string()))?;
        }
        w.flush().map_err(|e| JobError::Manifest(e.to_string()))?;
    }
    Ok(tmp)
}

/// Remove a manifest, logging instead of failing.
pub fn discard_manifest(manifest: NamedTempFile, job_id: usize) {
    let shown = manifest.path().display().to_string();
    if let Err(e) = manifest.close() {
        tracing::warn!("[sync][worker] job {} could not remove file list {}: {}", job_id, shown, e);
    }
}

/// Build rsync's argument vector:
/// `<extra> [-e <shell>] --files-from=<manifest> <source>/ <destination>`.
pub fn rsync_args(job: &Job<'_>, manifest: &Path, remote_shell: Option<&str>) -> Vec<OsString> {
    let mut args: Vec<OsString> = job.extra_args.iter().map(OsString::from).collect();
    if let Some(shell) = remote_shell {
        args.push("-e".into());
        args.push(shell.into());
    }
    let mut files_from = OsString::from("--files-from=");
    files_from.push(manifest.as_os_str());
    args.push(files_from);
    // trailing separator: copy the contents, not the directory itself
    let mut src = job.source_base.as_os_str().to_owned();
    src.push("/");
    args.push(src);
    match job.destination {
        Destination::Local { path } => args.push(path.as_os_str().to_owned()),
        remote => args.push(remote.to_string().into()),
    }
    args
}

/// The real transport: one `rsync` process per job, routed through the
/// shared control connection for remote destinations.
pub struct RsyncTransport<'a> {
    program: PathBuf,
    connection: Option<&'a ControlConnection>,
}

impl<'a> RsyncTransport<'a> {
    pub fn new(program: impl Into<PathBuf>, connection: Option<&'a ControlConnection>) -> Self {
        Self { program: program.into(), connection }
    }
}

impl Transport for RsyncTransport<'_> {
    fn transfer(
        &self,
        job: &Job<'_>,
        manifest: &Path,
        cancel: &CancelToken,
    ) -> Result<(), JobError> {
        let shell = self.connection.map(ControlConnection::rsync_shell);
        let mut cmd = Command::new(&self.program);
        cmd.args(rsync_args(job, manifest, shell.as_deref()));
        tracing::debug!("[sync][worker] job {} executing rsync command: {:?}", job.id, cmd);
        let out = run_to_completion(&mut cmd, None, cancel).map_err(JobError::Run)?;
        if !out.stdout.is_empty() {
            tracing::trace!(
                "[sync][worker] job {} rsync output:\n{}",
                job.id,
                String::from_utf8_lossy(&out.stdout)
            );
        }
        if out.status.success() {
            Ok(())
        } else {
            Err(JobError::Exit(out.status.code(), out.stderr_text()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job<'a>(dest: &'a Destination, extra: &'a [String]) -> Job<'a> {
        Job {
            id: 7,
            bucket: vec![FileEntry::new("a.txt", 1)].into_iter().collect(),
            source_base: Path::new("/data/src"),
            destination: dest,
            extra_args: extra,
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter().map(|a| a.to_string_lossy().to_string()).collect()
    }

    #[test]
    fn local_invocation_order() {
        let dest = Destination::parse("/mnt/backup");
        let extra = vec!["-avz".to_string(), "--progress".to_string()];
        let args = rsync_args(&job(&dest, &extra), Path::new("/tmp/list.txt"), None);
        assert_eq!(
            strings(args),
            vec!["-avz", "--progress", "--files-from=/tmp/list.txt", "/data/src/", "/mnt/backup"]
        );
    }

    #[test]
    fn remote_invocation_uses_shell_override() {
        let dest = Destination::parse("alice@db01:/srv/data");
        let extra = vec!["-a".to_string()];
        let args = rsync_args(
            &job(&dest, &extra),
            Path::new("/tmp/list.txt"),
            Some("ssh -o ControlPath=/tmp/c -l alice"),
        );
        assert_eq!(
            strings(args),
            vec![
                "-a",
                "-e",
                "ssh -o ControlPath=/tmp/c -l alice",
                "--files-from=/tmp/list.txt",
                "/data/src/",
                "alice@db01:/srv/data"
            ]
        );
    }

    #[test]
    fn manifest_lists_one_path_per_line_and_is_removed() {
        let a = FileEntry::new("dir/a.txt", 1);
        let b = FileEntry::new("b with space.txt", 2);
        let m = write_manifest(&[&a, &b]).unwrap();
        let path = m.path().to_path_buf();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "dir/a.txt\nb with space.txt\n");
        discard_manifest(m, 0);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_reported_with_stderr() {
        // `sh` stands in for rsync; the manifest path lands in $0 position args
        let dest = Destination::parse("/mnt/backup");
        let extra = vec!["-c".to_string(), "echo boom >&2; exit 23".to_string()];
        let t = RsyncTransport::new("sh", None);
        let err = t.transfer(&job(&dest, &extra), Path::new("/tmp/list.txt"), &CancelToken::new());
        match err {
            Err(JobError::Exit(Some(23), stderr)) => assert_eq!(stderr, "boom"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
