use std::path::PathBuf;

/// Fatal errors raised before any scanning starts. Only these stop a run.
#[derive(Debug, Clone)]
pub enum SetupError {
    SourceMissing(PathBuf),
    SourceNotDir(PathBuf),
    InvalidOption(String),
    /// Required program not on PATH: (program, lookup error)
    ToolNotFound(String, String),
    /// Control connection could not be established: (host, detail)
    ConnectionSetup(String, String),
}

impl std::fmt::Display for SetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use SetupError::*;
        match self {
            SourceMissing(p) => write!(f, "Source directory does not exist: {}", p.display()),
            SourceNotDir(p) => write!(f, "Source is not a directory: {}", p.display()),
            InvalidOption(msg) => write!(f, "Invalid option: {}", msg),
            ToolNotFound(tool, e) => write!(f, "Required program '{}' not found: {}", tool, e),
            ConnectionSetup(host, detail) => {
                write!(f, "Failed to setup SSH connection multiplexing to {}: {}", host, detail)
            }
        }
    }
}

impl std::error::Error for SetupError {}

/// Failure of a single external process run (probe or transfer).
#[derive(Debug, Clone)]
pub enum RunError {
    Spawn(String),
    Io(String),
    Cancelled,
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Spawn(msg) => write!(f, "failed to start process: {}", msg),
            RunError::Io(msg) => write!(f, "process I/O error: {}", msg),
            RunError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for RunError {}

/// Existence probe failures. Anything but `Cancelled` is treated as
/// "nothing exists" by the filter.
#[derive(Debug, Clone)]
pub enum ProbeError {
    Run(RunError),
    Exit(Option<i32>, String),
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::Run(e) => write!(f, "existence probe {}", e),
            ProbeError::Exit(code, stderr) => {
                write!(f, "existence probe exited with {}: {}", fmt_code(*code), stderr)
            }
        }
    }
}

impl std::error::Error for ProbeError {}

impl ProbeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProbeError::Run(RunError::Cancelled))
    }
}

/// Per-job transfer failures. Recorded in the report, never propagated.
#[derive(Debug, Clone)]
pub enum JobError {
    Manifest(String),
    Run(RunError),
    Exit(Option<i32>, String),
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::Manifest(msg) => write!(f, "failed to write file list: {}", msg),
            JobError::Run(e) => write!(f, "rsync {}", e),
            JobError::Exit(code, stderr) => {
                if stderr.is_empty() {
                    write!(f, "rsync exited with {}", fmt_code(*code))
                } else {
                    write!(f, "rsync exited with {}: {}", fmt_code(*code), stderr)
                }
            }
        }
    }
}

impl std::error::Error for JobError {}

impl JobError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Run(RunError::Cancelled))
    }

    /// Short tag used in the JSONL failure log.
    pub fn variant(&self) -> &'static str {
        match self {
            JobError::Manifest(_) => "Manifest",
            JobError::Run(RunError::Spawn(_)) => "Spawn",
            JobError::Run(RunError::Io(_)) => "Io",
            JobError::Run(RunError::Cancelled) => "Cancelled",
            JobError::Exit(_, _) => "Exit",
        }
    }
}

fn fmt_code(code: Option<i32>) -> String {
    match code {
        Some(c) => format!("status {}", c),
        None => "signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_exit_message_includes_stderr() {
        let e = JobError::Exit(Some(23), "some files could not be transferred".to_string());
        assert_eq!(
            e.to_string(),
            "rsync exited with status 23: some files could not be transferred"
        );
        let bare = JobError::Exit(None, String::new());
        assert_eq!(bare.to_string(), "rsync exited with signal");
    }

    #[test]
    fn cancellation_is_classified() {
        assert!(JobError::Run(RunError::Cancelled).is_cancelled());
        assert!(!JobError::Exit(Some(1), String::new()).is_cancelled());
        assert!(ProbeError::Run(RunError::Cancelled).is_cancelled());
        assert!(!ProbeError::Exit(Some(255), "timeout".into()).is_cancelled());
    }
}
