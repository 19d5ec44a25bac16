use std::path::{Path, PathBuf};

use crate::parse::parse_remote_spec;

/// Where the tree is synchronized to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Local { path: PathBuf },
    Remote { user: Option<String>, host: String, path: String },
}

impl Destination {
    /// `[user@]host:path` selects the remote variant, anything else is local.
    pub fn parse(spec: &str) -> Self {
        match parse_remote_spec(spec) {
            Some(r) => Destination::Remote { user: r.user, host: r.host, path: r.path },
            None => Destination::Local { path: PathBuf::from(spec) },
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Destination::Remote { .. })
    }

    /// The path component (local directory or remote directory).
    pub fn path_str(&self) -> String {
        match self {
            Destination::Local { path } => path.to_string_lossy().to_string(),
            Destination::Remote { path, .. } => path.clone(),
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Destination::Local { path } => Some(path.as_path()),
            Destination::Remote { .. } => None,
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Local { path } => write!(f, "{}", path.display()),
            Destination::Remote { user: Some(u), host, path } => {
                write!(f, "{}@{}:{}", u, host, path)
            }
            Destination::Remote { user: None, host, path } => write!(f, "{}:{}", host, path),
        }
    }
}
