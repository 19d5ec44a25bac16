use std::path::{Path, PathBuf};

use crate::error::SetupError;

/// Normalize a path-like string for manifests and remote paths:
/// - converts backslashes to forward slashes
/// - collapses repeated slashes
/// - optionally preserves a trailing slash
pub fn normalize_path(p: &str, preserve_trailing_slash: bool) -> String {
    if p.is_empty() {
        return String::new();
    }
    let mut s = p.replace('\\', "/");
    while s.contains("//") {
        s = s.replace("//", "/");
    }
    if !preserve_trailing_slash {
        // Strip trailing slashes, but keep root "/"
        while s.len() > 1 && s.ends_with('/') {
            s.pop();
        }
    }
    s
}

/// Join a destination root and a relative path with exactly one `/`.
/// An empty root leaves `rel` relative to the remote working directory.
pub fn join_remote(root: &str, rel: &str) -> String {
    let base = normalize_path(root, false);
    let rel = rel.trim_start_matches('/');
    if base.is_empty() {
        rel.to_string()
    } else if base == "/" {
        format!("/{}", rel)
    } else {
        format!("{}/{}", base, rel)
    }
}

/// Quoted paths are never tilde-expanded by the remote shell, but remote
/// commands start in the login directory, so `~` and `~/x` reduce to paths
/// relative to it. `~user` forms are left alone.
pub fn home_relative(root: &str) -> &str {
    if root == "~" {
        ""
    } else if let Some(rest) = root.strip_prefix("~/") {
        rest.trim_start_matches('/')
    } else {
        root
    }
}

/// Resolve an external program on PATH (or as given, when it contains a
/// separator) so a missing tool fails before any work starts.
pub fn resolve_program(program: &Path) -> Result<PathBuf, SetupError> {
    which::which(program)
        .map_err(|e| SetupError::ToolNotFound(program.display().to_string(), e.to_string()))
}
