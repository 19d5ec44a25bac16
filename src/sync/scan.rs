use std::path::Path;

use walkdir::WalkDir;

use super::bucket::FileEntry;
use super::cancel::CancelToken;
use super::helpers::normalize_path;

/// Totals gathered during one walk of the source tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub files: u64,
    pub bytes: u64,
    pub warnings: u64,
    /// The walk stopped early because the run was cancelled.
    pub interrupted: bool,
}

/// Walk `root` depth-first (directory order, unsorted) and hand every regular
/// file to `push` as it is found. Entries that cannot be inspected are logged
/// and skipped; they never abort the walk. Cancellation stops it between
/// entries.
pub fn scan_tree(
    root: &Path,
    cancel: &CancelToken,
    push: &mut dyn FnMut(FileEntry),
) -> ScanStats {
    let mut stats = ScanStats::default();
    for item in WalkDir::new(root).follow_links(false) {
        if cancel.is_cancelled() {
            tracing::warn!("[sync][scan] interrupted after {} files", stats.files);
            stats.interrupted = true;
            break;
        }
        let entry = match item {
            Ok(e) => e,
            Err(e) => {
                let shown = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                tracing::error!("[sync][scan] Error accessing {}: {}", shown, e);
                stats.warnings += 1;
                continue;
            }
        };
        let ft = entry.file_type();
        if ft.is_dir() {
            continue;
        }
        let path = entry.path();
        // symlinks count when they resolve to a regular file
        let md = if ft.is_symlink() {
            std::fs::metadata(path)
        } else {
            entry.metadata().map_err(std::io::Error::from)
        };
        let md = match md {
            Ok(m) => m,
            Err(e) => {
                tracing::error!("[sync][scan] Error accessing file {}: {}", path.display(), e);
                stats.warnings += 1;
                continue;
            }
        };
        if !md.is_file() {
            continue;
        }
        let rel = match path.strip_prefix(root).ok().and_then(|r| r.to_str()) {
            Some(r) => normalize_path(r, false),
            None => {
                tracing::warn!("[sync][scan] skipping non UTF-8 path: {}", path.display());
                stats.warnings += 1;
                continue;
            }
        };
        stats.files += 1;
        stats.bytes = stats.bytes.saturating_add(md.len());
        push(FileEntry { rel_path: rel, size: md.len() });
    }
    stats
}
