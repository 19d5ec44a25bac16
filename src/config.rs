use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_JOBS: usize = 4;
pub const DEFAULT_BUCKET_SIZE_MIB: u64 = 1000;
pub const DEFAULT_RSYNC_ARGS: &str = "-avz --progress";

/// Settings read from `~/.prsync/config.json`. Every field is optional in the
/// file; command line flags override whatever is loaded here.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub rsync_path: PathBuf,
    pub ssh_path: PathBuf,
    pub jobs: usize,
    pub bucket_size_mib: u64,
    /// Whitespace separated, e.g. `"-avz --progress"`.
    pub rsync_args: String,
    pub failures_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            rsync_path: PathBuf::from("rsync"),
            ssh_path: PathBuf::from("ssh"),
            jobs: DEFAULT_JOBS,
            bucket_size_mib: DEFAULT_BUCKET_SIZE_MIB,
            rsync_args: DEFAULT_RSYNC_ARGS.to_string(),
            failures_dir: None,
        }
    }
}

impl Config {
    /// `~/.prsync`
    pub fn storage_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".".to_owned() + env!("CARGO_PKG_NAME")))
    }

    pub fn default_path() -> Option<PathBuf> {
        Self::storage_dir().map(|d| d.join("config.json"))
    }

    /// Where failure logs go when nothing else is configured.
    pub fn default_failures_dir() -> PathBuf {
        match Self::storage_dir() {
            Some(d) => d.join("logs"),
            None => std::env::temp_dir().join(env!("CARGO_PKG_NAME")).join("logs"),
        }
    }

    pub fn failures_dir(&self) -> PathBuf {
        self.failures_dir.clone().unwrap_or_else(Self::default_failures_dir)
    }

    /// Load the given file, or the default location when `path` is `None`.
    /// Never fails: a missing file yields defaults, an unreadable or invalid
    /// one is logged and yields defaults.
    pub fn load(path: Option<&Path>) -> Self {
        match path {
            Some(p) => {
                if !p.exists() {
                    tracing::warn!("Config file {} not found, using defaults", p.display());
                    return Config::default();
                }
                Self::read_from(p)
            }
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::read_from(&p),
                _ => Config::default(),
            },
        }
    }

    pub fn read_from(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Cannot read config {}: {}", path.display(), e);
                return Config::default();
            }
        };
        match serde_json::from_str::<Config>(&text) {
            Ok(c) => {
                tracing::debug!("Loaded config from {}", path.display());
                c
            }
            Err(e) => {
                tracing::warn!("Invalid config {}: {}, using defaults", path.display(), e);
                Config::default()
            }
        }
    }
}
