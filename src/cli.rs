use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    #[clap(help = "Source directory to synchronize")]
    pub source: PathBuf,
    #[clap(help = "Target: local path or [user@]host:/path")]
    pub target: String,
    #[clap(short = 'j', long = "jobs", help = "Number of parallel rsync jobs (default 4)")]
    pub jobs: Option<usize>,
    #[clap(
        short = 's',
        long = "bucket-size",
        value_name = "MIB",
        help = "Size of each bucket in MiB (default 1000)"
    )]
    pub bucket_size: Option<u64>,
    #[clap(
        long = "rsync-args",
        value_name = "ARGS",
        allow_hyphen_values = true,
        help = "Extra rsync arguments, whitespace separated (default \"-avz --progress\")"
    )]
    pub rsync_args: Option<String>,
    #[clap(long = "rsync-path", value_name = "PATH", help = "rsync executable to use")]
    pub rsync_path: Option<PathBuf>,
    #[clap(long = "ssh-path", value_name = "PATH", help = "ssh executable to use")]
    pub ssh_path: Option<PathBuf>,
    #[clap(
        long = "config",
        value_name = "FILE",
        help = "Config file (default ~/.prsync/config.json)"
    )]
    pub config: Option<PathBuf>,
    #[clap(long = "log-file", value_name = "FILE", help = "Also write debug logs to this file")]
    pub log_file: Option<PathBuf>,
    #[clap(long = "failures-dir", value_name = "DIR", help = "Directory for failure JSONL logs")]
    pub failures_dir: Option<PathBuf>,
    #[clap(long, help = "Print a one-line JSON summary at the end")]
    pub json: bool,
    #[clap(short, long, help = "Suppress the human readable summary")]
    pub quiet: bool,
    #[clap(long, help = "Show a progress bar (console logs drop to warnings)")]
    pub bar: bool,
    #[clap(short, long, help = "Print verbose diagnostic logs for debugging")]
    pub verbose: bool,
}
