// sync module: bucketed parallel rsync orchestration
mod bucket;
mod cancel;
mod connection;
mod destination;
mod helpers;
mod probe;
mod process;
mod progress;
mod report;
mod scan;
mod transport;
mod workers;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Config;
use crate::error::SetupError;
use crate::parse::split_args;

pub use bucket::{Bucket, BucketBuilder, FileEntry, MIB, distribute, mib_to_bytes};
pub use cancel::CancelToken;
pub use connection::{ControlConnection, ForcedTeardown, MasterStop};
pub use destination::Destination;
pub use helpers::{home_relative, join_remote, normalize_path, resolve_program};
pub use probe::{
    EXISTS_SENTINEL, ExistenceProbe, Filtered, LocalProbe, REMOTE_PROBE_SCRIPT, RemoteProbe,
    filter_bucket, parse_probe_output,
};
pub use process::{ChildOutput, run_to_completion};
pub use progress::{Counts, Progress};
pub use report::{
    EXIT_INTERRUPTED, EXIT_PARTIAL, SyncReport, TransferOutcome, write_failures_jsonl,
};
pub use scan::{ScanStats, scan_tree};
pub use transport::{Job, RsyncTransport, Transport, discard_manifest, rsync_args, write_manifest};

use self::workers::{WorkersCtx, calc_workers, run_workers};

/// Resolved inputs of one run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub source: PathBuf,
    pub destination: String,
    pub jobs: usize,
    pub bucket_size_mib: u64,
    pub rsync_args: Vec<String>,
    pub rsync_program: PathBuf,
    pub ssh_program: PathBuf,
}

impl Default for SyncOptions {
    fn default() -> Self {
        let c = Config::default();
        SyncOptions {
            source: PathBuf::from("."),
            destination: String::new(),
            jobs: c.jobs,
            bucket_size_mib: c.bucket_size_mib,
            rsync_args: split_args(&c.rsync_args),
            rsync_program: c.rsync_path,
            ssh_program: c.ssh_path,
        }
    }
}

/// A validated run: source checked, tools located and, for remote
/// destinations, the control connection up. Dropping it tears the
/// connection down.
pub struct Syncer {
    source: PathBuf,
    destination: Destination,
    jobs: usize,
    threshold: u64,
    rsync_args: Vec<String>,
    rsync_program: PathBuf,
    connection: Option<ControlConnection>,
}

impl Syncer {
    /// Everything that can fail before scanning fails here.
    pub fn prepare(opts: SyncOptions) -> Result<Self, SetupError> {
        if opts.jobs == 0 {
            return Err(SetupError::InvalidOption("jobs must be at least 1".to_string()));
        }
        if !opts.source.exists() {
            return Err(SetupError::SourceMissing(opts.source));
        }
        if !opts.source.is_dir() {
            return Err(SetupError::SourceNotDir(opts.source));
        }
        let source = std::fs::canonicalize(&opts.source)
            .map_err(|_| SetupError::SourceMissing(opts.source.clone()))?;
        let destination = Destination::parse(&opts.destination);
        let rsync_program = resolve_program(&opts.rsync_program)?;
        tracing::debug!("[sync] using rsync at {}", rsync_program.display());

        let connection = match &destination {
            Destination::Remote { user, host, .. } => {
                let ssh = resolve_program(&opts.ssh_program)?;
                tracing::info!("Setting up SSH connection multiplexing to {}", host);
                Some(ControlConnection::establish(&ssh, user.as_deref(), host)?)
            }
            Destination::Local { .. } => None,
        };

        Ok(Syncer {
            source,
            destination,
            jobs: opts.jobs,
            threshold: mib_to_bytes(opts.bucket_size_mib),
            rsync_args: opts.rsync_args,
            rsync_program,
            connection,
        })
    }

    pub fn source(&self) -> &std::path::Path {
        &self.source
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn connection(&self) -> Option<&ControlConnection> {
        self.connection.as_ref()
    }

    /// Run with the real rsync transport and the probe matching the
    /// destination kind.
    pub fn run(&self, cancel: &CancelToken, bar: Option<ProgressBar>) -> SyncReport {
        let transport = RsyncTransport::new(&self.rsync_program, self.connection.as_ref());
        let root = self.destination.path_str();
        match self.connection.as_ref() {
            Some(conn) => {
                tracing::debug!(
                    "[sync][probe] checking {}:{} via {}",
                    conn.host(),
                    root,
                    conn.control_path().display()
                );
                self.run_with(&RemoteProbe::new(conn, &root), &transport, cancel, bar)
            }
            None => self.run_with(&LocalProbe::new(root), &transport, cancel, bar),
        }
    }

    /// Scan, bucket, dispatch and aggregate with the given probe and transport.
    pub fn run_with(
        &self,
        probe: &dyn ExistenceProbe,
        transport: &dyn Transport,
        cancel: &CancelToken,
        bar: Option<ProgressBar>,
    ) -> SyncReport {
        let start = Instant::now();
        tracing::info!("Scanning source directory: {}", self.source.display());
        let mut builder = BucketBuilder::new(self.threshold);
        let stats = scan_tree(&self.source, cancel, &mut |e| builder.push(e));
        let buckets = builder.finish();
        tracing::info!(
            "Found {} files ({}) in {} buckets",
            stats.files,
            crate::util::human_bytes(stats.bytes),
            buckets.len()
        );

        let mut progress = Progress::new(stats.files);
        if let Some(bar) = bar {
            progress = progress.with_bar(bar);
        }
        let jobs: Vec<Job<'_>> = buckets
            .into_iter()
            .enumerate()
            .map(|(id, bucket)| Job {
                id,
                bucket,
                source_base: &self.source,
                destination: &self.destination,
                extra_args: &self.rsync_args,
            })
            .collect();
        let total_jobs = jobs.len();
        let workers = calc_workers(self.jobs, total_jobs);
        tracing::info!("Starting transfer with {} parallel jobs", workers);

        let ctx = WorkersCtx { workers, probe, transport, progress: &progress, cancel };
        let tally = run_workers(&ctx, jobs);
        progress.finish();

        let counts = progress.snapshot();
        let transferred: u64 =
            tally.outcomes.iter().filter(|o| o.success).map(|o| o.files as u64).sum();
        let failures: Vec<TransferOutcome> =
            tally.outcomes.iter().filter(|o| !o.success).cloned().collect();
        SyncReport {
            total_files: stats.files,
            total_bytes: stats.bytes,
            buckets: total_jobs,
            completed_files: counts.completed,
            skipped_files: counts.completed.saturating_sub(transferred),
            transferred_files: transferred,
            succeeded_jobs: tally.outcomes.len() - failures.len(),
            failed_jobs: failures.len(),
            cancelled_jobs: tally.cancelled,
            scan_warnings: stats.warnings,
            elapsed_secs: start.elapsed().as_secs_f64(),
            cancelled: cancel.is_cancelled(),
            failures,
        }
    }

    /// Tear the control connection down now instead of at drop.
    pub fn close(mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
        }
    }
}

/// Arguments for `handle_sync` grouped to avoid too-many-arguments lint.
/// `None` fields fall back to the config file, then to built-in defaults.
#[derive(Clone, Debug, Default)]
pub struct HandleSyncArgs {
    pub source: PathBuf,
    pub target: String,
    pub jobs: Option<usize>,
    pub bucket_size_mib: Option<u64>,
    pub rsync_args: Option<String>,
    pub rsync_path: Option<PathBuf>,
    pub ssh_path: Option<PathBuf>,
    pub failures_dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
    pub bar: bool,
    pub cancel: CancelToken,
    pub teardown: ForcedTeardown,
}

impl HandleSyncArgs {
    /// Merge with the config: flag > config file > default.
    pub fn resolve(&self, config: &Config) -> SyncOptions {
        SyncOptions {
            source: self.source.clone(),
            destination: self.target.clone(),
            jobs: self.jobs.unwrap_or(config.jobs),
            bucket_size_mib: self.bucket_size_mib.unwrap_or(config.bucket_size_mib),
            rsync_args: split_args(self.rsync_args.as_deref().unwrap_or(&config.rsync_args)),
            rsync_program: self.rsync_path.clone().unwrap_or_else(|| config.rsync_path.clone()),
            ssh_program: self.ssh_path.clone().unwrap_or_else(|| config.ssh_path.clone()),
        }
    }
}

// Module-private context used to reduce arg count for finalize_sync
struct FinalizeCtx {
    failures_dir: PathBuf,
    json_mode: bool,
    quiet_mode: bool,
}

/// 同步主入口 / sync entry point: validate, connect, run, report.
///
/// Returns the report for every run that got past setup, including partial
/// and interrupted ones; only setup problems are errors.
pub fn handle_sync(config: &Config, args: HandleSyncArgs) -> Result<SyncReport> {
    let opts = args.resolve(config);
    tracing::debug!("[sync] resolved options: {:?}", opts);
    let syncer = Syncer::prepare(opts).context("setup failed")?;
    tracing::info!("Syncing {} -> {}", syncer.source().display(), syncer.destination());

    let bar = if args.bar {
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({eta})",
        )
        .with_context(|| "invalid progress bar template")?
        .progress_chars("=> ");
        let pb = ProgressBar::new(0);
        pb.set_style(style);
        Some(pb)
    } else {
        None
    };

    if let Some(stop) = syncer.connection().and_then(ControlConnection::stop_handle) {
        args.teardown.arm(stop);
    }
    let report = syncer.run(&args.cancel, bar);
    syncer.close();
    args.teardown.disarm();

    let finalize_ctx = FinalizeCtx {
        failures_dir: args.failures_dir.clone().unwrap_or_else(|| config.failures_dir()),
        json_mode: args.json,
        quiet_mode: args.quiet,
    };
    finalize_sync(finalize_ctx, &report);
    Ok(report)
}

fn finalize_sync(ctx: FinalizeCtx, report: &SyncReport) {
    report.log_summary();
    if !ctx.quiet_mode {
        crate::util::print_summary(report);
    }

    let failures_path = write_failures_jsonl(&ctx.failures_dir, &report.failures);
    if !ctx.quiet_mode
        && let Some(ref p) = failures_path
    {
        println!("Failure list written to: {}", p.display());
    }

    if ctx.json_mode
        && let Some(line) = report.to_json_line(failures_path.as_deref())
    {
        println!("{}", line);
    }
}
