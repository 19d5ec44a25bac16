use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;

use prsync::cli::Cli;
use prsync::config::Config;
use prsync::sync::{CancelToken, EXIT_INTERRUPTED, ForcedTeardown, HandleSyncArgs, handle_sync};

fn main() {
    let cli = Cli::parse();
    let code = run(cli);
    std::process::exit(code);
}

// Returns the process exit code; the log guard is dropped (and --log-file
// flushed) before main exits.
fn run(cli: Cli) -> i32 {
    let _log_guard =
        match prsync::logging::init(cli.verbose, cli.bar || cli.quiet, cli.log_file.as_deref()) {
            Ok(g) => g,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                return 1;
            }
        };
    let config = Config::load(cli.config.as_deref());

    // First Ctrl-C cancels: running rsync processes are killed and the run
    // winds down with a report. A second one stops the ssh master and exits.
    let cancel = CancelToken::new();
    let handler_cancel = cancel.clone();
    let teardown = ForcedTeardown::new();
    let handler_teardown = teardown.clone();
    let interrupted_once = AtomicBool::new(false);
    if let Err(e) = ctrlc::set_handler(move || {
        if interrupted_once.swap(true, Ordering::SeqCst) {
            eprintln!("\nInterrupted again. Exiting (Ctrl-C)...");
            handler_teardown.run();
            std::process::exit(EXIT_INTERRUPTED);
        }
        eprintln!("\nInterrupted by user. Stopping running transfers (Ctrl-C again to force)...");
        handler_cancel.cancel();
    }) {
        tracing::warn!("Cannot install Ctrl-C handler: {}", e);
    }

    let args = HandleSyncArgs {
        source: cli.source,
        target: cli.target,
        jobs: cli.jobs,
        bucket_size_mib: cli.bucket_size,
        rsync_args: cli.rsync_args,
        rsync_path: cli.rsync_path,
        ssh_path: cli.ssh_path,
        failures_dir: cli.failures_dir,
        json: cli.json,
        quiet: cli.quiet,
        bar: cli.bar,
        cancel,
        teardown,
    };
    match handle_sync(&config, args) {
        Ok(report) => {
            if report.cancelled {
                eprintln!("Operation cancelled by user");
            }
            report.exit_code()
        }
        Err(e) => {
            tracing::debug!("run aborted: {:#}", e);
            eprintln!("Error: {:#}", e);
            1
        }
    }
}
