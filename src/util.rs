use std::io::IsTerminal;

use owo_colors::OwoColorize;

use crate::sync::SyncReport;

/// Convert a byte count into a human readable string using IEC units (KiB/MiB/GiB).
pub fn human_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GiB", b / GB)
    } else if b >= MB {
        format!("{:.2} MiB", b / MB)
    } else if b >= KB {
        format!("{:.2} KiB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// Average throughput over the whole tree in MiB/s; zero for an instant run.
pub fn average_rate_mib(total_bytes: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 { total_bytes as f64 / 1024.0 / 1024.0 / elapsed_secs } else { 0.0 }
}

/// Plain summary line, without colors.
pub fn summary_line(report: &SyncReport) -> String {
    format!(
        "{}/{} files ({} sent, {} already present) in {} buckets | {} | {:.2}s | {:.2} MiB/s",
        report.completed_files,
        report.total_files,
        report.transferred_files,
        report.skipped_files,
        report.buckets,
        human_bytes(report.total_bytes),
        report.elapsed_secs,
        average_rate_mib(report.total_bytes, report.elapsed_secs)
    )
}

/// Print the human summary for a finished run to stdout. Colors only when
/// stdout is a terminal.
pub fn print_summary(report: &SyncReport) {
    let line = summary_line(report);
    let color = std::io::stdout().is_terminal();
    let status = if report.cancelled {
        "Interrupted"
    } else if report.failed_jobs > 0 {
        "Partial"
    } else {
        "Done"
    };
    if !color {
        println!("{}: {}", status, line);
    } else if report.cancelled {
        println!("{}: {}", status.yellow().bold(), line);
    } else if report.failed_jobs > 0 {
        println!("{}: {}", status.red().bold(), line);
    } else {
        println!("{}: {}", status.green().bold(), line);
    }
    if report.failed_jobs > 0 {
        let msg = format!("{} of {} buckets failed", report.failed_jobs, report.buckets);
        if color {
            println!("{}", msg.red());
        } else {
            println!("{}", msg);
        }
    }
    if report.scan_warnings > 0 {
        let msg = format!("{} entries could not be read during the scan", report.scan_warnings);
        if color {
            println!("{}", msg.yellow());
        } else {
            println!("{}", msg);
        }
    }
}
