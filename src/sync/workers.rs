use std::time::Instant;

use crossbeam_channel::unbounded;

use super::cancel::CancelToken;
use super::probe::{ExistenceProbe, filter_bucket};
use super::progress::Progress;
use super::report::TransferOutcome;
use super::transport::{Job, Transport, discard_manifest, write_manifest};

/// Shared, borrowed state handed to every worker.
pub(crate) struct WorkersCtx<'a> {
    pub(crate) workers: usize,
    pub(crate) probe: &'a dyn ExistenceProbe,
    pub(crate) transport: &'a dyn Transport,
    pub(crate) progress: &'a Progress,
    pub(crate) cancel: &'a CancelToken,
}

/// What a worker reports for one job it picked up.
#[derive(Debug)]
pub(crate) enum JobStatus {
    Finished(TransferOutcome),
    Cancelled(usize),
}

/// Outcomes drained from the workers after the pool has joined.
#[derive(Debug, Default)]
pub(crate) struct WorkerTally {
    pub(crate) outcomes: Vec<TransferOutcome>,
    pub(crate) cancelled: usize,
}

/// Worker count bounded by the number of jobs (at least one).
pub(crate) fn calc_workers(requested: usize, total_jobs: usize) -> usize {
    let workers = if requested == 0 { 1 } else { requested };
    std::cmp::min(workers, std::cmp::max(1, total_jobs))
}

/// Run every job on a pool of `ctx.workers` threads and block until all of
/// them are done. A failing job never stops its siblings; once `ctx.cancel`
/// is set, jobs not yet picked up are reported as cancelled.
pub(crate) fn run_workers(ctx: &WorkersCtx<'_>, jobs: Vec<Job<'_>>) -> WorkerTally {
    let (job_tx, job_rx) = unbounded::<Job<'_>>();
    let (status_tx, status_rx) = unbounded::<JobStatus>();
    for job in jobs {
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    std::thread::scope(|s| {
        for worker_id in 0..ctx.workers {
            let job_rx = job_rx.clone();
            let status_tx = status_tx.clone();
            s.spawn(move || {
                let worker_start = Instant::now();
                let mut handled = 0usize;
                while let Ok(job) = job_rx.recv() {
                    let status = if ctx.cancel.is_cancelled() {
                        JobStatus::Cancelled(job.id)
                    } else {
                        tracing::debug!(
                            "[sync][worker] worker_id={} picked job {} ({} files)",
                            worker_id,
                            job.id,
                            job.bucket.len()
                        );
                        handled += 1;
                        execute_job(&job, ctx)
                    };
                    let _ = status_tx.send(status);
                }
                tracing::debug!(
                    "[sync][worker] worker_id={} done: jobs={} elapsed={:.1}s",
                    worker_id,
                    handled,
                    worker_start.elapsed().as_secs_f64()
                );
            });
        }
    });
    drop(status_tx);

    let mut tally = WorkerTally::default();
    for status in status_rx.iter() {
        match status {
            JobStatus::Finished(o) => tally.outcomes.push(o),
            JobStatus::Cancelled(id) => {
                tracing::debug!("[sync][worker] job {} cancelled", id);
                tally.cancelled += 1;
            }
        }
    }
    tally.outcomes.sort_by_key(|o| o.job_id);
    tally
}

/// Filter, write the manifest, transfer, credit. Exactly one status per job.
pub(crate) fn execute_job(job: &Job<'_>, ctx: &WorkersCtx<'_>) -> JobStatus {
    let filtered = match filter_bucket(ctx.probe, &job.bucket, ctx.cancel) {
        Ok(f) => f,
        Err(_) => return JobStatus::Cancelled(job.id),
    };

    if !filtered.skipped.is_empty() {
        for e in &filtered.skipped {
            tracing::debug!("[sync][worker] job {} skipping existing file: {}", job.id, e.rel_path);
        }
        let c = ctx.progress.credit(filtered.skipped.len() as u64);
        tracing::info!(
            "Skipping {} existing files (job {}) - Progress: {:.1}% ({}/{})",
            filtered.skipped.len(),
            job.id,
            c.percent(),
            c.completed,
            c.total
        );
    }

    let pending = filtered.pending.len();
    if pending == 0 {
        return JobStatus::Finished(TransferOutcome::ok(job.id, 0));
    }

    let manifest = match write_manifest(&filtered.pending) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("Rsync failed for job {}: {}", job.id, e);
            return JobStatus::Finished(TransferOutcome::failed(
                job.id,
                pending,
                e.variant(),
                e.to_string(),
            ));
        }
    };
    let res = ctx.transport.transfer(job, manifest.path(), ctx.cancel);
    discard_manifest(manifest, job.id);

    match res {
        Ok(()) => {
            let c = ctx.progress.credit(pending as u64);
            tracing::info!("Progress: {:.1}% ({}/{})", c.percent(), c.completed, c.total);
            JobStatus::Finished(TransferOutcome::ok(job.id, pending))
        }
        // Ctrl-C also reaches rsync itself, which may exit before the poll sees the token
        Err(e) if e.is_cancelled() || ctx.cancel.is_cancelled() => {
            tracing::warn!("[sync][worker] job {} interrupted", job.id);
            JobStatus::Cancelled(job.id)
        }
        Err(e) => {
            tracing::error!("Rsync failed for job {}", job.id);
            tracing::error!("stderr: {}", e);
            let outcome = TransferOutcome::failed(job.id, pending, e.variant(), e.to_string());
            JobStatus::Finished(outcome)
        }
    }
}
