use std::sync::Mutex;

use indicatif::ProgressBar;

/// Snapshot of the shared counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub total: u64,
    pub completed: u64,
}

impl Counts {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.completed as f64 / self.total as f64) * 100.0
        }
    }
}

/// Completed-file counter shared by all workers. Every mutation goes through
/// the one mutex; the lock is never held across I/O.
#[derive(Debug)]
pub struct Progress {
    counts: Mutex<Counts>,
    bar: Option<ProgressBar>,
}

impl Progress {
    pub fn new(total: u64) -> Self {
        Self { counts: Mutex::new(Counts { total, completed: 0 }), bar: None }
    }

    /// Mirror every update onto an indicatif bar.
    pub fn with_bar(mut self, bar: ProgressBar) -> Self {
        bar.set_length(self.snapshot().total);
        self.bar = Some(bar);
        self
    }

    /// Add `n` completed files and return the counts as seen right after the
    /// increment. Completed never exceeds total.
    pub fn credit(&self, n: u64) -> Counts {
        let after = {
            let mut c = self.counts.lock().unwrap_or_else(|e| e.into_inner());
            c.completed = c.completed.saturating_add(n).min(c.total);
            *c
        };
        if let Some(bar) = &self.bar {
            bar.set_position(after.completed);
        }
        after
    }

    pub fn snapshot(&self) -> Counts {
        *self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}
