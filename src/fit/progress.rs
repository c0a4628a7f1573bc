//! Progress reporting for the batch driver.
//!
//! The driver only knows the [`ProgressObserver`] trait. Observers are shared
//! between workers, so they count completed strands themselves.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use log::info;

/// How a single strand ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrandStatus {
    Guide,
    Solved,
    Failed,
}

pub trait ProgressObserver: Sync {
    /// Called once before any strand, with the task size.
    fn start(&self, _total: usize) {}

    /// Called after every strand of the task.
    fn strand_done(&self, strand: usize, status: StrandStatus);

    fn finish(&self) {}
}

/// Ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn strand_done(&self, _strand: usize, _status: StrandStatus) {}
}

/// Completed-strand counter with a percentage view.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    total: AtomicUsize,
    done: AtomicUsize,
}

impl ProgressCounter {
    pub fn reset(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.done.store(0, Ordering::Relaxed);
    }

    /// Record one strand; returns the number completed so far.
    pub fn tick(&self) -> usize {
        self.done.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }

    /// Completion in percent (0..=100). An empty task counts as complete.
    pub fn percent(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 100.0;
        }
        100.0 * self.done() as f64 / total as f64
    }
}

/// Logs an `info` line every `step` percent.
#[derive(Debug)]
pub struct LogProgress {
    counter: ProgressCounter,
    step: f64,
    next: AtomicUsize,
}

impl LogProgress {
    pub fn new(step_percent: f64) -> Self {
        Self {
            counter: ProgressCounter::default(),
            step: step_percent.clamp(1.0, 100.0),
            next: AtomicUsize::new(1),
        }
    }
}

impl ProgressObserver for LogProgress {
    fn start(&self, total: usize) {
        self.counter.reset(total);
        self.next.store(1, Ordering::Relaxed);
    }

    fn strand_done(&self, _strand: usize, _status: StrandStatus) {
        self.counter.tick();
        let percent = self.counter.percent();
        let bucket = (percent / self.step).floor() as usize;
        // Only the worker that moves `next` past the bucket logs it.
        let mut next = self.next.load(Ordering::Relaxed);
        while bucket >= next {
            match self
                .next
                .compare_exchange(next, bucket + 1, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => {
                    info!("Estimated {:.0}% of the task ({} strands)", percent, self.counter.done());
                    break;
                }
                Err(current) => next = current,
            }
        }
    }
}

/// Terminal progress bar.
pub struct BarProgress {
    bar: ProgressBar,
    failed: AtomicUsize,
}

impl BarProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(1);
        let style = ProgressStyle::with_template(
            "{bar:40.cyan/blue} {pos}/{len} ({percent:>3}%) | {per_sec} | ETA {eta_precise} | {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self {
            bar,
            failed: AtomicUsize::new(0),
        }
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for BarProgress {
    fn start(&self, total: usize) {
        self.bar.set_length(total.max(1) as u64);
        self.bar.set_position(0);
        self.bar.enable_steady_tick(Duration::from_millis(200));
    }

    fn strand_done(&self, strand: usize, status: StrandStatus) {
        if status == StrandStatus::Failed {
            let failed = self.failed.fetch_add(1, Ordering::Relaxed) + 1;
            self.bar.set_message(format!("strand {strand} failed ({failed} total)"));
        }
        self.bar.inc(1);
    }

    fn finish(&self) {
        self.bar.disable_steady_tick();
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_reports_percent() {
        let counter = ProgressCounter::default();
        counter.reset(4);
        assert_eq!(counter.percent(), 0.0);
        counter.tick();
        counter.tick();
        assert!((counter.percent() - 50.0).abs() < 1e-12);
        counter.reset(0);
        assert_eq!(counter.percent(), 100.0);
    }

    #[test]
    fn log_progress_advances_through_buckets() {
        let progress = LogProgress::new(25.0);
        progress.start(8);
        for s in 0..8 {
            progress.strand_done(s, StrandStatus::Solved);
        }
        assert_eq!(progress.counter.done(), 8);
        // 100% lands in bucket 4, so the next bucket to log is 5.
        assert_eq!(progress.next.load(Ordering::Relaxed), 5);
    }
}
