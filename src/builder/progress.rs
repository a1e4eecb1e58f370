//! Progress bar observer.

use std::sync::atomic::{AtomicUsize, Ordering};

use indicatif::{ProgressBar, ProgressStyle};

use crate::builder::events::{BuildEvent, BuildObserver};

/// Drives an `indicatif` progress bar from build events and counts what
/// happened during the run.
pub struct ProgressObserver {
    bar: ProgressBar,
    finished: AtomicUsize,
    fresh: AtomicUsize,
    failed: AtomicUsize,
}

impl ProgressObserver {
    /// Progress bar drawn to stderr.
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self::with_bar(bar)
    }

    /// Counts events without drawing anything.
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::hidden())
    }

    fn with_bar(bar: ProgressBar) -> Self {
        ProgressObserver {
            bar,
            finished: AtomicUsize::new(0),
            fresh: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    /// Builders that completed, whether they ran or were reused from cache.
    pub fn finished_count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    /// Builders whose previous outputs were reused.
    pub fn fresh_count(&self) -> usize {
        self.fresh.load(Ordering::SeqCst)
    }

    pub fn failed_count(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Fraction of the run completed.
    pub fn progress(&self) -> f64 {
        let total = self.bar.length().unwrap_or(0);
        if total == 0 {
            1.0
        } else {
            self.bar.position() as f64 / total as f64
        }
    }
}

impl Default for ProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildObserver for ProgressObserver {
    fn on_event(&self, event: &BuildEvent) {
        match event {
            BuildEvent::RunStarted { builders, .. } => {
                self.finished.store(0, Ordering::SeqCst);
                self.fresh.store(0, Ordering::SeqCst);
                self.failed.store(0, Ordering::SeqCst);
                self.bar.set_length(*builders);
                self.bar.set_position(0);
            }
            BuildEvent::BuilderStarted { builder, .. } => {
                self.bar.set_message(builder.to_string());
            }
            BuildEvent::CacheHit { .. } => {
                self.fresh.fetch_add(1, Ordering::SeqCst);
            }
            BuildEvent::CacheMiss { .. } => {}
            BuildEvent::BuilderFinished { .. } => {
                self.finished.fetch_add(1, Ordering::SeqCst);
                self.bar.inc(1);
            }
            BuildEvent::BuilderFailed { builder, .. } => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                self.bar.set_message(format!("{} failed", builder));
            }
            BuildEvent::RunFinished { success, .. } => {
                if *success {
                    self.bar.finish_with_message("done");
                } else {
                    self.bar.abandon();
                }
            }
        }
    }
}
