//! # Progress Reporting
//!
//! Long-running stages (spatial matching, rescaling, metric computation)
//! report coarse progress, at most once per processed row or unit.
//!
//! Reporters are advisory: they receive counts only and have no access to
//! engine state.

/// Receiver of progress notifications.
pub trait Progress {
    /// Called after `done` of `total` items of `stage` have been processed.
    fn report(&self, stage: &str, done: usize, total: usize);
}

/// Reporter that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn report(&self, _stage: &str, _done: usize, _total: usize) {}
}

/// Reporter that logs every tenth of the work through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl Progress for TracingProgress {
    fn report(&self, stage: &str, done: usize, total: usize) {
        let step = (total / 10).max(1);
        if done == total || done % step == 0 {
            tracing::info!(stage, done, total, "progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Recorder(RefCell<Vec<(usize, usize)>>);

    impl Progress for Recorder {
        fn report(&self, _stage: &str, done: usize, total: usize) {
            self.0.borrow_mut().push((done, total));
        }
    }

    #[test]
    fn custom_reporters_receive_counts() {
        let recorder = Recorder(RefCell::new(Vec::new()));
        let reporter: &dyn Progress = &recorder;
        reporter.report("test", 1, 2);
        reporter.report("test", 2, 2);
        assert_eq!(*recorder.0.borrow(), vec![(1, 2), (2, 2)]);
        NoProgress.report("test", 1, 1);
        TracingProgress.report("test", 1, 1);
    }
}
