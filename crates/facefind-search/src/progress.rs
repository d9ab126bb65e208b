//! Progress events and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One observational progress update. Not retained by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    pub message: String,
}

/// Synchronous observer invoked from the engine's suspension points.
pub type ProgressFn<'a> = &'a (dyn Fn(Progress) + Send + Sync);

/// Observer that ignores every update.
pub fn ignore_progress(_: Progress) {}

/// Forwards updates to the observer, keeping `processed` monotonic and `<= total`.
pub(crate) struct ProgressReporter<'a> {
    sink: ProgressFn<'a>,
    total: usize,
    processed: usize,
}

impl<'a> ProgressReporter<'a> {
    pub(crate) fn new(sink: ProgressFn<'a>, total: usize) -> Self {
        Self {
            sink,
            total,
            processed: 0,
        }
    }

    pub(crate) fn total(&self) -> usize {
        self.total
    }

    pub(crate) fn report(&mut self, processed: usize, message: impl Into<String>) {
        self.processed = processed.min(self.total).max(self.processed);
        (self.sink)(Progress {
            processed: self.processed,
            total: self.total,
            message: message.into(),
        });
    }
}

/// Cancellation flag checked at chunk and batch boundaries.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_reporter_is_monotonic_and_clamped() {
        let seen = Mutex::new(Vec::new());
        let sink = |p: Progress| seen.lock().unwrap().push(p.processed);
        let mut reporter = ProgressReporter::new(&sink, 10);
        reporter.report(4, "a");
        reporter.report(2, "b");
        reporter.report(50, "c");
        assert_eq!(*seen.lock().unwrap(), vec![4, 4, 10]);
    }

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
