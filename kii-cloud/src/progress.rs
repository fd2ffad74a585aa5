//! Transfer progress reporting.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

type Handler = Box<dyn Fn(f64) + Send + Sync>;

struct Inner {
    handler: Handler,
    last: Mutex<Option<f64>>,
}

/// A progress handler for body uploads and downloads.
///
/// The handler sees fractions in `[0, 1]`, never decreasing, and never the
/// same value twice in a row. Cloning shares the handler and its high-water
/// mark.
#[derive(Clone)]
pub struct Progress {
    inner: Arc<Inner>,
}

impl Progress {
    /// Wraps a handler.
    pub fn new(handler: impl Fn(f64) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                handler: Box::new(handler),
                last: Mutex::new(None),
            }),
        }
    }

    /// Reports a completed fraction. Out-of-range values are clamped; values
    /// below the last reported one and NaN are dropped.
    pub fn report(&self, fraction: f64) {
        if fraction.is_nan() {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        let mut last = self.inner.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.is_some_and(|prev| fraction <= prev) {
            return;
        }
        *last = Some(fraction);
        (self.inner.handler)(fraction);
    }

    /// Reports `done` of `total` bytes. An empty transfer is complete.
    pub fn report_bytes(&self, done: u64, total: u64) {
        if total == 0 {
            self.report(1.0);
        } else {
            self.report(done as f64 / total as f64);
        }
    }

    /// The highest fraction reported so far.
    pub fn last(&self) -> Option<f64> {
        *self.inner.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress").field("last", &self.last()).finish()
    }
}
