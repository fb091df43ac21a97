//! Process-wide signal bookkeeping (spec.md §5, §8): ten consecutive fatal
//! signals abort the process regardless of application-level shutdown
//! handling. Exposed through an explicit init call rather than a
//! module-level singleton, since it installs a real OS handler.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{error, warn};

const ABORT_AFTER_SIGNALS: u32 = 10;

/// Shared counter an installed signal handler increments; `node` owns the
/// `tokio::signal` listener loop and calls [`SignalCounter::record`] on
/// every SIGINT/SIGTERM.
#[derive(Clone)]
pub struct SignalCounter {
    count: Arc<AtomicU32>,
}

impl SignalCounter {
    pub fn new() -> Self {
        SignalCounter { count: Arc::new(AtomicU32::new(0)) }
    }

    /// Records one more fatal signal. Returns `true` once the abort
    /// threshold has been reached, in which case the caller must terminate
    /// the process immediately.
    pub fn record(&self) -> bool {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= ABORT_AFTER_SIGNALS {
            error!(count, "received {} signals, aborting process", ABORT_AFTER_SIGNALS);
            true
        } else {
            warn!(count, remaining = ABORT_AFTER_SIGNALS - count, "received shutdown signal");
            false
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Default for SignalCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenth_signal_trips_abort() {
        let counter = SignalCounter::new();
        for _ in 0..9 {
            assert!(!counter.record());
        }
        assert!(counter.record());
        assert_eq!(counter.count(), 10);
    }
}
