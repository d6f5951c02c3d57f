//! What happens when the shutdown deadline passes

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Capability invoked by the deadline guard once cleanup overran its timeout.
///
/// The production implementation never returns. Implementations that do
/// return let the plan finish in [`Phase::ForcedExit`](crate::Phase::ForcedExit)
/// instead, which is how embedding hosts and tests observe the overrun.
pub trait Abort: Send + Sync + 'static {
    fn abort(&self, timeout: Duration);
}

/// Terminates the process with `code`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExit {
    pub code: i32,
}

impl Abort for ProcessExit {
    fn abort(&self, timeout: Duration) {
        log::error!(
            "timeout {} ms has elapsed, force exit",
            timeout.as_millis()
        );
        log::logger().flush();
        std::process::exit(self.code);
    }
}

/// Counts how often it was asked to abort and returns normally.
#[derive(Debug, Default)]
pub struct RecordAbort {
    fired: AtomicUsize,
}

impl RecordAbort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fired(&self) -> usize {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Abort for RecordAbort {
    fn abort(&self, timeout: Duration) {
        log::warn!(
            "timeout {} ms has elapsed, abort requested",
            timeout.as_millis()
        );
        self.fired.fetch_add(1, Ordering::SeqCst);
    }
}
