//! exitplan - graceful shutdown for long-running servers
//!
//! On a termination signal a [`Plan`] stops advertising readiness, notifies
//! listeners, waits a grade period for in-flight work to drain, runs every
//! registered cleanup operation concurrently under a hard deadline, then runs
//! one final callback before releasing waiters.

pub mod abort;
pub mod error;
pub mod guard;
pub mod logging;
pub mod notifier;
pub mod operation;
pub mod phase;
pub mod plan;
pub mod readiness;
pub mod registry;
pub mod report;
pub mod signals;

// Re-exports for convenience
pub use abort::{Abort, ProcessExit, RecordAbort};
pub use error::PlanError;
pub use logging::init_logging;
pub use notifier::Listener;
pub use operation::{ExitContext, ExitOperation};
pub use phase::Phase;
pub use plan::{Completion, DEFAULT_GRADE_PERIOD, DEFAULT_TIMEOUT, Plan, PlanConfig};
pub use readiness::Readiness;
pub use report::{OperationResult, OperationStatus, Outcome, ShutdownReport};
pub use signals::{Signal, default_signals};
pub use tokio_util::sync::CancellationToken;
