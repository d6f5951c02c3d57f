//! Error types for plan configuration

/// Invalid [`PlanConfig`](crate::PlanConfig).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// Signal name not recognized (e.g. `"SIGFOO"`)
    UnknownSignal(String),
    /// No signal to wait for
    NoSignals,
    /// Timeout must leave some time for cleanup
    ZeroTimeout,
    /// `max_concurrency = 0` would never dispatch anything
    ZeroConcurrency,
}

impl std::fmt::Display for PlanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownSignal(name) => write!(f, "unknown signal: {name}"),
            Self::NoSignals => write!(f, "at least one termination signal is required"),
            Self::ZeroTimeout => write!(f, "timeout must be greater than zero"),
            Self::ZeroConcurrency => write!(f, "max_concurrency must be greater than zero"),
        }
    }
}

impl std::error::Error for PlanError {}
