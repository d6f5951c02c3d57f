//! Result of one shutdown pass, handed to completion waiters

use std::time::Duration;

use crate::signals::Signal;

/// How the shutdown sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every operation and the final callback returned
    Done,
    /// The deadline guard fired; the final callback was skipped
    ForcedExit,
    /// The sequence task went away without publishing a result
    Abandoned,
}

/// How a single operation (or the final callback) finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Ok,
    Failed(String),
    Panicked(String),
}

impl OperationStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub name: String,
    pub status: OperationStatus,
    pub elapsed: Duration,
}

/// What waiters on a [`Completion`](crate::Completion) get back.
///
/// Informational only: failures were already logged when they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub outcome: Outcome,
    /// `None` when shutdown was started with [`Plan::trigger`](crate::Plan::trigger)
    pub signal: Option<Signal>,
    /// Operations that finished before the sequence ended, in completion order
    pub operations: Vec<OperationResult>,
    /// `None` if no final callback was set or it never ran
    pub final_callback: Option<OperationStatus>,
}

impl ShutdownReport {
    pub(crate) fn abandoned() -> Self {
        Self {
            outcome: Outcome::Abandoned,
            signal: None,
            operations: Vec::new(),
            final_callback: None,
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &OperationResult> {
        self.operations.iter().filter(|r| !r.status.is_ok())
    }

    pub fn operation(&self, name: &str) -> Option<&OperationResult> {
        self.operations.iter().find(|r| r.name == name)
    }

    /// Done, with no failed operation and no failed final callback
    pub fn is_clean(&self) -> bool {
        self.outcome == Outcome::Done
            && self.failed().next().is_none()
            && self.final_callback.as_ref().map_or(true, OperationStatus::is_ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, status: OperationStatus) -> OperationResult {
        OperationResult {
            name: name.to_string(),
            status,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn clean_report() {
        let report = ShutdownReport {
            outcome: Outcome::Done,
            signal: Some(Signal::Terminate),
            operations: vec![result("http", OperationStatus::Ok)],
            final_callback: Some(OperationStatus::Ok),
        };
        assert!(report.is_clean());
        assert_eq!(report.failed().count(), 0);
        assert!(report.operation("http").is_some());
        assert!(report.operation("db").is_none());
    }

    #[test]
    fn failed_operation_is_not_clean() {
        let report = ShutdownReport {
            outcome: Outcome::Done,
            signal: None,
            operations: vec![
                result("http", OperationStatus::Ok),
                result("db", OperationStatus::Failed("refused".to_string())),
            ],
            final_callback: None,
        };
        assert!(!report.is_clean());
        let failed: Vec<_> = report.failed().map(|r| r.name.as_str()).collect();
        assert_eq!(failed, vec!["db"]);
    }

    #[test]
    fn forced_exit_is_not_clean() {
        let report = ShutdownReport {
            outcome: Outcome::ForcedExit,
            ..ShutdownReport::abandoned()
        };
        assert!(!report.is_clean());
    }
}
