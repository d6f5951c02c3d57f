//! The shutdown orchestrator
//!
//! A [`Plan`] collects cleanup operations while the process runs. Once
//! started it waits for a termination signal, flips readiness, notifies
//! listeners, sleeps the grade period, then runs every registered operation
//! concurrently under a deadline guard, and finally runs the final callback.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::abort::{Abort, ProcessExit};
use crate::error::PlanError;
use crate::guard::DeadlineGuard;
use crate::notifier::{Listener, Notifier};
use crate::operation::{ExitContext, ExitOperation};
use crate::phase::{Phase, PhaseCell};
use crate::readiness::Readiness;
use crate::registry::Registry;
use crate::report::{OperationResult, OperationStatus, Outcome, ShutdownReport};
use crate::signals::{self, default_signals, Signal};

/// Default drain period between signal and cleanup
pub const DEFAULT_GRADE_PERIOD: Duration = Duration::from_secs(5);

/// Default upper bound on cleanup duration
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Settings fixed before a plan starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanConfig {
    /// Signals that start the shutdown sequence
    pub signals: Vec<Signal>,
    /// Delay after the signal, before cleanup, while readiness already fails
    pub grade_period: Duration,
    /// Deadline for all cleanup operations, measured from dispatch
    pub timeout: Duration,
    /// Cap on operations running at once (`None` = all at once)
    pub max_concurrency: Option<usize>,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            signals: default_signals(),
            grade_period: DEFAULT_GRADE_PERIOD,
            timeout: DEFAULT_TIMEOUT,
            max_concurrency: None,
        }
    }
}

impl PlanConfig {
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.signals.is_empty() {
            return Err(PlanError::NoSignals);
        }
        if self.timeout.is_zero() {
            return Err(PlanError::ZeroTimeout);
        }
        if self.max_concurrency == Some(0) {
            return Err(PlanError::ZeroConcurrency);
        }
        Ok(())
    }
}

/// Handle released when the shutdown sequence has finished.
///
/// Cheap to clone; every clone observes the same report.
#[derive(Debug, Clone)]
pub struct Completion {
    rx: watch::Receiver<Option<ShutdownReport>>,
}

impl Completion {
    /// Wait for the sequence to finish.
    ///
    /// With the default [`ProcessExit`] abort, an overrun deadline ends the
    /// process and this never returns.
    pub async fn wait(&self) -> ShutdownReport {
        let mut rx = self.rx.clone();
        let report = match rx.wait_for(Option::is_some).await {
            Ok(report) => (*report).clone(),
            Err(_) => None,
        };
        report.unwrap_or_else(ShutdownReport::abandoned)
    }

    /// Report, if the sequence already finished
    pub fn try_report(&self) -> Option<ShutdownReport> {
        self.rx.borrow().clone()
    }

    pub fn is_complete(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

/// Graceful-shutdown orchestrator; one per process, one shutdown pass.
pub struct Plan {
    config: PlanConfig,
    abort: Arc<dyn Abort>,
    registry: Registry,
    final_callback: Mutex<Option<Arc<dyn ExitOperation>>>,
    phase: PhaseCell,
    notifier: Notifier,
    trigger: CancellationToken,
    started: Mutex<Option<Completion>>,
}

impl Plan {
    /// Plan with a 5s grade period and a 20s timeout
    pub fn new() -> Self {
        Self::with_timer(DEFAULT_GRADE_PERIOD, DEFAULT_TIMEOUT)
    }

    pub fn with_timer(grade_period: Duration, timeout: Duration) -> Self {
        Self::build(PlanConfig {
            grade_period,
            timeout,
            ..PlanConfig::default()
        })
    }

    pub fn from_config(config: PlanConfig) -> Result<Self, PlanError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: PlanConfig) -> Self {
        Self {
            config,
            abort: Arc::new(ProcessExit::default()),
            registry: Registry::new(),
            final_callback: Mutex::new(None),
            phase: PhaseCell::new(),
            notifier: Notifier::new(),
            trigger: CancellationToken::new(),
            started: Mutex::new(None),
        }
    }

    pub fn with_signals(mut self, signals: impl IntoIterator<Item = Signal>) -> Self {
        self.config.signals = signals.into_iter().collect();
        self
    }

    pub fn with_grade_period(mut self, grade_period: Duration) -> Self {
        self.config.grade_period = grade_period;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.config.max_concurrency = Some(limit);
        self
    }

    /// Replace what happens when the deadline passes (default: [`ProcessExit`])
    pub fn with_abort(mut self, abort: Arc<dyn Abort>) -> Self {
        self.abort = abort;
        self
    }

    pub fn config(&self) -> &PlanConfig {
        &self.config
    }

    /// Register `op` under `name`, replacing any previous operation of that name.
    ///
    /// Registrations made after the grade period has elapsed are not run.
    pub fn add(&self, name: impl Into<String>, op: impl ExitOperation) -> &Self {
        self.registry.add(name, Arc::new(op));
        self
    }

    pub fn add_many<I, S>(&self, ops: I) -> &Self
    where
        I: IntoIterator<Item = (S, Arc<dyn ExitOperation>)>,
        S: Into<String>,
    {
        self.registry.add_many(ops);
        self
    }

    /// Set the callback run after every operation finished; replaces any previous one
    pub fn finally(&self, op: impl ExitOperation) -> &Self {
        let op: Arc<dyn ExitOperation> = Arc::new(op);
        *lock(&self.final_callback) = Some(op);
        self
    }

    /// Names of the registered operations, sorted
    pub fn registered(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    /// True from the moment a termination signal arrives, forever after
    pub fn is_terminating(&self) -> bool {
        self.phase.get().is_terminating()
    }

    /// Probe answer for a `/readyz` endpoint
    pub fn readiness(&self) -> Readiness {
        Readiness::of(self.is_terminating())
    }

    /// One-shot handle resolving when shutdown begins.
    ///
    /// A listener created after shutdown began is already signaled.
    pub fn new_listener(&self) -> Listener {
        self.notifier.subscribe()
    }

    /// Start shutdown as if a signal had arrived. Takes effect once started.
    pub fn trigger(&self) {
        self.trigger.cancel();
    }

    /// Spawn the shutdown sequence and return its completion handle.
    ///
    /// Calling this again returns the handle of the sequence already running.
    /// Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>, ctx: CancellationToken) -> Completion {
        let mut started = lock(&self.started);
        if let Some(completion) = started.as_ref() {
            log::debug!("shutdown sequence already started");
            return completion.clone();
        }

        let (tx, rx) = watch::channel(None);
        let completion = Completion { rx };
        *started = Some(completion.clone());
        self.phase.advance(Phase::SignalWait);

        let plan = Arc::clone(self);
        tokio::spawn(async move {
            let report = plan.run(ExitContext::new(ctx)).await;
            tx.send_replace(Some(report));
        });
        completion
    }

    /// Start (if needed) and wait until the sequence finished
    pub async fn wait(self: &Arc<Self>, ctx: CancellationToken) -> ShutdownReport {
        self.start(ctx).wait().await
    }

    async fn run(self: Arc<Self>, ctx: ExitContext) -> ShutdownReport {
        let signal = self.wait_for_signal().await;
        match signal {
            Some(sig) => log::info!("{sig} received..."),
            None => log::info!("shutdown triggered..."),
        }

        // Stop advertising readiness before anyone is told, and tell everyone
        // before the drain sleep starts
        self.phase.advance(Phase::Draining);
        let notified = self.notifier.broadcast();
        log::debug!("notified {notified} termination listeners");

        if !self.config.grade_period.is_zero() {
            log::info!(
                "waiting {:?} for connections to drain",
                self.config.grade_period
            );
            tokio::time::sleep(self.config.grade_period).await;
        }

        self.phase.advance(Phase::Terminating);
        let mut report = ShutdownReport {
            outcome: Outcome::Done,
            signal,
            operations: Vec::new(),
            final_callback: None,
        };
        if let Err(unfinished) = self.dispatch(&ctx, &mut report).await {
            self.phase.advance(Phase::ForcedExit);
            report.outcome = Outcome::ForcedExit;
            log::error!(
                "shutdown aborted after {:?}: {unfinished} exit operations unfinished, final callback skipped",
                self.config.timeout
            );
            return report;
        }

        self.phase.advance(Phase::FinalCallback);
        let final_callback = lock(&self.final_callback).clone();
        if let Some(op) = final_callback {
            let result = dispose("final".to_string(), op, ctx, None).await;
            report.final_callback = Some(result.status);
        }

        self.phase.advance(Phase::Done);
        log::info!(
            "shutdown complete: {} exit operations, {} failed",
            report.operations.len(),
            report.failed().count()
        );
        report
    }

    async fn wait_for_signal(&self) -> Option<Signal> {
        let os_signal = async {
            match signals::wait_for_any(&self.config.signals).await {
                Ok(sig) => Some(sig),
                Err(e) => {
                    log::error!("unable to listen for shutdown signals: {e}");
                    std::future::pending::<Option<Signal>>().await
                }
            }
        };
        tokio::select! {
            sig = os_signal => sig,
            () = self.trigger.cancelled() => None,
        }
    }

    /// Run a snapshot of the registry under the deadline guard.
    ///
    /// Fails with the number of unfinished operations if the guard fired first.
    async fn dispatch(
        &self,
        ctx: &ExitContext,
        report: &mut ShutdownReport,
    ) -> Result<(), usize> {
        let timeout = self.config.timeout;
        let mut guard = DeadlineGuard::arm(timeout, self.abort.clone());
        let op_ctx = ctx.with_deadline(Instant::now() + timeout);

        if self.registry.is_empty() {
            log::info!("no exit operations registered");
        }
        let ops = self.registry.snapshot();
        log::info!("shutting down: {} exit operations", ops.len());
        report.operations.reserve(ops.len());

        let limit = self
            .config
            .max_concurrency
            .map(|n| Arc::new(Semaphore::new(n)));
        let mut tasks = JoinSet::new();
        for (name, op) in ops {
            tasks.spawn(dispose(name, op, op_ctx.clone(), limit.clone()));
        }

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(result)) => report.operations.push(result),
                    Some(Err(e)) => log::error!("exit operation task failed: {e}"),
                    None => break,
                },
                () = guard.fired() => {
                    let unfinished = tasks.len();
                    tasks.abort_all();
                    return Err(unfinished);
                }
            }
        }

        if guard.disarm() {
            return Ok(());
        }
        // Deadline passed before the last operation returned, possibly while
        // it held the runtime thread
        guard.fired().await;
        Err(0)
    }
}

impl Default for Plan {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan")
            .field("config", &self.config)
            .field("phase", &self.phase.get())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Run one operation, turning errors and panics into a status
async fn dispose(
    name: String,
    op: Arc<dyn ExitOperation>,
    ctx: ExitContext,
    limit: Option<Arc<Semaphore>>,
) -> OperationResult {
    let _permit = match limit {
        Some(sem) => sem.acquire_owned().await.ok(),
        None => None,
    };

    log::info!("disposing: {name}");
    let start = Instant::now();
    let status = match AssertUnwindSafe(async move { op.run(ctx).await })
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => {
            log::info!("{name} was disposed gracefully");
            OperationStatus::Ok
        }
        Ok(Err(e)) => {
            log::error!("{name}: dispose failed: {e:#}");
            OperationStatus::Failed(format!("{e:#}"))
        }
        Err(panic) => {
            let msg = panic_message(panic.as_ref());
            log::error!("{name}: dispose panicked: {msg}");
            OperationStatus::Panicked(msg)
        }
    };

    OperationResult {
        name,
        status,
        elapsed: start.elapsed(),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::RecordAbort;

    fn test_plan(grade_period: Duration, timeout: Duration) -> Arc<Plan> {
        Arc::new(
            Plan::with_timer(grade_period, timeout)
                .with_signals([Signal::User2])
                .with_abort(Arc::new(RecordAbort::new())),
        )
    }

    #[test]
    fn defaults() {
        let plan = Plan::new();
        assert_eq!(plan.config().grade_period, Duration::from_secs(5));
        assert_eq!(plan.config().timeout, Duration::from_secs(20));
        assert_eq!(plan.config().signals, default_signals());
        assert_eq!(plan.phase(), Phase::Idle);
        assert!(!plan.is_terminating());
        assert_eq!(plan.readiness(), Readiness::Ready);
    }

    #[test]
    fn from_config_validates() {
        let bad = PlanConfig {
            timeout: Duration::ZERO,
            ..PlanConfig::default()
        };
        assert_eq!(Plan::from_config(bad).unwrap_err(), PlanError::ZeroTimeout);

        let bad = PlanConfig {
            signals: vec![],
            ..PlanConfig::default()
        };
        assert_eq!(Plan::from_config(bad).unwrap_err(), PlanError::NoSignals);

        let bad = PlanConfig {
            max_concurrency: Some(0),
            ..PlanConfig::default()
        };
        assert_eq!(Plan::from_config(bad).unwrap_err(), PlanError::ZeroConcurrency);

        assert!(Plan::from_config(PlanConfig::default()).is_ok());
    }

    #[test]
    fn add_chains_and_overwrites() {
        let plan = Plan::new();
        plan.add("http", |_ctx: ExitContext| async { anyhow::Ok(()) })
            .add("db", |_ctx: ExitContext| async { anyhow::Ok(()) })
            .add("http", |_ctx: ExitContext| async { anyhow::Ok(()) });
        assert_eq!(plan.registered(), vec!["db".to_string(), "http".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_shares_completion() {
        let plan = test_plan(Duration::ZERO, Duration::from_secs(1));
        let first = plan.start(CancellationToken::new());
        let second = plan.start(CancellationToken::new());
        assert_eq!(plan.phase(), Phase::SignalWait);

        plan.trigger();
        let a = first.wait().await;
        let b = second.wait().await;
        assert_eq!(a, b);
        assert_eq!(a.outcome, Outcome::Done);
        assert!(first.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_before_start() {
        let plan = test_plan(Duration::ZERO, Duration::from_secs(1));
        plan.trigger();
        let report = plan.wait(CancellationToken::new()).await;
        assert_eq!(report.outcome, Outcome::Done);
        assert_eq!(report.signal, None);
        assert_eq!(plan.phase(), Phase::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn try_report_before_and_after() {
        let plan = test_plan(Duration::ZERO, Duration::from_secs(1));
        let completion = plan.start(CancellationToken::new());
        assert!(completion.try_report().is_none());
        plan.trigger();
        completion.wait().await;
        assert!(completion.try_report().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn operations_see_deadline_and_token() {
        let plan = test_plan(Duration::ZERO, Duration::from_secs(10));
        let token = CancellationToken::new();
        token.cancel();
        plan.add("check", |ctx: ExitContext| async move {
            anyhow::ensure!(ctx.is_cancelled(), "token not passed through");
            anyhow::ensure!(
                ctx.remaining() == Some(Duration::from_secs(10)),
                "deadline not set"
            );
            Ok(())
        });
        plan.trigger();
        let report = plan.wait(token).await;
        assert!(report.is_clean(), "{report:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_operation_is_recorded() {
        let plan = test_plan(Duration::ZERO, Duration::from_secs(1));
        plan.add("boom", |_ctx: ExitContext| async {
            if true {
                panic!("kaboom");
            }
            anyhow::Ok(())
        });
        plan.add("fine", |_ctx: ExitContext| async { anyhow::Ok(()) });
        plan.trigger();
        let report = plan.wait(CancellationToken::new()).await;

        assert_eq!(report.outcome, Outcome::Done);
        assert_eq!(
            report.operation("boom").unwrap().status,
            OperationStatus::Panicked("kaboom".to_string())
        );
        assert!(report.operation("fine").unwrap().status.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_limit_serializes() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let plan = Arc::new(
            Plan::with_timer(Duration::ZERO, Duration::from_secs(60))
                .with_signals([Signal::User2])
                .with_max_concurrency(1)
                .with_abort(Arc::new(RecordAbort::new())),
        );
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for i in 0..4 {
            let running = running.clone();
            let peak = peak.clone();
            plan.add(format!("op-{i}"), move |_ctx: ExitContext| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            });
        }
        plan.trigger();
        let start = Instant::now();
        let report = plan.wait(CancellationToken::new()).await;

        assert!(report.is_clean());
        assert_eq!(report.operations.len(), 4);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[test]
    fn panic_message_variants() {
        let s: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let s: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(s.as_ref()), "owned");
        let s: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(s.as_ref()), "unknown panic");
    }
}
