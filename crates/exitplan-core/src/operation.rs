//! Cleanup operations and the context they run with

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Context handed to every cleanup operation.
///
/// Carries the caller's cancellation token and, once dispatch has started,
/// the instant at which the deadline guard will force the process down.
#[derive(Debug, Clone)]
pub struct ExitContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl ExitContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    pub(crate) fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            cancel: self.cancel.clone(),
            deadline: Some(deadline),
        }
    }

    /// Caller-supplied cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the caller cancels the token
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the forced exit, `None` if no deadline is armed
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

impl Default for ExitContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

/// A unit of cleanup work run once during shutdown.
///
/// Implemented for every `Fn(ExitContext) -> impl Future<Output = anyhow::Result<()>>`
/// closure, so most callers never implement it by hand.
pub trait ExitOperation: Send + Sync + 'static {
    fn run(&self, ctx: ExitContext) -> BoxFuture<'static, anyhow::Result<()>>;
}

impl<F, Fut> ExitOperation for F
where
    F: Fn(ExitContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn run(&self, ctx: ExitContext) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(self(ctx))
    }
}

impl ExitOperation for Arc<dyn ExitOperation> {
    fn run(&self, ctx: ExitContext) -> BoxFuture<'static, anyhow::Result<()>> {
        (**self).run(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closure_is_operation() {
        let op = |_ctx: ExitContext| async { anyhow::Ok(()) };
        assert!(op.run(ExitContext::default()).await.is_ok());
    }

    #[tokio::test]
    async fn closure_error_propagates() {
        let op = |_ctx: ExitContext| async { Err::<(), _>(anyhow::anyhow!("closing failed")) };
        let err = op.run(ExitContext::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "closing failed");
    }

    #[tokio::test]
    async fn shared_operation_is_operation() {
        let op: Arc<dyn ExitOperation> =
            Arc::new(|_ctx: ExitContext| async { Err::<(), _>(anyhow::anyhow!("shared")) });
        let err = op.run(ExitContext::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "shared");

        fn registrable(_op: impl ExitOperation) {}
        registrable(op.clone());
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_counts_down() {
        let ctx = ExitContext::default();
        assert!(ctx.remaining().is_none());

        let ctx = ctx.with_deadline(Instant::now() + Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(ctx.remaining(), Some(Duration::from_secs(6)));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn cancellation_is_shared() {
        let token = CancellationToken::new();
        let ctx = ExitContext::new(token.clone());
        let copy = ctx.clone();
        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(copy.is_cancelled());
    }
}
