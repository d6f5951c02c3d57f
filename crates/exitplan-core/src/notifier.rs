//! "Shutdown has begun" broadcast to any number of one-shot listeners

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

#[derive(Default)]
struct State {
    fired: bool,
    senders: Vec<oneshot::Sender<()>>,
}

/// Set of one-shot listeners, fired together exactly once.
#[derive(Default)]
pub struct Notifier {
    state: Mutex<State>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a fresh listener.
    ///
    /// After [`broadcast`](Self::broadcast) has run, the returned listener is
    /// already signaled.
    pub fn subscribe(&self) -> Listener {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        if state.fired {
            let _ = tx.send(());
        } else {
            state.senders.push(tx);
        }
        Listener {
            rx,
            done: false,
            closed: false,
        }
    }

    /// Fire every registered listener. Returns how many were fired; later
    /// calls fire nothing.
    pub fn broadcast(&self) -> usize {
        let senders = {
            let mut state = self.lock();
            if state.fired {
                return 0;
            }
            state.fired = true;
            std::mem::take(&mut state.senders)
        };
        let count = senders.len();
        for tx in senders {
            // Listener may have been dropped already
            let _ = tx.send(());
        }
        count
    }

    #[cfg(test)]
    pub(crate) fn is_fired(&self) -> bool {
        self.lock().fired
    }

    /// Listeners waiting for the broadcast
    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.lock().senders.len()
    }
}

/// One-shot handle resolving when shutdown begins (not when it completes).
///
/// Implements [`Future`], so it can sit directly in a `tokio::select!`.
#[derive(Debug)]
pub struct Listener {
    rx: oneshot::Receiver<()>,
    done: bool,
    closed: bool,
}

impl Listener {
    /// Non-blocking check
    pub fn is_signaled(&mut self) -> bool {
        if !self.done && !self.closed {
            match self.rx.try_recv() {
                Ok(()) => self.done = true,
                Err(oneshot::error::TryRecvError::Closed) => self.closed = true,
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
        }
        self.done
    }
}

impl Future for Listener {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.done {
            return Poll::Ready(());
        }
        if self.closed {
            return Poll::Pending;
        }
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(())) => {
                self.done = true;
                Poll::Ready(())
            }
            // Notifier dropped without broadcasting: shutdown never began
            Poll::Ready(Err(_)) => {
                self.closed = true;
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn broadcast_fires_all() {
        let n = Notifier::new();
        let mut a = n.subscribe();
        let b = n.subscribe();
        assert!(!a.is_signaled());
        assert_eq!(n.pending(), 2);

        assert_eq!(n.broadcast(), 2);
        assert!(a.is_signaled());
        b.await;
        assert!(n.is_fired());
    }

    #[tokio::test]
    async fn second_broadcast_is_noop() {
        let n = Notifier::new();
        let _a = n.subscribe();
        assert_eq!(n.broadcast(), 1);
        assert_eq!(n.broadcast(), 0);
    }

    #[tokio::test]
    async fn late_subscriber_fires_immediately() {
        let n = Notifier::new();
        n.broadcast();
        let mut late = n.subscribe();
        assert!(late.is_signaled());
        assert_eq!(n.pending(), 0);
        late.await;
    }

    #[tokio::test]
    async fn dropped_listener_does_not_block_broadcast() {
        let n = Notifier::new();
        drop(n.subscribe());
        let kept = n.subscribe();
        assert_eq!(n.broadcast(), 2);
        kept.await;
    }

    #[tokio::test(start_paused = true)]
    async fn unfired_listener_stays_pending() {
        let n = Notifier::new();
        let listener = n.subscribe();
        let res = tokio::time::timeout(Duration::from_secs(1), listener).await;
        assert!(res.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_notifier_never_signals() {
        let n = Notifier::new();
        let mut listener = n.subscribe();
        drop(n);
        assert!(!listener.is_signaled());
        let res = tokio::time::timeout(Duration::from_secs(1), listener).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn wakes_waiting_task() {
        let n = std::sync::Arc::new(Notifier::new());
        let listener = n.subscribe();
        let waiter = tokio::spawn(listener);
        tokio::task::yield_now().await;
        n.broadcast();
        waiter.await.unwrap();
    }
}
