//! Single-shot deadline timer that forces the process down

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::abort::Abort;

const ARMED: u8 = 0;
const DISARMED: u8 = 1;
const FIRED: u8 = 2;

struct Shared {
    state: AtomicU8,
    timeout: Duration,
    abort: Arc<dyn Abort>,
    fired_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl Shared {
    /// Claim the deadline and run the abort capability. Only the first
    /// caller while armed gets `true`.
    fn fire(&self) -> bool {
        if self
            .state
            .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.abort.abort(self.timeout);
        let tx = self
            .fired_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
        true
    }
}

/// Timer armed when cleanup dispatch begins.
///
/// Two clocks race for the deadline: a tokio task on the runtime clock, and a
/// watchdog thread on the wall clock that fires even while every runtime
/// worker is blocked inside an operation. Whichever of
/// [`disarm`](Self::disarm) and the timers claims the state first wins.
pub struct DeadlineGuard {
    shared: Arc<Shared>,
    deadline: Instant,
    fired_rx: oneshot::Receiver<()>,
    timer: JoinHandle<()>,
    // Dropping the sender releases the watchdog without firing
    watchdog: Option<mpsc::Sender<()>>,
}

impl DeadlineGuard {
    pub fn arm(timeout: Duration, abort: Arc<dyn Abort>) -> Self {
        let (fired_tx, fired_rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            state: AtomicU8::new(ARMED),
            timeout,
            abort,
            fired_tx: Mutex::new(Some(fired_tx)),
        });
        let deadline = Instant::now() + timeout;

        let timer = tokio::spawn({
            let shared = shared.clone();
            async move {
                tokio::time::sleep_until(deadline).await;
                shared.fire();
            }
        });

        let (disarm_tx, disarm_rx) = mpsc::channel::<()>();
        let watchdog_shared = shared.clone();
        let watchdog = std::thread::Builder::new()
            .name("exitplan-deadline".into())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = disarm_rx.recv_timeout(timeout) {
                    if watchdog_shared.fire() {
                        log::debug!("deadline fired on the watchdog thread");
                    }
                }
            });
        let watchdog = match watchdog {
            Ok(_) => Some(disarm_tx),
            Err(e) => {
                log::warn!("failed to spawn deadline watchdog, runtime timer only: {e}");
                None
            }
        };

        log::debug!("deadline guard armed for {timeout:?}");
        Self {
            shared,
            deadline,
            fired_rx,
            timer,
            watchdog,
        }
    }

    /// Resolves after the timer fired and the abort capability returned.
    /// Never resolves once disarmed.
    pub async fn fired(&mut self) {
        if (&mut self.fired_rx).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    #[cfg(test)]
    pub(crate) fn has_fired(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == FIRED
    }

    /// Stop the timer. Returns `false` if it had already fired.
    ///
    /// Past the deadline this fires instead of disarming, even if neither
    /// timer got to run yet.
    pub fn disarm(&self) -> bool {
        if Instant::now() >= self.deadline {
            self.shared.fire();
            return false;
        }
        let won = self
            .shared
            .state
            .compare_exchange(ARMED, DISARMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.timer.abort();
            if let Some(tx) = &self.watchdog {
                let _ = tx.send(());
            }
            log::debug!("deadline guard disarmed");
        }
        won
    }
}
