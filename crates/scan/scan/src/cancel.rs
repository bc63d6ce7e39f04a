//! Cancellation of a running scan
//!
//! A [`CancelToken`] is a one-shot flag shared by the event loop, the
//! spinner and the stress runner. A [`Canceller`] sets it from an interrupt
//! signal or a wall-clock deadline and aborts the wait in flight so the loop
//! notices without waiting for the wait timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use parking_lot::{Condvar, Mutex};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use signal_hook::low_level;
use tracing::{debug, info, warn};

use crate::error::ScanError;
use crate::service::WaitAborter;

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    wakeup: Condvar,
}

/// One-shot cancellation flag
///
/// Once set the flag is never cleared.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation, returns whether this call set the flag
    pub fn cancel(&self) -> bool {
        let first = !self.inner.cancelled.swap(true, Ordering::AcqRel);
        let _guard = self.inner.lock.lock();
        self.inner.wakeup.notify_all();
        first
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Sleep for `timeout` unless cancelled first, returns whether cancelled
    pub fn sleep(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        while !self.is_cancelled() {
            if self.inner.wakeup.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_cancelled()
    }
}

fn trigger<A: WaitAborter>(token: &CancelToken, aborter: &A) {
    if token.cancel() {
        debug!("cancellation requested");
    }
    aborter.abort_wait();
}

/// Bridges interrupts and a time budget into a [`CancelToken`]
#[derive(Debug)]
pub struct Canceller<A> {
    token: CancelToken,
    aborter: A,
    signals: Option<Handle>,
    deadline: Option<Sender<()>>,
    threads: Vec<JoinHandle<()>>,
}

impl<A> Canceller<A>
where
    A: WaitAborter + Clone + Send + 'static,
{
    /// Create a canceller with no source armed
    pub const fn new(token: CancelToken, aborter: A) -> Self {
        Self {
            token,
            aborter,
            signals: None,
            deadline: None,
            threads: Vec::new(),
        }
    }

    /// Cancel on SIGINT or SIGTERM
    ///
    /// Only the first signal requests a graceful stop. A later one gets the
    /// default disposition, so a stalled shutdown can still be interrupted.
    pub fn with_signals(mut self) -> Result<Self, ScanError> {
        let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(ScanError::Signal)?;
        self.signals = Some(signals.handle());

        let token = self.token.clone();
        let aborter = self.aborter.clone();
        let thread = thread::Builder::new()
            .name("scan-signals".into())
            .spawn(move || {
                for (received, signal) in signals.forever().enumerate() {
                    if received == 0 {
                        info!("received signal {}, stopping", signal);
                        trigger(&token, &aborter);
                    } else {
                        warn!("received signal {} while stopping, exiting", signal);
                        if let Err(e) = low_level::emulate_default_handler(signal) {
                            warn!("cannot exit on signal {}: {}", signal, e);
                        }
                    }
                }
            })
            .map_err(|source| ScanError::Thread {
                name: "signal",
                source,
            })?;
        self.threads.push(thread);
        Ok(self)
    }

    /// Cancel once `budget` has elapsed, if any
    pub fn with_deadline(mut self, budget: Option<Duration>) -> Result<Self, ScanError> {
        let Some(budget) = budget else {
            return Ok(self);
        };

        let (stop_tx, stop_rx) = bounded::<()>(1);
        self.deadline = Some(stop_tx);

        let token = self.token.clone();
        let aborter = self.aborter.clone();
        let thread = thread::Builder::new()
            .name("scan-deadline".into())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(budget) {
                    info!("time budget of {:?} elapsed, stopping", budget);
                    trigger(&token, &aborter);
                }
            })
            .map_err(|source| ScanError::Thread {
                name: "deadline",
                source,
            })?;
        self.threads.push(thread);
        Ok(self)
    }
}

impl<A> Canceller<A> {
    /// Stop watching for cancellation and join the helper threads
    pub fn disarm(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.signals.take() {
            handle.close();
        }
        // Disconnecting the channel wakes the deadline thread
        self.deadline.take();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

impl<A> Drop for Canceller<A> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
