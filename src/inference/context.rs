//! Deadlines and cancellation for waits.
//!
//! A [`Context`] bounds how long a caller blocks, either while waiting for a
//! prediction or while [`Predictor::close`](super::Predictor::close) drains
//! workers. It never interrupts a model evaluation that already started.

use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::common::error::BoostError;

/// Cancellation signal and optional deadline, cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct Context {
    deadline: Option<Instant>,
    // Nothing is ever sent; the channel disconnecting is the cancel signal.
    cancel: Option<Receiver<()>>,
}

/// Cancels the paired [`Context`]. Dropping the handle cancels as well.
#[derive(Debug)]
pub struct CancelHandle {
    tx: Mutex<Option<Sender<()>>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.lock().take();
    }
}

pub(crate) enum Wait<T> {
    Ready(T),
    Disconnected,
    Interrupted(BoostError),
}

impl Context {
    /// A context that never expires.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().timeout(timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: None,
        }
    }

    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = crossbeam_channel::bounded(0);
        let ctx = Self {
            deadline: None,
            cancel: Some(rx),
        };
        (
            ctx,
            CancelHandle {
                tx: Mutex::new(Some(tx)),
            },
        )
    }

    /// Tighten the deadline to at most `timeout` from now.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        // An unrepresentable instant is as good as no deadline.
        if let Some(at) = Instant::now().checked_add(timeout) {
            self.deadline = Some(self.deadline.map_or(at, |d| d.min(at)));
        }
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context is done, if it is.
    pub fn err(&self) -> Option<BoostError> {
        if let Some(cancel) = &self.cancel {
            if matches!(cancel.try_recv(), Err(TryRecvError::Disconnected)) {
                return Some(BoostError::Cancelled);
            }
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(BoostError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Block on `rx` until it yields, disconnects, or this context ends.
    pub(crate) fn wait<T>(&self, rx: &Receiver<T>) -> Wait<T> {
        match rx.try_recv() {
            Ok(value) => return Wait::Ready(value),
            Err(TryRecvError::Disconnected) => return Wait::Disconnected,
            Err(TryRecvError::Empty) => {}
        }
        if let Some(err) = self.err() {
            return Wait::Interrupted(err);
        }

        let never = crossbeam_channel::never::<()>();
        let cancel = self.cancel.as_ref().unwrap_or(&never);
        let timer = match self.deadline {
            Some(deadline) => crossbeam_channel::at(deadline),
            None => crossbeam_channel::never(),
        };

        select! {
            recv(rx) -> msg => match msg {
                Ok(value) => Wait::Ready(value),
                Err(_) => Wait::Disconnected,
            },
            recv(cancel) -> _ => Wait::Interrupted(BoostError::Cancelled),
            recv(timer) -> _ => Wait::Interrupted(BoostError::DeadlineExceeded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn background_never_finishes() {
        let ctx = Context::background();
        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn expired_deadline_reports_timeout() {
        let ctx = Context::with_deadline(Instant::now());
        assert!(matches!(ctx.err(), Some(BoostError::DeadlineExceeded)));
    }

    #[test]
    fn cancel_and_drop_both_cancel() {
        let (ctx, handle) = Context::with_cancel();
        assert!(!ctx.is_done());
        handle.cancel();
        assert!(matches!(ctx.err(), Some(BoostError::Cancelled)));

        let (ctx, handle) = Context::with_cancel();
        drop(handle);
        assert!(ctx.is_done());
    }

    #[test]
    fn timeout_only_tightens() {
        let long = Context::with_timeout(Duration::from_secs(60));
        let first = long.deadline().unwrap();
        let tightened = long.clone().timeout(Duration::from_millis(10));
        assert!(tightened.deadline().unwrap() < first);
        let loosened = tightened.clone().timeout(Duration::from_secs(120));
        assert_eq!(loosened.deadline(), tightened.deadline());
    }

    #[test]
    fn wait_returns_value_or_interruption() {
        let (tx, rx) = crossbeam_channel::bounded::<u32>(1);
        tx.send(7).unwrap();
        assert!(matches!(Context::background().wait(&rx), Wait::Ready(7)));

        let ctx = Context::with_timeout(Duration::from_millis(20));
        assert!(matches!(
            ctx.wait(&rx),
            Wait::Interrupted(BoostError::DeadlineExceeded)
        ));

        drop(tx);
        assert!(matches!(Context::background().wait(&rx), Wait::Disconnected));
    }

    #[test]
    fn cancel_wakes_a_blocked_wait() {
        let (_tx, rx) = crossbeam_channel::bounded::<u32>(1);
        let (ctx, handle) = Context::with_cancel();
        let waiter = thread::spawn(move || matches!(ctx.wait(&rx), Wait::Interrupted(BoostError::Cancelled)));
        thread::sleep(Duration::from_millis(20));
        handle.cancel();
        assert!(waiter.join().unwrap());
    }
}
