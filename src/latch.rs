//! One-shot countdown latch.
//!
//! A [`CountdownLatch`] starts at a count `N >= 0` and counts down, never
//! up. Threads in [`wait`](CountdownLatch::wait) block while the count is
//! positive and are all released together when it reaches zero. Zero is
//! terminal: the latch cannot be reset or reused.
//!
//! # Example
//!
//! ```
//! use gatesync::CountdownLatch;
//!
//! let latch = CountdownLatch::new(2);
//! latch.count_down();
//! assert_eq!(latch.count(), 1);
//! latch.count_down();
//! latch.wait(); // returns immediately, count is zero
//! latch.count_down(); // no-op at zero, not an error
//! ```

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::gate::Gate;
use crate::park;
use crate::waitset::{WaitError, WaitSet};

/// Error returned when a timed or cancellable latch wait gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchWaitError {
    /// The timeout elapsed while the count was still positive.
    TimedOut,
    /// Cancelled while waiting.
    Cancelled,
}

impl std::fmt::Display for LatchWaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimedOut => write!(f, "latch wait timed out"),
            Self::Cancelled => write!(f, "latch wait cancelled"),
        }
    }
}

impl std::error::Error for LatchWaitError {}

/// One-shot countdown coordinator built from one gate and one wait-set.
#[derive(Debug)]
pub struct CountdownLatch {
    gate: Arc<Gate>,
    /// Waiters blocked until the count reaches zero.
    released: WaitSet,
    /// Remaining count; monotonically non-increasing, mutated only under
    /// the gate. The inner mutex exists for advisory reads.
    count: StdMutex<usize>,
}

impl CountdownLatch {
    /// Creates a latch with an initial count of `count`.
    ///
    /// A latch created with zero is already in the terminal, released
    /// state.
    #[must_use]
    pub fn new(count: usize) -> Self {
        let gate = Arc::new(Gate::new());
        Self {
            released: WaitSet::new(Arc::clone(&gate)),
            gate,
            count: StdMutex::new(count),
        }
    }

    /// Returns the remaining count.
    ///
    /// Advisory: the value may be stale the instant this returns.
    #[must_use]
    pub fn count(&self) -> usize {
        *self.count.lock().expect("latch count poisoned")
    }

    /// Decrements the count by one, releasing all waiters when it reaches
    /// zero. Never blocks; a no-op (not an error) once the count is zero.
    pub fn count_down(&self) {
        self.gate.acquire();
        {
            let mut count = self.count.lock().expect("latch count poisoned");
            if *count > 0 {
                *count -= 1;
                if *count == 0 {
                    drop(count);
                    tracing::trace!(target: "gatesync::latch", "latch released");
                    self.released
                        .signal_all()
                        .expect("gate held across count_down");
                }
            }
        }
        self.gate.release().expect("gate held across count_down");
    }

    /// Blocks until the count reaches zero; returns immediately if it
    /// already has.
    pub fn wait(&self) {
        match self.wait_inner(None, None) {
            Ok(()) => {}
            Err(_) => unreachable!("untimed, uncancellable wait cannot fail"),
        }
    }

    /// Blocks up to `timeout` for the count to reach zero.
    ///
    /// # Errors
    ///
    /// Returns [`LatchWaitError::TimedOut`] on expiry; the count is
    /// unchanged by the failed wait.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), LatchWaitError> {
        self.wait_inner(park::deadline_after(timeout), None)
    }

    /// Blocks until the count reaches zero or `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`LatchWaitError::Cancelled`] if cancelled while waiting.
    pub fn wait_cancellable(&self, token: &CancelToken) -> Result<(), LatchWaitError> {
        self.wait_inner(None, Some(token))
    }

    fn wait_inner(
        &self,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> Result<(), LatchWaitError> {
        if let Some(token) = cancel {
            if self.gate.acquire_cancellable(token).is_err() {
                return Err(LatchWaitError::Cancelled);
            }
        } else {
            self.gate.acquire();
        }
        loop {
            if *self.count.lock().expect("latch count poisoned") == 0 {
                self.gate.release().expect("gate held across wait");
                return Ok(());
            }
            match self.released.wait_inner(deadline, cancel) {
                Ok(result) if result.timed_out() => {
                    self.gate.release().expect("gate held across wait");
                    return Err(LatchWaitError::TimedOut);
                }
                Ok(_) => {}
                Err(WaitError::Cancelled) => {
                    self.gate.release().expect("gate held across wait");
                    return Err(LatchWaitError::Cancelled);
                }
                Err(WaitError::NotOwner) => unreachable!("gate held across latch wait"),
            }
        }
    }

    /// Number of threads currently blocked in [`wait`](Self::wait).
    /// Advisory, exposed for tests and diagnostics.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.released.waiting()
    }
}
