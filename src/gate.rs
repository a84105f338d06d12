//! Reentrant mutual-exclusion gate with fair and unfair acquisition.
//!
//! A [`Gate`] is an exclusive lock owned by at most one thread at a time.
//! A reentrant acquire by the current owner increments a hold count and
//! never blocks; the gate is handed off only when the hold count returns
//! to zero.
//!
//! # Fairness
//!
//! - **Fair**: ownership is granted strictly in arrival order by direct
//!   handoff to the head of the waiter queue. Acquisition order is
//!   deterministic and testable.
//! - **Unfair**: a release marks the gate free and wakes the head waiter,
//!   but a newly arriving thread may barge in first. No ordering guarantee
//!   is made beyond eventual progress.
//!
//! # Misuse
//!
//! Releasing a gate the caller does not own is a usage error reported as
//! [`ReleaseError::NotOwner`], never silently ignored.
//!
//! # Example
//!
//! ```
//! use gatesync::Gate;
//!
//! let gate = Gate::new();
//! gate.acquire();
//! gate.acquire(); // reentrant, never blocks
//! gate.release().unwrap();
//! gate.release().unwrap();
//! assert!(!gate.is_locked());
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::thread::{self, Thread, ThreadId};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::park::{self, ParkWake};

/// Error returned when a blocking acquire gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// The timeout elapsed before ownership was obtained.
    TimedOut,
    /// Cancelled while waiting.
    Cancelled,
}

impl std::fmt::Display for AcquireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimedOut => write!(f, "gate acquire timed out"),
            Self::Cancelled => write!(f, "gate acquire cancelled"),
        }
    }
}

impl std::error::Error for AcquireError {}

/// Error returned when a non-blocking acquire would have to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryAcquireError;

impl std::fmt::Display for TryAcquireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gate is unavailable")
    }
}

impl std::error::Error for TryAcquireError {}

/// Error returned when releasing a gate the caller does not own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseError {
    /// The calling thread is not the current owner.
    NotOwner,
}

impl std::fmt::Display for ReleaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOwner => write!(f, "gate released by non-owner"),
        }
    }
}

impl std::error::Error for ReleaseError {}

/// A queued thread waiting for ownership.
#[derive(Debug)]
struct GateWaiter {
    thread: Thread,
    /// Fair mode only: set when ownership has been handed directly to this
    /// waiter. Stored after the waiter is popped from the queue.
    granted: AtomicBool,
}

#[derive(Debug)]
struct GateState {
    /// Identity of the owning thread, if any.
    owner: Option<ThreadId>,
    /// Reentrant hold count; zero iff `owner` is `None`.
    holds: usize,
    /// Threads waiting for ownership, in arrival order.
    waiters: VecDeque<Arc<GateWaiter>>,
}

/// Reentrant exclusive lock with fair or unfair acquisition ordering.
#[derive(Debug)]
pub struct Gate {
    fair: bool,
    state: StdMutex<GateState>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    /// Creates an unfair gate (newcomers may barge past queued waiters).
    #[must_use]
    pub fn new() -> Self {
        Self::with_fairness(false)
    }

    /// Creates a fair gate: ownership is granted strictly in arrival order.
    #[must_use]
    pub fn new_fair() -> Self {
        Self::with_fairness(true)
    }

    fn with_fairness(fair: bool) -> Self {
        Self {
            fair,
            state: StdMutex::new(GateState {
                owner: None,
                holds: 0,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Returns true if this gate grants ownership in arrival order.
    #[must_use]
    pub fn is_fair(&self) -> bool {
        self.fair
    }

    /// Returns true if some thread currently owns the gate.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        let state = self.state.lock().expect("gate state lock poisoned");
        state.owner.is_some()
    }

    /// Returns the number of threads queued for ownership.
    ///
    /// Advisory: the value may be stale the instant this returns.
    #[must_use]
    pub fn queued_waiters(&self) -> usize {
        let state = self.state.lock().expect("gate state lock poisoned");
        state.waiters.len()
    }

    /// Returns true if the calling thread currently owns the gate.
    #[must_use]
    pub fn is_held_by_current(&self) -> bool {
        let state = self.state.lock().expect("gate state lock poisoned");
        state.owner == Some(thread::current().id())
    }

    /// Acquires the gate, blocking until the calling thread owns it.
    ///
    /// Reentrant: if the caller already owns the gate, the hold count is
    /// incremented and the call returns immediately.
    pub fn acquire(&self) {
        match self.acquire_inner(None, None) {
            Ok(()) => {}
            Err(_) => unreachable!("untimed, uncancellable acquire cannot fail"),
        }
    }

    /// Acquires the gate, giving up after `timeout`.
    ///
    /// No state is changed on failure.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::TimedOut`] if ownership was not obtained in
    /// time.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<(), AcquireError> {
        self.acquire_inner(park::deadline_after(timeout), None)
    }

    /// Acquires the gate, giving up if `token` is cancelled while waiting.
    ///
    /// No state is changed on cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::Cancelled`] if the token was cancelled
    /// before ownership was obtained.
    pub fn acquire_cancellable(&self, token: &CancelToken) -> Result<(), AcquireError> {
        self.acquire_inner(None, Some(token))
    }

    /// Attempts to acquire the gate without waiting.
    ///
    /// On a fair gate this refuses to barge: it fails while waiters are
    /// queued even if the gate is momentarily free, keeping acquisition
    /// order strict. On an unfair gate it takes the gate whenever free.
    ///
    /// # Errors
    ///
    /// Returns [`TryAcquireError`] if ownership was not obtained.
    pub fn try_acquire(&self) -> Result<(), TryAcquireError> {
        let mut state = self.state.lock().expect("gate state lock poisoned");
        let current = thread::current().id();
        if state.owner == Some(current) {
            state.holds += 1;
            return Ok(());
        }
        if state.owner.is_some() {
            return Err(TryAcquireError);
        }
        if self.fair && !state.waiters.is_empty() {
            return Err(TryAcquireError);
        }
        state.owner = Some(current);
        state.holds = 1;
        Ok(())
    }

    /// Releases one hold on the gate.
    ///
    /// When the hold count reaches zero, ownership is handed to the next
    /// eligible waiter (fair: the queue head, directly; unfair: the gate
    /// is marked free and the head waiter is woken to compete).
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::NotOwner`] if the calling thread does not
    /// own the gate.
    pub fn release(&self) -> Result<(), ReleaseError> {
        let mut state = self.state.lock().expect("gate state lock poisoned");
        if state.owner != Some(thread::current().id()) {
            return Err(ReleaseError::NotOwner);
        }
        state.holds -= 1;
        if state.holds == 0 {
            self.grant_next_locked(&mut state);
        }
        Ok(())
    }

    /// Releases every hold at once, returning the count that was held.
    ///
    /// Used by `WaitSet` to fully relinquish a reentrantly-held gate before
    /// suspending; the saved count is restored with [`restore_holds`].
    ///
    /// [`restore_holds`]: Self::restore_holds
    pub(crate) fn release_all(&self) -> Result<usize, ReleaseError> {
        let mut state = self.state.lock().expect("gate state lock poisoned");
        if state.owner != Some(thread::current().id()) {
            return Err(ReleaseError::NotOwner);
        }
        let saved = state.holds;
        state.holds = 0;
        self.grant_next_locked(&mut state);
        Ok(saved)
    }

    /// Restores a saved hold count after reacquiring the gate.
    ///
    /// The caller must own the gate with exactly one hold.
    pub(crate) fn restore_holds(&self, holds: usize) {
        let mut state = self.state.lock().expect("gate state lock poisoned");
        debug_assert_eq!(state.owner, Some(thread::current().id()));
        debug_assert_eq!(state.holds, 1);
        state.holds = holds;
    }

    fn acquire_inner(
        &self,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> Result<(), AcquireError> {
        let current = thread::current();
        let waiter = {
            let mut state = self.state.lock().expect("gate state lock poisoned");
            if state.owner == Some(current.id()) {
                state.holds += 1;
                return Ok(());
            }
            if state.owner.is_none() && (!self.fair || state.waiters.is_empty()) {
                state.owner = Some(current.id());
                state.holds = 1;
                return Ok(());
            }
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(AcquireError::Cancelled);
                }
            }
            let waiter = Arc::new(GateWaiter {
                thread: current.clone(),
                granted: AtomicBool::new(false),
            });
            state.waiters.push_back(Arc::clone(&waiter));
            waiter
        };
        tracing::trace!(target: "gatesync::gate", fair = self.fair, "gate::acquire blocked");

        let _registration = cancel.map(CancelToken::register_current);
        loop {
            if waiter.granted.load(Ordering::Acquire) {
                return Ok(());
            }
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return self.abandon_wait(&waiter, AcquireError::Cancelled);
                }
            }
            match park::park_step(deadline) {
                ParkWake::DeadlineElapsed => {
                    return self.abandon_wait(&waiter, AcquireError::TimedOut);
                }
                ParkWake::Woken if !self.fair => {
                    // The gate may be free now; try to take it before
                    // parking again. Fair waiters instead wait for a
                    // direct handoff via `granted`.
                    let mut state = self.state.lock().expect("gate state lock poisoned");
                    if state.owner.is_none() {
                        state.owner = Some(current.id());
                        state.holds = 1;
                        Self::remove_waiter(&mut state, &waiter);
                        return Ok(());
                    }
                }
                ParkWake::Woken => {}
            }
        }
    }

    /// Leaves the waiter queue after a timeout or cancellation, resolving
    /// the race where ownership was handed to us at the same moment.
    fn abandon_wait(
        &self,
        waiter: &Arc<GateWaiter>,
        error: AcquireError,
    ) -> Result<(), AcquireError> {
        let mut state = self.state.lock().expect("gate state lock poisoned");
        if waiter.granted.load(Ordering::Acquire) {
            match error {
                // The lock arrived just in time: a late grant beats the
                // deadline, matching a final try-acquire on expiry.
                AcquireError::TimedOut => return Ok(()),
                // Cancellation wins; pass ownership straight on so the
                // grant is not lost.
                AcquireError::Cancelled => {
                    self.grant_next_locked(&mut state);
                    return Err(error);
                }
            }
        }
        Self::remove_waiter(&mut state, waiter);
        if !self.fair && state.owner.is_none() {
            // A wakeup aimed at this waiter may have gone unused; forward
            // it so the new queue head is not left sleeping.
            if let Some(front) = state.waiters.front() {
                front.thread.unpark();
            }
        }
        tracing::trace!(target: "gatesync::gate", %error, "gate::acquire abandoned");
        Err(error)
    }

    fn remove_waiter(state: &mut GateState, waiter: &Arc<GateWaiter>) {
        if let Some(pos) = state
            .waiters
            .iter()
            .position(|queued| Arc::ptr_eq(queued, waiter))
        {
            state.waiters.remove(pos);
        }
    }

    /// Hands the gate to the next waiter, or marks it free.
    ///
    /// Fair: pops the head and transfers ownership directly, so no
    /// newcomer can slip in between. Unfair: marks the gate free and wakes
    /// the head, which must compete with bargers.
    fn grant_next_locked(&self, state: &mut GateState) {
        if self.fair {
            if let Some(next) = state.waiters.pop_front() {
                state.owner = Some(next.thread.id());
                state.holds = 1;
                next.granted.store(true, Ordering::Release);
                next.thread.unpark();
                return;
            }
        }
        state.owner = None;
        state.holds = 0;
        if let Some(front) = state.waiters.front() {
            front.thread.unpark();
        }
    }
}
