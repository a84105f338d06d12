//! Condition wait-sets bound to a gate.
//!
//! A [`WaitSet`] is an ordered collection of suspended threads tied to one
//! [`Gate`]. A thread that holds the gate can [`wait`](WaitSet::wait):
//! the gate is atomically released (all reentrant holds at once) and the
//! thread suspends until signalled, then reacquires the gate before
//! returning.
//!
//! # Predicate re-check contract
//!
//! A wait may resume spuriously, or via `signal_all` when the caller's
//! condition is not yet true. Every wait MUST therefore be called inside
//! a loop that re-checks the guarded predicate:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use gatesync::{Gate, WaitSet};
//! # let gate = Arc::new(Gate::new());
//! # let ready = WaitSet::new(Arc::clone(&gate));
//! # let predicate = || false;
//! gate.acquire();
//! while !predicate() {
//!     ready.wait().unwrap();
//! }
//! gate.release().unwrap();
//! ```
//!
//! # Signals
//!
//! Signalling requires the gate to be held; signalling without it is a
//! usage error. A signal sent while no thread is waiting is a no-op and
//! is never buffered. A waiter is removed from the set before it resumes
//! user code; a signal consumed by a waiter that then reports timeout or
//! cancellation is handed on to the next waiter so no wakeup is lost.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::gate::Gate;
use crate::park::{self, ParkWake};

/// Error returned when a wait cannot complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The calling thread does not hold the wait-set's gate.
    NotOwner,
    /// Cancelled while waiting. The gate has been reacquired and shared
    /// state is untouched.
    Cancelled,
}

impl std::fmt::Display for WaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOwner => write!(f, "wait on a gate not held by the caller"),
            Self::Cancelled => write!(f, "wait cancelled"),
        }
    }
}

impl std::error::Error for WaitError {}

/// Error returned when signalling without holding the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalError {
    /// The calling thread does not hold the wait-set's gate.
    NotOwner,
}

impl std::fmt::Display for SignalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOwner => write!(f, "signal on a gate not held by the caller"),
        }
    }
}

impl std::error::Error for SignalError {}

/// Outcome of a timed wait: whether the timeout elapsed before a signal.
///
/// A timeout is a failure indicator, not an error; the gate is held again
/// either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a timed wait reports whether it timed out"]
pub struct WaitTimeoutResult {
    timed_out: bool,
}

impl WaitTimeoutResult {
    /// Returns true if the wait ended because the timeout elapsed.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }
}

/// A suspended waiter. `signaled` is set only after the entry has been
/// removed from the queue, which is what guarantees "removed from the set
/// before resuming user code".
#[derive(Debug)]
struct WaitEntry {
    thread: Thread,
    signaled: AtomicBool,
}

/// An ordered wait/wake mechanism tied to one [`Gate`].
#[derive(Debug)]
pub struct WaitSet {
    gate: Arc<Gate>,
    waiters: StdMutex<VecDeque<Arc<WaitEntry>>>,
}

enum WakeReason {
    Signaled,
    TimedOut,
    Cancelled,
}

impl WaitSet {
    /// Creates a wait-set bound to `gate`.
    #[must_use]
    pub fn new(gate: Arc<Gate>) -> Self {
        Self {
            gate,
            waiters: StdMutex::new(VecDeque::new()),
        }
    }

    /// Returns the gate this wait-set is bound to.
    #[must_use]
    pub fn gate(&self) -> &Arc<Gate> {
        &self.gate
    }

    /// Returns the number of threads currently suspended in this set.
    ///
    /// Advisory: may be stale the instant this returns.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiters.lock().expect("wait-set lock poisoned").len()
    }

    /// Releases the gate and suspends until signalled, then reacquires the
    /// gate. Must be called with the gate held; all reentrant holds are
    /// released and restored.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::NotOwner`] if the caller does not hold the gate.
    pub fn wait(&self) -> Result<(), WaitError> {
        self.wait_inner(None, None).map(|_| ())
    }

    /// Timed variant of [`wait`](Self::wait).
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::NotOwner`] if the caller does not hold the gate.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<WaitTimeoutResult, WaitError> {
        self.wait_inner(park::deadline_after(timeout), None)
    }

    /// Cancellable variant of [`wait`](Self::wait).
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::NotOwner`] if the caller does not hold the
    /// gate, or [`WaitError::Cancelled`] if `token` was cancelled while
    /// waiting (the gate is reacquired first).
    pub fn wait_cancellable(&self, token: &CancelToken) -> Result<(), WaitError> {
        self.wait_inner(None, Some(token)).map(|_| ())
    }

    /// Timed and cancellable wait.
    ///
    /// # Errors
    ///
    /// As [`wait_cancellable`](Self::wait_cancellable); a timeout is
    /// reported through the `Ok` result instead.
    pub fn wait_timeout_cancellable(
        &self,
        timeout: Duration,
        token: &CancelToken,
    ) -> Result<WaitTimeoutResult, WaitError> {
        self.wait_inner(park::deadline_after(timeout), Some(token))
    }

    /// Wakes one suspended waiter, in arrival order. No-op if none.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::NotOwner`] if the caller does not hold the
    /// gate.
    pub fn signal_one(&self) -> Result<(), SignalError> {
        if !self.gate.is_held_by_current() {
            return Err(SignalError::NotOwner);
        }
        let mut waiters = self.waiters.lock().expect("wait-set lock poisoned");
        Self::pop_and_wake(&mut waiters);
        Ok(())
    }

    /// Wakes every currently suspended waiter. No-op if none.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::NotOwner`] if the caller does not hold the
    /// gate.
    pub fn signal_all(&self) -> Result<(), SignalError> {
        if !self.gate.is_held_by_current() {
            return Err(SignalError::NotOwner);
        }
        let mut waiters = self.waiters.lock().expect("wait-set lock poisoned");
        while Self::pop_and_wake(&mut waiters) {}
        Ok(())
    }

    pub(crate) fn wait_inner(
        &self,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> Result<WaitTimeoutResult, WaitError> {
        if !self.gate.is_held_by_current() {
            return Err(WaitError::NotOwner);
        }
        let entry = Arc::new(WaitEntry {
            thread: thread::current(),
            signaled: AtomicBool::new(false),
        });
        // Enqueue while still holding the gate, then release it. Signallers
        // must hold the gate themselves, so no signal can slip in between.
        self.waiters
            .lock()
            .expect("wait-set lock poisoned")
            .push_back(Arc::clone(&entry));
        let saved_holds = self
            .gate
            .release_all()
            .expect("ownership verified before enqueue");
        tracing::trace!(target: "gatesync::waitset", "waitset::wait suspended");

        let reason = {
            let _registration = cancel.map(CancelToken::register_current);
            loop {
                if entry.signaled.load(Ordering::Acquire) {
                    break WakeReason::Signaled;
                }
                if let Some(token) = cancel {
                    if token.is_cancelled() {
                        break WakeReason::Cancelled;
                    }
                }
                match park::park_step(deadline) {
                    ParkWake::DeadlineElapsed => break WakeReason::TimedOut,
                    ParkWake::Woken => {}
                }
            }
        };

        // The gate must be held again before the outcome is reported, so
        // the caller always observes consistent state. Reacquisition is
        // not cancellable.
        self.gate.acquire();
        self.gate.restore_holds(saved_holds);

        match reason {
            WakeReason::Signaled => Ok(WaitTimeoutResult { timed_out: false }),
            WakeReason::TimedOut => {
                let mut waiters = self.waiters.lock().expect("wait-set lock poisoned");
                if entry.signaled.load(Ordering::Acquire) {
                    // Signalled in the gap between expiry and reacquisition;
                    // the signal was consumed, report it as such.
                    return Ok(WaitTimeoutResult { timed_out: false });
                }
                Self::remove_entry(&mut waiters, &entry);
                Ok(WaitTimeoutResult { timed_out: true })
            }
            WakeReason::Cancelled => {
                let mut waiters = self.waiters.lock().expect("wait-set lock poisoned");
                if entry.signaled.load(Ordering::Acquire) {
                    // We consumed a signal while cancelling; pass it on so
                    // another waiter is not left sleeping.
                    Self::pop_and_wake(&mut waiters);
                } else {
                    Self::remove_entry(&mut waiters, &entry);
                }
                tracing::trace!(target: "gatesync::waitset", "waitset::wait cancelled");
                Err(WaitError::Cancelled)
            }
        }
    }

    /// Pops the head entry, marks it signalled and unparks it. Returns
    /// false if the set was empty.
    fn pop_and_wake(waiters: &mut VecDeque<Arc<WaitEntry>>) -> bool {
        match waiters.pop_front() {
            Some(entry) => {
                entry.signaled.store(true, Ordering::Release);
                entry.thread.unpark();
                true
            }
            None => false,
        }
    }

    fn remove_entry(waiters: &mut VecDeque<Arc<WaitEntry>>, entry: &Arc<WaitEntry>) {
        if let Some(pos) = waiters.iter().position(|queued| Arc::ptr_eq(queued, entry)) {
            waiters.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::AtomicUsize;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn bound_pair() -> (Arc<Gate>, WaitSet) {
        let gate = Arc::new(Gate::new());
        let set = WaitSet::new(Arc::clone(&gate));
        (gate, set)
    }

    #[test]
    fn wait_without_gate_is_error() {
        init_test("wait_without_gate_is_error");
        let (_gate, set) = bound_pair();
        let result = set.wait();
        crate::assert_with_log!(
            result == Err(WaitError::NotOwner),
            "wait rejected",
            Err::<(), _>(WaitError::NotOwner),
            result
        );
        crate::test_complete!("wait_without_gate_is_error");
    }

    #[test]
    fn signal_without_gate_is_error() {
        init_test("signal_without_gate_is_error");
        let (_gate, set) = bound_pair();
        let one = set.signal_one();
        let all = set.signal_all();
        crate::assert_with_log!(
            one == Err(SignalError::NotOwner) && all == Err(SignalError::NotOwner),
            "signals rejected",
            Err::<(), _>(SignalError::NotOwner),
            one
        );
        crate::test_complete!("signal_without_gate_is_error");
    }

    #[test]
    fn signal_with_no_waiters_is_noop() {
        init_test("signal_with_no_waiters_is_noop");
        let (gate, set) = bound_pair();
        gate.acquire();
        set.signal_one().expect("signal under gate");
        set.signal_all().expect("broadcast under gate");
        // Not buffered: a later wait must still block, so a timed wait
        // times out rather than consuming the earlier signal.
        let result = set
            .wait_timeout(Duration::from_millis(50))
            .expect("timed wait");
        crate::assert_with_log!(
            result.timed_out(),
            "earlier signal not buffered",
            true,
            result.timed_out()
        );
        gate.release().expect("owner release");
        crate::test_complete!("signal_with_no_waiters_is_noop");
    }

    #[test]
    fn wait_timeout_expires_and_reacquires_gate() {
        init_test("wait_timeout_expires_and_reacquires_gate");
        let (gate, set) = bound_pair();
        gate.acquire();
        gate.acquire(); // reentrant holds survive the wait
        let result = set
            .wait_timeout(Duration::from_millis(50))
            .expect("timed wait");
        crate::assert_with_log!(result.timed_out(), "timed out", true, result.timed_out());
        crate::assert_with_log!(
            gate.is_held_by_current(),
            "gate reacquired",
            true,
            gate.is_held_by_current()
        );
        crate::assert_with_log!(set.waiting() == 0, "entry removed", 0usize, set.waiting());
        gate.release().expect("release 1");
        gate.release().expect("release 2");
        crate::assert_with_log!(
            !gate.is_locked(),
            "hold count restored through wait",
            false,
            gate.is_locked()
        );
        crate::test_complete!("wait_timeout_expires_and_reacquires_gate");
    }

    #[test]
    fn signal_one_wakes_waiter_with_predicate() {
        init_test("signal_one_wakes_waiter_with_predicate");
        let gate = Arc::new(Gate::new());
        let set = Arc::new(WaitSet::new(Arc::clone(&gate)));
        let flag = Arc::new(AtomicUsize::new(0));

        let waiter_gate = Arc::clone(&gate);
        let waiter_set = Arc::clone(&set);
        let waiter_flag = Arc::clone(&flag);
        let handle = std::thread::spawn(move || {
            waiter_gate.acquire();
            while waiter_flag.load(Ordering::SeqCst) == 0 {
                waiter_set.wait().expect("wait under gate");
            }
            waiter_gate.release().expect("owner release");
        });

        while set.waiting() == 0 {
            std::thread::yield_now();
        }
        gate.acquire();
        flag.store(1, Ordering::SeqCst);
        set.signal_one().expect("signal under gate");
        gate.release().expect("owner release");
        handle.join().expect("waiter panicked");
        crate::test_complete!("signal_one_wakes_waiter_with_predicate");
    }

    #[test]
    fn signal_all_releases_every_waiter() {
        init_test("signal_all_releases_every_waiter");
        let gate = Arc::new(Gate::new());
        let set = Arc::new(WaitSet::new(Arc::clone(&gate)));
        let flag = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let waiter_gate = Arc::clone(&gate);
            let waiter_set = Arc::clone(&set);
            let waiter_flag = Arc::clone(&flag);
            handles.push(std::thread::spawn(move || {
                waiter_gate.acquire();
                while waiter_flag.load(Ordering::SeqCst) == 0 {
                    waiter_set.wait().expect("wait under gate");
                }
                waiter_gate.release().expect("owner release");
            }));
        }

        while set.waiting() < 3 {
            std::thread::yield_now();
        }
        gate.acquire();
        flag.store(1, Ordering::SeqCst);
        set.signal_all().expect("broadcast under gate");
        gate.release().expect("owner release");
        for handle in handles {
            handle.join().expect("waiter panicked");
        }
        crate::test_complete!("signal_all_releases_every_waiter");
    }

    #[test]
    fn cancelled_wait_reacquires_gate_and_reports() {
        init_test("cancelled_wait_reacquires_gate_and_reports");
        let gate = Arc::new(Gate::new());
        let set = Arc::new(WaitSet::new(Arc::clone(&gate)));
        let token = CancelToken::new();

        let waiter_gate = Arc::clone(&gate);
        let waiter_set = Arc::clone(&set);
        let waiter_token = token.clone();
        let handle = std::thread::spawn(move || {
            waiter_gate.acquire();
            let result = waiter_set.wait_cancellable(&waiter_token);
            let held = waiter_gate.is_held_by_current();
            waiter_gate.release().expect("owner release");
            (result, held)
        });

        while set.waiting() == 0 {
            std::thread::yield_now();
        }
        token.cancel();
        let (result, held) = handle.join().expect("waiter panicked");
        crate::assert_with_log!(
            result == Err(WaitError::Cancelled),
            "wait cancelled",
            Err::<(), _>(WaitError::Cancelled),
            result
        );
        crate::assert_with_log!(held, "gate reacquired before report", true, held);
        crate::assert_with_log!(set.waiting() == 0, "entry removed", 0usize, set.waiting());
        crate::test_complete!("cancelled_wait_reacquires_gate_and_reports");
    }

    #[test]
    fn cancelled_waiter_forwards_consumed_signal() {
        init_test("cancelled_waiter_forwards_consumed_signal");
        let gate = Arc::new(Gate::new());
        let set = Arc::new(WaitSet::new(Arc::clone(&gate)));
        let flag = Arc::new(AtomicUsize::new(0));
        let token = CancelToken::new();

        // First waiter, cancellable, enqueued at the head of the set.
        let first_gate = Arc::clone(&gate);
        let first_set = Arc::clone(&set);
        let first_token = token.clone();
        let first = std::thread::spawn(move || {
            first_gate.acquire();
            let result = first_set.wait_cancellable(&first_token);
            first_gate.release().expect("owner release");
            result
        });
        while set.waiting() == 0 {
            std::thread::yield_now();
        }

        // Second waiter behind it, with a real predicate.
        let second_gate = Arc::clone(&gate);
        let second_set = Arc::clone(&set);
        let second_flag = Arc::clone(&flag);
        let second = std::thread::spawn(move || {
            second_gate.acquire();
            while second_flag.load(Ordering::SeqCst) == 0 {
                second_set.wait().expect("wait under gate");
            }
            second_gate.release().expect("owner release");
        });
        while set.waiting() < 2 {
            std::thread::yield_now();
        }

        // Cancel the head while holding the gate so it cannot resolve its
        // outcome yet; its entry stays queued and the next signal lands on
        // it.
        gate.acquire();
        token.cancel();
        // The cancelled waiter commits to cancellation and queues for the
        // gate to reacquire it.
        while gate.queued_waiters() == 0 {
            std::thread::yield_now();
        }
        flag.store(1, Ordering::SeqCst);
        set.signal_one().expect("signal under gate");
        gate.release().expect("owner release");

        // The head still reports cancellation, and the signal it consumed
        // must be handed on so the second waiter is released.
        let first_result = first.join().expect("first waiter panicked");
        crate::assert_with_log!(
            first_result == Err(WaitError::Cancelled),
            "head reports cancellation",
            Err::<(), _>(WaitError::Cancelled),
            first_result
        );
        second.join().expect("second waiter panicked");
        crate::assert_with_log!(set.waiting() == 0, "set drained", 0usize, set.waiting());
        crate::test_complete!("cancelled_waiter_forwards_consumed_signal");
    }
}
