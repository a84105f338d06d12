//! Counting permit gate (semaphore) with optional fairness and an
//! optional release cap.
//!
//! A [`PermitGate`] tracks a pool of permits. Each acquire deducts
//! permits, each release returns them; at most the configured number of
//! holders proceed concurrently. Multi-permit acquires deduct atomically:
//! either all `n` permits are taken in one step or none are.
//!
//! # Fairness
//!
//! In fair mode permits are granted in strict arrival order: a later
//! arrival never overtakes a blocked earlier one, even if it races to
//! check availability first. Unfair mode allows overtaking and makes no
//! ordering guarantee.
//!
//! # Over-release
//!
//! With [`max_permits`](PermitGate::with_max_permits) configured, a
//! release that would push `available` past the cap is a usage error:
//! it is rejected with [`ReleaseError::WouldExceedMax`] and leaves the
//! count unchanged. Without a cap, releases may grow the pool without
//! bound (the addition is still checked; arithmetic overflow is reported
//! as the same usage error rather than wrapping).
//!
//! # Example
//!
//! ```
//! use gatesync::PermitGate;
//!
//! let permits = PermitGate::new_fair(3);
//! permits.acquire();
//! permits.acquire();
//! assert_eq!(permits.available_permits(), 1);
//! permits.release().unwrap();
//! permits.release().unwrap();
//! assert_eq!(permits.available_permits(), 3);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::gate::Gate;
use crate::park;
use crate::waitset::{WaitError, WaitSet};

/// Error returned when a timed or cancellable permit acquire gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitAcquireError {
    /// The timeout elapsed before enough permits were available.
    TimedOut,
    /// Cancelled while waiting.
    Cancelled,
}

impl std::fmt::Display for PermitAcquireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimedOut => write!(f, "permit acquire timed out"),
            Self::Cancelled => write!(f, "permit acquire cancelled"),
        }
    }
}

impl std::error::Error for PermitAcquireError {}

/// Error returned when a non-blocking acquire finds too few permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoPermits;

impl std::fmt::Display for NoPermits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no permits available")
    }
}

impl std::error::Error for NoPermits {}

/// Error returned when a release would exceed the configured maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseError {
    /// `available + released` would pass `max_permits` (or overflow).
    WouldExceedMax,
}

impl std::fmt::Display for ReleaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WouldExceedMax => write!(f, "permit release exceeds maximum"),
        }
    }
}

impl std::error::Error for ReleaseError {}

#[derive(Debug)]
struct PermitState {
    /// Permits currently available; never negative by construction.
    available: usize,
    /// Fair mode: tickets of blocked acquirers in arrival order. A waiter
    /// is eligible only while its ticket is at the head.
    queue: VecDeque<u64>,
    next_ticket: u64,
}

/// Bounded (or unbounded) pool of permits built from one gate and one
/// wait-set.
#[derive(Debug)]
pub struct PermitGate {
    gate: Arc<Gate>,
    /// Blocked acquirers wait here; releases broadcast because waiters
    /// may demand different permit counts.
    permit_available: WaitSet,
    state: StdMutex<PermitState>,
    fair: bool,
    max_permits: Option<usize>,
}

impl PermitGate {
    /// Creates an unfair permit gate with `permits` initial permits.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self::with_fairness(permits, false)
    }

    /// Creates a fair permit gate: permits are granted in arrival order.
    #[must_use]
    pub fn new_fair(permits: usize) -> Self {
        Self::with_fairness(permits, true)
    }

    fn with_fairness(permits: usize, fair: bool) -> Self {
        let gate = Arc::new(Gate::new());
        Self {
            permit_available: WaitSet::new(Arc::clone(&gate)),
            gate,
            state: StdMutex::new(PermitState {
                available: permits,
                queue: VecDeque::new(),
                next_ticket: 0,
            }),
            fair,
            max_permits: None,
        }
    }

    /// Caps `available` at `max`: releases past the cap are rejected.
    ///
    /// # Panics
    ///
    /// Panics if `max` is below the current permit count.
    #[must_use]
    pub fn with_max_permits(mut self, max: usize) -> Self {
        let available = self.state.lock().expect("permit state poisoned").available;
        assert!(
            max >= available,
            "max_permits below initial permit count"
        );
        self.max_permits = Some(max);
        self
    }

    /// Returns true if permits are granted in arrival order.
    #[must_use]
    pub fn is_fair(&self) -> bool {
        self.fair
    }

    /// Returns the number of permits currently available.
    ///
    /// Advisory: the value may be stale the instant this returns.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.state.lock().expect("permit state poisoned").available
    }

    /// Number of threads currently blocked acquiring. Advisory, exposed
    /// for tests and diagnostics.
    #[must_use]
    pub fn waiting_acquirers(&self) -> usize {
        self.permit_available.waiting()
    }

    /// Acquires one permit, blocking until available.
    pub fn acquire(&self) {
        self.acquire_many(1);
    }

    /// Acquires `n` permits atomically, blocking until all are available
    /// at once.
    pub fn acquire_many(&self, n: usize) {
        match self.acquire_inner(n, None, None) {
            Ok(()) => {}
            Err(_) => unreachable!("untimed, uncancellable acquire cannot fail"),
        }
    }

    /// Acquires one permit only if available right now.
    ///
    /// # Errors
    ///
    /// Returns [`NoPermits`] if none are free.
    pub fn try_acquire(&self) -> Result<(), NoPermits> {
        self.try_acquire_many(1)
    }

    /// Acquires `n` permits only if all are available right now.
    ///
    /// On a fair gate this refuses to overtake blocked earlier arrivals.
    ///
    /// # Errors
    ///
    /// Returns [`NoPermits`] if fewer than `n` are free.
    pub fn try_acquire_many(&self, n: usize) -> Result<(), NoPermits> {
        self.gate.acquire();
        let result = {
            let mut state = self.state.lock().expect("permit state poisoned");
            if state.available >= n && (!self.fair || state.queue.is_empty()) {
                state.available -= n;
                Ok(())
            } else {
                Err(NoPermits)
            }
        };
        self.gate.release().expect("gate held across try_acquire");
        result
    }

    /// Acquires one permit, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`PermitAcquireError::TimedOut`] on expiry; no permits are
    /// deducted.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<(), PermitAcquireError> {
        self.acquire_inner(1, park::deadline_after(timeout), None)
    }

    /// Acquires `n` permits atomically, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`PermitAcquireError::TimedOut`] on expiry; no permits are
    /// deducted.
    pub fn acquire_many_timeout(
        &self,
        n: usize,
        timeout: Duration,
    ) -> Result<(), PermitAcquireError> {
        self.acquire_inner(n, park::deadline_after(timeout), None)
    }

    /// Acquires one permit, giving up if `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`PermitAcquireError::Cancelled`]; no permits are deducted.
    pub fn acquire_cancellable(&self, token: &CancelToken) -> Result<(), PermitAcquireError> {
        self.acquire_inner(1, None, Some(token))
    }

    /// Acquires `n` permits atomically, giving up if `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`PermitAcquireError::Cancelled`]; no permits are deducted.
    pub fn acquire_many_cancellable(
        &self,
        n: usize,
        token: &CancelToken,
    ) -> Result<(), PermitAcquireError> {
        self.acquire_inner(n, None, Some(token))
    }

    /// Returns one permit to the pool and wakes waiters. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::WouldExceedMax`] if a configured cap would
    /// be exceeded; the count is unchanged.
    pub fn release(&self) -> Result<(), ReleaseError> {
        self.release_many(1)
    }

    /// Returns `n` permits to the pool and wakes waiters. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::WouldExceedMax`] if a configured cap (or
    /// the integer range) would be exceeded; the count is unchanged.
    pub fn release_many(&self, n: usize) -> Result<(), ReleaseError> {
        self.gate.acquire();
        let result = {
            let mut state = self.state.lock().expect("permit state poisoned");
            match state.available.checked_add(n) {
                Some(total) if self.max_permits.map_or(true, |max| total <= max) => {
                    state.available = total;
                    Ok(())
                }
                _ => Err(ReleaseError::WouldExceedMax),
            }
        };
        if result.is_ok() {
            // Broadcast: waiters demand different counts, so wake-one
            // could pick one that still cannot proceed.
            self.permit_available
                .signal_all()
                .expect("gate held across release");
        }
        self.gate.release().expect("gate held across release");
        result
    }

    fn acquire_inner(
        &self,
        n: usize,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> Result<(), PermitAcquireError> {
        if let Some(token) = cancel {
            if self.gate.acquire_cancellable(token).is_err() {
                return Err(PermitAcquireError::Cancelled);
            }
        } else {
            self.gate.acquire();
        }
        let ticket = if self.fair {
            let mut state = self.state.lock().expect("permit state poisoned");
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.queue.push_back(ticket);
            Some(ticket)
        } else {
            None
        };
        loop {
            let granted = {
                let mut state = self.state.lock().expect("permit state poisoned");
                let at_head = ticket.map_or(true, |t| state.queue.front() == Some(&t));
                if at_head && state.available >= n {
                    state.available -= n;
                    if ticket.is_some() {
                        state.queue.pop_front();
                    }
                    // Leftover permits may satisfy the next queued waiter.
                    state.available > 0 && !state.queue.is_empty()
                } else {
                    drop(state);
                    tracing::trace!(target: "gatesync::permits", n, "permits::acquire waiting");
                    match self.permit_available.wait_inner(deadline, cancel) {
                        Ok(result) if result.timed_out() => {
                            self.abandon(ticket);
                            self.gate.release().expect("gate held across acquire");
                            return Err(PermitAcquireError::TimedOut);
                        }
                        Ok(_) => continue,
                        Err(WaitError::Cancelled) => {
                            self.abandon(ticket);
                            self.gate.release().expect("gate held across acquire");
                            return Err(PermitAcquireError::Cancelled);
                        }
                        Err(WaitError::NotOwner) => {
                            unreachable!("gate held across permit wait")
                        }
                    }
                }
            };
            if granted {
                self.permit_available
                    .signal_all()
                    .expect("gate held across acquire");
            }
            self.gate.release().expect("gate held across acquire");
            return Ok(());
        }
    }

    /// Drops a fair-mode ticket after a timeout or cancellation. The gate
    /// is held. Successors may become eligible when the head leaves, so
    /// wake them to re-check.
    fn abandon(&self, ticket: Option<u64>) {
        let Some(ticket) = ticket else { return };
        let was_head = {
            let mut state = self.state.lock().expect("permit state poisoned");
            let was_head = state.queue.front() == Some(&ticket);
            if let Some(pos) = state.queue.iter().position(|&queued| queued == ticket) {
                state.queue.remove(pos);
            }
            was_head
        };
        if was_head {
            self.permit_available
                .signal_all()
                .expect("gate held across abandon");
        }
    }
}
