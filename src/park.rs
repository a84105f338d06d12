//! Internal thread-suspension step shared by the gate and wait-sets.
//!
//! A single bounded park against an optional deadline. Spurious returns
//! are allowed (and expected): callers re-validate their predicate under
//! their own lock after every return.

use std::thread;
use std::time::{Duration, Instant};

/// Why a park step returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParkWake {
    /// Unparked or woke spuriously; the caller must re-check its predicate.
    Woken,
    /// The deadline has passed.
    DeadlineElapsed,
}

/// Converts a timeout into an absolute deadline.
///
/// Returns `None` when `now + timeout` overflows `Instant` (for example
/// `Duration::MAX`), which callers treat as an unbounded wait rather than
/// a panic.
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Parks the current thread once, bounded by `deadline` when present.
///
/// Returns [`ParkWake::DeadlineElapsed`] without parking if the deadline
/// is already in the past.
pub(crate) fn park_step(deadline: Option<Instant>) -> ParkWake {
    match deadline {
        None => {
            thread::park();
            ParkWake::Woken
        }
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                return ParkWake::DeadlineElapsed;
            }
            thread::park_timeout(deadline - now);
            ParkWake::Woken
        }
    }
}
