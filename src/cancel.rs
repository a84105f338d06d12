//! Cancellation tokens for blocked operations.
//!
//! Every blocking operation in this crate has a `*_cancellable` variant
//! taking a [`CancelToken`]. Cancelling the token wakes every thread
//! currently blocked on such a call; the call removes itself from whatever
//! waiter queue it joined, leaves shared state exactly as it was, and
//! reports a cancelled outcome distinct from both success and timeout.
//!
//! Cancellation is sticky: once cancelled, a token stays cancelled, and
//! later cancellable calls observing it fail immediately.
//!
//! # Example
//!
//! ```
//! use gatesync::CancelToken;
//!
//! let token = CancelToken::new();
//! assert!(!token.is_cancelled());
//! token.cancel();
//! assert!(token.is_cancelled());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::thread::{self, Thread, ThreadId};

/// A cloneable, sticky cancellation signal.
///
/// Clones share the same underlying state: cancelling any clone cancels
/// them all. Threads blocked in a cancellable call register themselves
/// with the token before parking so that [`cancel`](Self::cancel) can
/// wake them.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: AtomicBool,
    /// Threads currently parked in a cancellable call observing this token.
    parked: StdMutex<Vec<(ThreadId, Thread)>>,
}

impl CancelToken {
    /// Creates a new, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Cancels the token and wakes every registered blocked thread.
    ///
    /// Idempotent: cancelling an already-cancelled token is a no-op beyond
    /// re-waking any currently registered threads.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        let parked = self.inner.parked.lock().expect("cancel registry poisoned");
        for (_, thread) in parked.iter() {
            thread.unpark();
        }
        tracing::trace!(target: "gatesync::cancel", waiters = parked.len(), "token cancelled");
    }

    /// Registers the current thread for wakeup on cancellation.
    ///
    /// The registration is removed when the returned guard drops.
    pub(crate) fn register_current(&self) -> CancelRegistration<'_> {
        let current = thread::current();
        let id = current.id();
        self.inner
            .parked
            .lock()
            .expect("cancel registry poisoned")
            .push((id, current));
        CancelRegistration { token: self, id }
    }
}

/// Guard removing a thread's cancellation registration on drop.
pub(crate) struct CancelRegistration<'a> {
    token: &'a CancelToken,
    id: ThreadId,
}

impl Drop for CancelRegistration<'_> {
    fn drop(&mut self) {
        let mut parked = self
            .token
            .inner
            .parked
            .lock()
            .expect("cancel registry poisoned");
        if let Some(pos) = parked.iter().position(|(id, _)| *id == self.id) {
            parked.swap_remove(pos);
        }
    }
}
