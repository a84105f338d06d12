//! Bounded blocking FIFO queue.
//!
//! A fixed-capacity circular buffer guarded by one [`Gate`] and two
//! wait-sets: producers blocked on a full queue wait on `space_available`,
//! consumers blocked on an empty queue wait on `item_available`.
//!
//! Capacity is a hard upper bound: the element count never exceeds it and
//! never goes negative. Items are taken in the order they were accepted
//! into the buffer, across all producers. Timed and cancelled operations
//! leave the queue untouched (no partial insert or remove) and hand the
//! rejected item back inside the error.
//!
//! # Example
//!
//! ```
//! use gatesync::BoundedQueue;
//!
//! let queue = BoundedQueue::new(2);
//! queue.put("a");
//! queue.put("b");
//! assert!(queue.try_put("c").is_err()); // full
//! assert_eq!(queue.take(), "a");
//! ```

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::gate::Gate;
use crate::park;
use crate::waitset::{WaitError, WaitSet};

/// Error returned when an insertion fails; carries the rejected item so
/// the caller keeps ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutError<T> {
    /// The queue is full (non-blocking put).
    Full(T),
    /// The timeout elapsed while the queue stayed full.
    TimedOut(T),
    /// Cancelled while waiting for space.
    Cancelled(T),
}

impl<T> PutError<T> {
    /// Consumes the error, returning the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::TimedOut(item) | Self::Cancelled(item) => item,
        }
    }
}

impl<T> std::fmt::Display for PutError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full(_) => write!(f, "queue is full"),
            Self::TimedOut(_) => write!(f, "queue put timed out"),
            Self::Cancelled(_) => write!(f, "queue put cancelled"),
        }
    }
}

impl<T: std::fmt::Debug> std::error::Error for PutError<T> {}

/// Error returned when a removal fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeError {
    /// The queue is empty (non-blocking take).
    Empty,
    /// The timeout elapsed while the queue stayed empty.
    TimedOut,
    /// Cancelled while waiting for an item.
    Cancelled,
}

impl std::fmt::Display for TakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "queue is empty"),
            Self::TimedOut => write!(f, "queue take timed out"),
            Self::Cancelled => write!(f, "queue take cancelled"),
        }
    }
}

impl std::error::Error for TakeError {}

/// Circular element store. Touched only while the gate is held, except
/// for advisory length reads.
#[derive(Debug)]
struct Ring<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> Ring<T> {
    fn push_back(&mut self, item: T) {
        debug_assert!(self.len < self.slots.len());
        let tail = (self.head + self.len) % self.slots.len();
        debug_assert!(self.slots[tail].is_none());
        self.slots[tail] = Some(item);
        self.len += 1;
    }

    fn pop_front(&mut self) -> T {
        debug_assert!(self.len > 0);
        let item = self.slots[self.head].take().expect("head slot occupied");
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        item
    }
}

/// A fixed-capacity blocking FIFO built from one gate and two wait-sets.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    gate: Arc<Gate>,
    /// Producers wait here while the queue is full.
    space_available: WaitSet,
    /// Consumers wait here while the queue is empty.
    item_available: WaitSet,
    /// Element store; the gate carries ownership, this inner mutex is
    /// uncontended and only makes the storage shareable.
    ring: StdMutex<Ring<T>>,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "queue requires capacity >= 1");
        let gate = Arc::new(Gate::new());
        Self {
            space_available: WaitSet::new(Arc::clone(&gate)),
            item_available: WaitSet::new(Arc::clone(&gate)),
            gate,
            ring: StdMutex::new(Ring {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                len: 0,
            }),
        }
    }

    /// Returns the fixed capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.lock().expect("queue ring poisoned").slots.len()
    }

    /// Returns the current element count.
    ///
    /// Advisory under concurrent access: the value may be stale the
    /// instant this returns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.lock().expect("queue ring poisoned").len
    }

    /// Returns true if the queue currently holds no items. Advisory.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of producers currently blocked waiting for space.
    /// Advisory, exposed for tests and diagnostics.
    #[must_use]
    pub fn waiting_producers(&self) -> usize {
        self.space_available.waiting()
    }

    /// Number of consumers currently blocked waiting for an item.
    /// Advisory, exposed for tests and diagnostics.
    #[must_use]
    pub fn waiting_consumers(&self) -> usize {
        self.item_available.waiting()
    }

    /// Inserts `item`, blocking while the queue is full.
    pub fn put(&self, item: T) {
        match self.put_inner(item, None, None) {
            Ok(()) => {}
            Err(_) => unreachable!("untimed, uncancellable put cannot fail"),
        }
    }

    /// Inserts `item` only if space is free right now.
    ///
    /// # Errors
    ///
    /// Returns [`PutError::Full`] with the item if the queue is full.
    pub fn try_put(&self, item: T) -> Result<(), PutError<T>> {
        self.gate.acquire();
        let result = {
            let mut ring = self.ring.lock().expect("queue ring poisoned");
            if ring.len < ring.slots.len() {
                ring.push_back(item);
                Ok(())
            } else {
                Err(PutError::Full(item))
            }
        };
        if result.is_ok() {
            self.item_available
                .signal_one()
                .expect("gate held across put");
        }
        self.gate.release().expect("gate held across put");
        result
    }

    /// Inserts `item`, blocking up to `timeout` for space.
    ///
    /// # Errors
    ///
    /// Returns [`PutError::TimedOut`] with the item on expiry; the queue
    /// is unchanged.
    pub fn put_timeout(&self, item: T, timeout: Duration) -> Result<(), PutError<T>> {
        self.put_inner(item, park::deadline_after(timeout), None)
    }

    /// Inserts `item`, giving up if `token` is cancelled while waiting.
    ///
    /// # Errors
    ///
    /// Returns [`PutError::Cancelled`] with the item; the queue is
    /// unchanged.
    pub fn put_cancellable(&self, item: T, token: &CancelToken) -> Result<(), PutError<T>> {
        self.put_inner(item, None, Some(token))
    }

    /// Removes the oldest item, blocking while the queue is empty.
    pub fn take(&self) -> T {
        match self.take_inner(None, None) {
            Ok(item) => item,
            Err(_) => unreachable!("untimed, uncancellable take cannot fail"),
        }
    }

    /// Removes the oldest item only if one is present right now.
    ///
    /// # Errors
    ///
    /// Returns [`TakeError::Empty`] if the queue is empty.
    pub fn try_take(&self) -> Result<T, TakeError> {
        self.gate.acquire();
        let result = {
            let mut ring = self.ring.lock().expect("queue ring poisoned");
            if ring.len > 0 {
                Ok(ring.pop_front())
            } else {
                Err(TakeError::Empty)
            }
        };
        if result.is_ok() {
            self.space_available
                .signal_one()
                .expect("gate held across take");
        }
        self.gate.release().expect("gate held across take");
        result
    }

    /// Removes the oldest item, blocking up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`TakeError::TimedOut`] on expiry; the queue is unchanged.
    pub fn take_timeout(&self, timeout: Duration) -> Result<T, TakeError> {
        self.take_inner(park::deadline_after(timeout), None)
    }

    /// Removes the oldest item, giving up if `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`TakeError::Cancelled`]; the queue is unchanged.
    pub fn take_cancellable(&self, token: &CancelToken) -> Result<T, TakeError> {
        self.take_inner(None, Some(token))
    }

    fn put_inner(
        &self,
        item: T,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> Result<(), PutError<T>> {
        if let Some(token) = cancel {
            if self.gate.acquire_cancellable(token).is_err() {
                return Err(PutError::Cancelled(item));
            }
        } else {
            self.gate.acquire();
        }
        loop {
            {
                let mut ring = self.ring.lock().expect("queue ring poisoned");
                if ring.len < ring.slots.len() {
                    ring.push_back(item);
                    drop(ring);
                    self.item_available
                        .signal_one()
                        .expect("gate held across put");
                    self.gate.release().expect("gate held across put");
                    return Ok(());
                }
            }
            tracing::trace!(target: "gatesync::queue", "queue::put full, waiting");
            match self.wait_step(&self.space_available, deadline, cancel) {
                WaitStep::Retry => {}
                WaitStep::TimedOut => {
                    self.gate.release().expect("gate held across put");
                    return Err(PutError::TimedOut(item));
                }
                WaitStep::Cancelled => {
                    self.gate.release().expect("gate held across put");
                    return Err(PutError::Cancelled(item));
                }
            }
        }
    }

    fn take_inner(
        &self,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> Result<T, TakeError> {
        if let Some(token) = cancel {
            if self.gate.acquire_cancellable(token).is_err() {
                return Err(TakeError::Cancelled);
            }
        } else {
            self.gate.acquire();
        }
        loop {
            {
                let mut ring = self.ring.lock().expect("queue ring poisoned");
                if ring.len > 0 {
                    let item = ring.pop_front();
                    drop(ring);
                    self.space_available
                        .signal_one()
                        .expect("gate held across take");
                    self.gate.release().expect("gate held across take");
                    return Ok(item);
                }
            }
            tracing::trace!(target: "gatesync::queue", "queue::take empty, waiting");
            match self.wait_step(&self.item_available, deadline, cancel) {
                WaitStep::Retry => {}
                WaitStep::TimedOut => {
                    self.gate.release().expect("gate held across take");
                    return Err(TakeError::TimedOut);
                }
                WaitStep::Cancelled => {
                    self.gate.release().expect("gate held across take");
                    return Err(TakeError::Cancelled);
                }
            }
        }
    }

    /// One wait on `set` with the gate held; classifies the outcome.
    fn wait_step(
        &self,
        set: &WaitSet,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> WaitStep {
        match set.wait_inner(deadline, cancel) {
            Ok(result) if result.timed_out() => WaitStep::TimedOut,
            Ok(_) => WaitStep::Retry,
            Err(WaitError::Cancelled) => WaitStep::Cancelled,
            Err(WaitError::NotOwner) => unreachable!("gate held across queue wait"),
        }
    }
}

enum WaitStep {
    Retry,
    TimedOut,
    Cancelled,
}
