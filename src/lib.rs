//! Gatesync: blocking concurrency primitives built from first principles.
//!
//! # Overview
//!
//! Gatesync provides the classic runtime-provided synchronizers as a small
//! library built directly on a mutual-exclusion gate plus a condition
//! wait-set mechanism, with nothing pre-built underneath but raw thread
//! parking:
//!
//! - [`Gate`]: reentrant exclusive lock with fair (FIFO) and unfair
//!   acquisition modes
//! - [`WaitSet`]: wait/wake mechanism tied to one gate; callers re-check
//!   their predicate in a loop (spurious wakeups are part of the contract)
//! - [`BoundedQueue`]: fixed-capacity blocking FIFO built from one gate
//!   and two wait-sets ("space available", "item available")
//! - [`CountdownLatch`]: one-shot countdown built from one gate and one
//!   wait-set
//! - [`PermitGate`]: counting permits with optional FIFO fairness and an
//!   optional release cap
//! - [`CancelToken`]: cancellation signal for every blocking call
//!
//! # Core Guarantees
//!
//! - **Blocking, not spinning**: a suspended call always releases the
//!   underlying gate so other threads make progress
//! - **Distinct outcomes**: success, timeout and cancellation are separate
//!   results; timed-out and cancelled calls never mutate shared state
//! - **Misuse is reported**: releasing a gate or signalling a wait-set
//!   without owning the gate, and over-releasing a capped permit pool,
//!   are errors surfaced at the call site, never swallowed
//! - **Fairness where asked**: fair gates and fair permit pools grant
//!   strictly in arrival order, which makes acquisition order testable
//!
//! # Module Structure
//!
//! - [`gate`]: the exclusive lock
//! - [`waitset`]: condition wait-sets
//! - [`queue`]: bounded blocking queue
//! - [`latch`]: one-shot countdown latch
//! - [`permits`]: counting permit gate
//! - [`cancel`]: cancellation tokens
//! - [`test_utils`]: logging and assertion helpers for tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod gate;
pub mod latch;
mod park;
pub mod permits;
pub mod queue;
pub mod test_utils;
pub mod waitset;

// Re-exports for convenient access to the primitives.
pub use cancel::CancelToken;
pub use gate::Gate;
pub use latch::CountdownLatch;
pub use permits::PermitGate;
pub use queue::BoundedQueue;
pub use waitset::WaitSet;
