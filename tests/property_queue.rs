#![allow(missing_docs)]
//! Property-based tests for the bounded queue.
//!
//! Checks the queue against a `VecDeque` reference model over arbitrary
//! sequences of non-blocking operations:
//! - FIFO: items come out in the order they were accepted
//! - Conservation: nothing is lost, duplicated or invented
//! - Bounds: the length never exceeds capacity and never goes negative
//! - Agreement: success/failure of each operation matches the model

mod common;

use common::test_proptest_config;
use gatesync::queue::{PutError, TakeError};
use gatesync::BoundedQueue;
use proptest::prelude::*;
use std::collections::VecDeque;

/// One non-blocking queue operation.
#[derive(Debug, Clone, Copy)]
enum Op {
    TryPut(u32),
    TryTake,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<u32>().prop_map(Op::TryPut),
        Just(Op::TryTake),
    ]
}

proptest! {
    #![proptest_config(test_proptest_config(500))]

    #[test]
    fn queue_agrees_with_model(
        capacity in 1usize..16,
        ops in proptest::collection::vec(op_strategy(), 0..200),
    ) {
        let queue = BoundedQueue::new(capacity);
        let mut model: VecDeque<u32> = VecDeque::new();

        for op in ops {
            match op {
                Op::TryPut(item) => {
                    let result = queue.try_put(item);
                    if model.len() < capacity {
                        prop_assert_eq!(result, Ok(()), "model has space");
                        model.push_back(item);
                    } else {
                        prop_assert_eq!(result, Err(PutError::Full(item)), "model is full");
                    }
                }
                Op::TryTake => {
                    let result = queue.try_take();
                    match model.pop_front() {
                        Some(expected) => prop_assert_eq!(result, Ok(expected), "fifo order"),
                        None => prop_assert_eq!(result, Err(TakeError::Empty), "model is empty"),
                    }
                }
            }
            prop_assert_eq!(queue.len(), model.len(), "length tracks model");
            prop_assert!(queue.len() <= capacity, "capacity is a hard bound");
        }

        // Drain and compare the remainder.
        while let Some(expected) = model.pop_front() {
            prop_assert_eq!(queue.take(), expected, "drained in fifo order");
        }
        prop_assert!(queue.is_empty(), "both empty at the end");
    }

    #[test]
    fn timed_failures_leave_the_queue_unchanged(
        capacity in 1usize..8,
        fill in 0usize..8,
    ) {
        let queue = BoundedQueue::new(capacity);
        let fill = fill.min(capacity);
        for item in 0..fill {
            queue.try_put(item as u32).expect("within capacity");
        }
        let before = queue.len();

        if before == capacity {
            let result = queue.put_timeout(99, std::time::Duration::from_millis(1));
            prop_assert_eq!(result, Err(PutError::TimedOut(99)));
        }
        if before == 0 {
            let result = queue.take_timeout(std::time::Duration::from_millis(1));
            prop_assert_eq!(result, Err(TakeError::TimedOut));
        }
        prop_assert_eq!(queue.len(), before, "failed timed ops mutate nothing");
    }
}
