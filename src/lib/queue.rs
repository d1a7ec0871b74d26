//! Bounded blocking queues for pipeline flow control.
//!
//! [`AsyncQueue`] is a multi-producer/multi-consumer FIFO with a fixed
//! capacity and cooperative termination. Producers block while the queue is
//! full; consumers block while it is empty. After [`AsyncQueue::terminate`]
//! is called, pushes fail fast, while pops keep draining the items already
//! queued and report [`PopResult::Terminate`] once the queue is empty.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

/// Outcome of a pop operation.
#[derive(Debug, PartialEq, Eq)]
pub enum PopResult<T> {
    /// An item was dequeued.
    Item(T),
    /// The deadline passed before an item arrived.
    Timeout,
    /// The queue is terminated and drained.
    Terminate,
}

/// Error returned by [`AsyncQueue::push`] on a terminated queue.
///
/// Carries the rejected item back to the caller.
#[derive(Debug)]
pub struct Terminated<T>(pub T);

struct Inner<T> {
    items: VecDeque<T>,
    terminated: bool,
}

/// A bounded blocking MPMC queue with cooperative termination.
pub struct AsyncQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> AsyncQueue<T> {
    /// Creates a queue with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            inner: Mutex::new(Inner { items: VecDeque::with_capacity(capacity), terminated: false }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Pushes an item, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`Terminated`] with the item if the queue has been shut down.
    pub fn push(&self, item: T) -> Result<(), Terminated<T>> {
        let mut inner = self.inner.lock();
        loop {
            if inner.terminated {
                return Err(Terminated(item));
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(item);
                drop(inner);
                self.not_empty.notify_one();
                return Ok(());
            }
            self.not_full.wait(&mut inner);
        }
    }

    /// Pops an item, blocking until one is available or the queue is
    /// terminated and drained.
    pub fn pop(&self) -> PopResult<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return PopResult::Item(item);
            }
            if inner.terminated {
                return PopResult::Terminate;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Pops an item, giving up at `deadline`.
    ///
    /// Returns [`PopResult::Timeout`] if the deadline passes with the queue
    /// still empty and live.
    pub fn pop_until(&self, deadline: Instant) -> PopResult<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return PopResult::Item(item);
            }
            if inner.terminated {
                return PopResult::Terminate;
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                // Re-check: an item may have been pushed as the wait expired.
                return match inner.items.pop_front() {
                    Some(item) => {
                        drop(inner);
                        self.not_full.notify_one();
                        PopResult::Item(item)
                    }
                    None if inner.terminated => PopResult::Terminate,
                    None => PopResult::Timeout,
                };
            }
        }
    }

    /// Shuts the queue down. Idempotent.
    ///
    /// Removes no items: consumers drain what is already queued before
    /// observing [`PopResult::Terminate`]. Producers fail fast.
    pub fn terminate(&self) {
        let mut inner = self.inner.lock();
        inner.terminated = true;
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Returns true if the queue has been terminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.lock().terminated
    }

    /// Number of items currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Returns true if no items are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// The fixed capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
