//! In-memory bounded queue.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::PayloadQueue;
use crate::payload::Payload;
use crate::token::StopToken;

/// Re-check interval for blocked waiters.
///
/// The stop token has no waker of its own; closure broadcasts, but a bare
/// stop request is only observed by re-evaluating the wait condition.
const WAIT_SLICE: Duration = Duration::from_millis(50);

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A FIFO of fixed capacity holding items of type `T`, guarded by a single
/// mutex and two condition variables (`not_empty`, `not_full`).
///
/// Both blocking operations honour the [`StopToken`]; `close()` is
/// idempotent and wakes every waiter. Producers that wake due to closure
/// or stop never mutate queue state.
pub struct BoundedQueue<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// The fixed capacity this queue was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// True when no items are queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// True once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Append an item, blocking while the queue is full and neither closed
    /// nor stopped. Returns false when it wakes on closure or stop.
    pub fn push(&self, item: T, stop: &StopToken) -> bool {
        let mut inner = self.inner.lock();
        while !inner.closed && !stop.stop_requested() && inner.items.len() == self.capacity {
            self.not_full.wait_for(&mut inner, WAIT_SLICE);
        }

        if inner.closed || stop.stop_requested() {
            return false;
        }

        inner.items.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Remove the front item, blocking while the queue is empty and
    /// neither closed nor stopped. An item is returned whenever one is
    /// available, even after closure or stop.
    pub fn pop(&self, stop: &StopToken) -> Option<T> {
        let mut inner = self.inner.lock();
        while !inner.closed && !stop.stop_requested() && inner.items.is_empty() {
            self.not_empty.wait_for(&mut inner, WAIT_SLICE);
        }

        let item = inner.items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Close the queue and wake every waiter on both sides. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

impl PayloadQueue for BoundedQueue<Payload> {
    fn push(&self, item: Payload, stop: &StopToken) -> bool {
        BoundedQueue::push(self, item, stop)
    }

    fn pop(&self, stop: &StopToken) -> Option<Payload> {
        BoundedQueue::pop(self, stop)
    }

    fn close(&self) {
        BoundedQueue::close(self)
    }
}
