//! Bounded, closable queues connecting stage workers.
//!
//! Queues are the only suspension points in the runtime besides the
//! orchestrator's wait loop. Both operations observe the [`StopToken`] in
//! their wait condition, and `close()` broadcasts to both sides, so a stop
//! request followed by the orchestrator's queue closure unblocks every
//! waiter in bounded time.

mod bounded;
mod durable;

pub use bounded::BoundedQueue;
pub use durable::DurableQueue;

use crate::payload::Payload;
use crate::token::StopToken;

/// The queue interface shared by producers and consumers.
///
/// Ordering contract: within one queue, the order of successful pushes
/// equals the order of successful pops. Across queues, or across multiple
/// producers into one queue, no order is defined.
pub trait PayloadQueue: Send + Sync {
    /// Append a payload, blocking while the queue is full.
    ///
    /// Returns false when the queue wakes on closure or stop without room
    /// to store the item; the item is dropped in that case. After a
    /// successful append one `pop` waiter is woken.
    fn push(&self, item: Payload, stop: &StopToken) -> bool;

    /// Remove the front payload, blocking while the queue is empty.
    ///
    /// Returns the front item whenever one is available, even after
    /// closure or stop, so consumers drain remaining records. Returns
    /// `None` once the queue is empty and closed, or empty and stopped.
    fn pop(&self, stop: &StopToken) -> Option<Payload>;

    /// Close the queue and wake every waiter on both sides. Idempotent.
    /// No `push` succeeds after `close` returns.
    fn close(&self);
}
