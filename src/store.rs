//! The persistent queue store seam.
//!
//! The store exclusively owns the serialized queue. Producers and the task
//! executor never keep a copy across calls; every change is a fresh
//! read-modify-write. There is no cross-process lock: the last write wins.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{AttemptLog, DeadLetter, ItemId, Queue, QueueItem};

/// Storage key holding the pending queue.
pub const QUEUE_KEY: &str = "upload_queue";
/// Storage key holding failed-attempt counters.
pub const ATTEMPTS_KEY: &str = "upload_queue.attempts";
/// Storage key holding items that exhausted their retry budget.
pub const DEAD_LETTER_KEY: &str = "upload_queue.dead_letters";

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Current queue. No record reads as an empty queue, never an error.
    async fn read(&self) -> Result<Queue>;

    /// Atomically replace the queue; an empty queue deletes the record.
    async fn write(&self, queue: &Queue) -> Result<()>;

    /// Failed-attempt counters for queued items.
    async fn attempts(&self) -> Result<AttemptLog>;

    /// Count one more failed attempt for `id`; returns the new total.
    async fn record_attempt(&self, id: &ItemId) -> Result<u32>;

    /// Move `item` (matched by id) from the queue to the dead-letter list.
    async fn dead_letter(&self, item: &QueueItem, attempts: u32, reason: &str) -> Result<()>;

    /// Everything dead-lettered so far, oldest first.
    async fn dead_letters(&self) -> Result<Vec<DeadLetter>>;
}
