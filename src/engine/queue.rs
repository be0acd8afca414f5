//! Shared handle on the persisted upload queue.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::Result;
use crate::model::{AttemptLog, DeadLetter, ItemId, Queue, QueueItem};
use crate::store::QueueStore;

/// Producer and consumer view of the queue.
///
/// Clones share one lease, held only across a read-modify-write round trip
/// (never across a delivery), so in-process producers and the executor
/// cannot overwrite each other's changes. Separate processes still race
/// past the read step; the store's last write wins.
#[derive(Clone)]
pub struct UploadQueue {
    pub(super) store: Arc<dyn QueueStore>,
    pub(super) lease: Arc<Mutex<()>>,
}

impl UploadQueue {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            store,
            lease: Arc::new(Mutex::new(())),
        }
    }

    /// Fresh read of the persisted queue.
    pub async fn snapshot(&self) -> Result<Queue> {
        self.store.read().await
    }

    /// Failed-attempt counters for queued items.
    pub async fn attempts(&self) -> Result<AttemptLog> {
        self.store.attempts().await
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        self.store.dead_letters().await
    }

    /// Remove a delivered item by identity from a freshly read queue.
    ///
    /// Returns false if the item was no longer queued.
    pub(crate) async fn complete(&self, id: &ItemId) -> Result<bool> {
        let _lease = self.lease.lock().await;
        let mut queue = self.store.read().await?;
        if queue.remove(id).is_none() {
            return Ok(false);
        }
        self.store.write(&queue).await?;
        Ok(true)
    }

    pub(crate) async fn record_failure(&self, id: &ItemId) -> Result<u32> {
        let _lease = self.lease.lock().await;
        self.store.record_attempt(id).await
    }

    pub(crate) async fn dead_letter(
        &self,
        item: &QueueItem,
        attempts: u32,
        reason: &str,
    ) -> Result<()> {
        let _lease = self.lease.lock().await;
        self.store.dead_letter(item, attempts, reason).await
    }

    /// Drop a stale empty record (e.g. a persisted `[]`), unless something
    /// was enqueued in the meantime.
    pub(crate) async fn clear_if_empty(&self) -> Result<()> {
        let _lease = self.lease.lock().await;
        if self.store.read().await?.is_empty() {
            self.store.write(&Queue::new()).await?;
        }
        Ok(())
    }
}
