//! Queue store backed by the records table.
//!
//! Multi-record updates (queue + counters + dead letters) run in one
//! transaction; a crash mid-way leaves every record as it was.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqliteConnection;

use super::records::{decode_document, load_or_quarantine_on, save_document_on};
use crate::error::Result;
use crate::model::{AttemptLog, DeadLetter, ItemId, Queue, QueueItem};
use crate::store::{ATTEMPTS_KEY, DEAD_LETTER_KEY, QUEUE_KEY, QueueStore};

#[async_trait]
impl QueueStore for super::Db {
    async fn read(&self) -> Result<Queue> {
        let mut tx = self.pool().begin().await?;
        let queue = load_queue_on(&mut tx).await?;
        tx.commit().await?;
        Ok(queue)
    }

    async fn write(&self, queue: &Queue) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        save_queue_on(&mut tx, queue).await?;
        prune_attempts_on(&mut tx, queue).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn attempts(&self) -> Result<AttemptLog> {
        let mut tx = self.pool().begin().await?;
        let log = load_attempts_on(&mut tx).await?;
        tx.commit().await?;
        Ok(log)
    }

    async fn record_attempt(&self, id: &ItemId) -> Result<u32> {
        let mut tx = self.pool().begin().await?;
        let mut log = load_attempts_on(&mut tx).await?;
        let count = log.increment(id);
        save_document_on(&mut tx, ATTEMPTS_KEY, &log, log.is_empty()).await?;
        tx.commit().await?;
        Ok(count)
    }

    async fn dead_letter(&self, item: &QueueItem, attempts: u32, reason: &str) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        // Re-read so items appended since the caller's snapshot survive.
        let mut queue = load_queue_on(&mut tx).await?;
        queue.remove(&item.id);
        save_queue_on(&mut tx, &queue).await?;

        let mut dead: Vec<DeadLetter> =
            load_or_quarantine_on(&mut tx, DEAD_LETTER_KEY, decode_document).await?;
        dead.push(DeadLetter {
            item: item.clone(),
            attempts,
            reason: reason.to_string(),
            dead_at: Utc::now(),
        });
        save_document_on(&mut tx, DEAD_LETTER_KEY, &dead, false).await?;

        prune_attempts_on(&mut tx, &queue).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let mut tx = self.pool().begin().await?;
        let dead = load_or_quarantine_on(&mut tx, DEAD_LETTER_KEY, decode_document).await?;
        tx.commit().await?;
        Ok(dead)
    }
}

async fn load_queue_on(conn: &mut SqliteConnection) -> Result<Queue> {
    load_or_quarantine_on(conn, QUEUE_KEY, Queue::decode).await
}

async fn save_queue_on(conn: &mut SqliteConnection, queue: &Queue) -> Result<()> {
    save_document_on(conn, QUEUE_KEY, &queue.items(), queue.is_empty()).await
}

async fn load_attempts_on(conn: &mut SqliteConnection) -> Result<AttemptLog> {
    load_or_quarantine_on(conn, ATTEMPTS_KEY, decode_document).await
}

/// Forget counters for items no longer queued.
async fn prune_attempts_on(conn: &mut SqliteConnection, queue: &Queue) -> Result<()> {
    let mut log = load_attempts_on(conn).await?;
    if log.retain(|id| queue.contains(id)) {
        save_document_on(conn, ATTEMPTS_KEY, &log, log.is_empty()).await?;
    }
    Ok(())
}
