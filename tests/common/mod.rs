//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use deferq::db::Db;
use deferq::delivery::{Delivery, DeliveryClient, DeliveryError};
use deferq::engine::UploadQueue;
use deferq::error::{Error, Result};
use deferq::model::{AttemptLog, DeadLetter, ItemId, Queue, QueueItem};
use deferq::store::QueueStore;
use tokio::sync::Mutex;

pub async fn test_db() -> Arc<Db> {
    Arc::new(Db::in_memory().await.expect("failed to create in-memory db"))
}

/// Seed the store with `(id, uri)` pairs, head first.
pub async fn seed(store: &dyn QueueStore, items: &[(&str, &str)]) {
    let queue = Queue::from_items(
        items
            .iter()
            .map(|(id, uri)| QueueItem::with_id(*id, *uri)),
    );
    store.write(&queue).await.unwrap();
}

pub async fn uris(queue: &UploadQueue) -> Vec<String> {
    queue
        .snapshot()
        .await
        .unwrap()
        .iter()
        .map(|item| item.uri.clone())
        .collect()
}

/// What a scripted delivery does.
pub enum Step {
    Accept(&'static str),
    Reject(&'static str),
    Panic,
}

/// Delivery client that plays back a script and records every call.
///
/// Once the script runs out, every delivery succeeds with label "ok".
pub struct ScriptedClient {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new(script: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl DeliveryClient for ScriptedClient {
    async fn deliver(&self, uri: &str) -> std::result::Result<Delivery, DeliveryError> {
        self.calls.lock().await.push(uri.to_string());
        let step = self.script.lock().await.pop_front();
        match step {
            None => Ok(Delivery::labeled("ok")),
            Some(Step::Accept(label)) => Ok(Delivery::labeled(label)),
            Some(Step::Reject(reason)) => Err(DeliveryError::Response(reason.to_string())),
            Some(Step::Panic) => panic!("delivery client blew up"),
        }
    }
}

/// Store wrapper whose reads or writes can be made to fail on demand.
pub struct FlakyStore {
    inner: Arc<Db>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<Db>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        })
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Other("storage unavailable".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Other("disk full".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for FlakyStore {
    async fn read(&self) -> Result<Queue> {
        self.check_read()?;
        self.inner.read().await
    }

    async fn write(&self, queue: &Queue) -> Result<()> {
        self.check_write()?;
        self.inner.write(queue).await
    }

    async fn attempts(&self) -> Result<AttemptLog> {
        self.check_read()?;
        self.inner.attempts().await
    }

    async fn record_attempt(&self, id: &ItemId) -> Result<u32> {
        self.check_write()?;
        self.inner.record_attempt(id).await
    }

    async fn dead_letter(&self, item: &QueueItem, attempts: u32, reason: &str) -> Result<()> {
        self.check_write()?;
        self.inner.dead_letter(item, attempts, reason).await
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        self.check_read()?;
        self.inner.dead_letters().await
    }
}
