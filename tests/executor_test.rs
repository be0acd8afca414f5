//! Integration tests for the upload task executor.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{FlakyStore, ScriptedClient, Step, seed, test_db, uris};
use deferq::delivery::{Delivery, DeliveryClient, DeliveryError};
use deferq::engine::{TaskExecutor, TaskOutcome, UploadQueue};
use deferq::model::{ItemId, RetryPolicy};
use deferq::scheduler::BackgroundTask;
use deferq::store::{QUEUE_KEY, QueueStore};

// ---------------------------------------------------------------------------
// Basic outcomes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_queue_reports_no_data_without_delivering() {
    let db = test_db().await;
    let queue = UploadQueue::new(db.clone());
    let client = ScriptedClient::new([]);
    let executor = TaskExecutor::new(queue, client.clone());

    assert_eq!(executor.run_once().await, TaskOutcome::NoData);
    assert!(client.calls().await.is_empty());
}

#[tokio::test]
async fn empty_run_deletes_stale_empty_record() {
    let db = test_db().await;
    db.put_record(QUEUE_KEY, "[]").await.unwrap();
    let client = ScriptedClient::new([]);
    let executor = TaskExecutor::new(UploadQueue::new(db.clone()), client.clone());

    assert_eq!(executor.run_once().await, TaskOutcome::NoData);
    assert!(db.get_record(QUEUE_KEY).await.unwrap().is_none());
    assert!(client.calls().await.is_empty());
}

#[tokio::test]
async fn empty_run_deletes_stale_versioned_record() {
    let db = test_db().await;
    db.put_record(QUEUE_KEY, r#"{"version":1,"items":[]}"#)
        .await
        .unwrap();
    let executor = TaskExecutor::new(UploadQueue::new(db.clone()), ScriptedClient::new([]));

    assert_eq!(executor.run_once().await, TaskOutcome::NoData);
    assert!(db.get_record(QUEUE_KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn failure_then_success_drains_head_only() {
    let db = test_db().await;
    seed(&*db, &[("1", "a"), ("2", "b")]).await;
    let queue = UploadQueue::new(db.clone());
    let client = ScriptedClient::new([Step::Reject("timeout"), Step::Accept("benign")]);
    let executor = TaskExecutor::new(queue.clone(), client.clone());

    let before = queue.snapshot().await.unwrap();
    assert_eq!(executor.run_once().await, TaskOutcome::Failed);
    assert_eq!(queue.snapshot().await.unwrap(), before);

    assert_eq!(executor.run_once().await, TaskOutcome::NewData);
    assert_eq!(uris(&queue).await, vec!["b"]);

    // One item per run: "b" was never touched.
    assert_eq!(client.calls().await, vec!["a", "a"]);
}

#[tokio::test]
async fn items_are_delivered_in_enqueue_order() {
    let db = test_db().await;
    let queue = UploadQueue::new(db.clone());
    for uri in ["first", "second", "third"] {
        queue.enqueue(uri).await.unwrap();
    }
    let client = ScriptedClient::new([]);
    let executor = TaskExecutor::new(queue.clone(), client.clone());

    for _ in 0..3 {
        assert_eq!(executor.run_once().await, TaskOutcome::NewData);
    }
    assert_eq!(executor.run_once().await, TaskOutcome::NoData);
    assert_eq!(client.calls().await, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn failed_head_blocks_the_rest_under_unbounded_policy() {
    let db = test_db().await;
    seed(&*db, &[("1", "stuck"), ("2", "next")]).await;
    let queue = UploadQueue::new(db.clone());
    let client = ScriptedClient::new((0..5).map(|_| Step::Reject("offline")));
    let executor = TaskExecutor::new(queue.clone(), client.clone());

    for _ in 0..5 {
        assert_eq!(executor.run_once().await, TaskOutcome::Failed);
    }
    assert_eq!(uris(&queue).await, vec!["stuck", "next"]);
    assert_eq!(queue.attempts().await.unwrap().get(&ItemId::from("1")), 5);
    assert!(queue.dead_letters().await.unwrap().is_empty());

    assert_eq!(executor.run_once().await, TaskOutcome::NewData);
    assert_eq!(uris(&queue).await, vec!["next"]);
    assert_eq!(queue.attempts().await.unwrap().get(&ItemId::from("1")), 0);
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn panicking_client_is_reported_as_failed() {
    let db = test_db().await;
    seed(&*db, &[("1", "a")]).await;
    let queue = UploadQueue::new(db.clone());
    let executor = TaskExecutor::new(queue.clone(), ScriptedClient::new([Step::Panic]));

    assert_eq!(executor.run_once().await, TaskOutcome::Failed);
    assert_eq!(uris(&queue).await, vec!["a"]);
}

#[tokio::test]
async fn unreadable_store_is_reported_as_failed() {
    let store = FlakyStore::new(test_db().await);
    seed(&*store, &[("1", "a")]).await;
    store.set_fail_reads(true);

    let client = ScriptedClient::new([]);
    let executor = TaskExecutor::new(UploadQueue::new(store.clone()), client.clone());

    assert_eq!(executor.run_once().await, TaskOutcome::Failed);
    assert!(client.calls().await.is_empty());
}

#[tokio::test]
async fn lost_removal_redelivers_on_next_run() {
    let store = FlakyStore::new(test_db().await);
    seed(&*store, &[("1", "a"), ("2", "b")]).await;
    let queue = UploadQueue::new(store.clone());
    let client = ScriptedClient::new([]);
    let executor = TaskExecutor::new(queue.clone(), client.clone());

    // Delivery succeeds but the removal never reaches disk.
    store.set_fail_writes(true);
    assert_eq!(executor.run_once().await, TaskOutcome::Failed);
    store.set_fail_writes(false);
    assert_eq!(uris(&queue).await, vec!["a", "b"]);

    assert_eq!(executor.run_once().await, TaskOutcome::NewData);
    assert_eq!(uris(&queue).await, vec!["b"]);
    assert_eq!(client.calls().await, vec!["a", "a"]);
}

#[tokio::test]
async fn bounded_policy_dead_letters_exhausted_head() {
    let db = test_db().await;
    seed(&*db, &[("1", "bad"), ("2", "good")]).await;
    let queue = UploadQueue::new(db.clone());
    let client = ScriptedClient::new([Step::Reject("decode error"), Step::Reject("decode error")]);
    let executor =
        TaskExecutor::new(queue.clone(), client.clone()).with_retry_policy(RetryPolicy::bounded(2));

    assert_eq!(executor.run_once().await, TaskOutcome::Failed);
    assert_eq!(uris(&queue).await, vec!["bad", "good"]);

    assert_eq!(executor.run_once().await, TaskOutcome::Failed);
    assert_eq!(uris(&queue).await, vec!["good"]);

    let dead = queue.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].item.uri, "bad");
    assert_eq!(dead[0].attempts, 2);
    assert!(dead[0].reason.contains("decode error"));

    assert_eq!(executor.run_once().await, TaskOutcome::NewData);
    assert!(queue.snapshot().await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

/// Enqueues a new capture while the delivery is in flight.
struct EnqueueDuringDelivery {
    queue: UploadQueue,
}

#[async_trait]
impl DeliveryClient for EnqueueDuringDelivery {
    async fn deliver(&self, _uri: &str) -> Result<Delivery, DeliveryError> {
        self.queue
            .enqueue("x")
            .await
            .map_err(|e| DeliveryError::Response(e.to_string()))?;
        Ok(Delivery::labeled("benign"))
    }
}

#[tokio::test]
async fn append_during_delivery_is_not_lost() {
    let db = test_db().await;
    seed(&*db, &[("1", "a"), ("2", "b")]).await;
    let queue = UploadQueue::new(db.clone());
    let client = Arc::new(EnqueueDuringDelivery {
        queue: queue.clone(),
    });
    let executor = TaskExecutor::new(queue.clone(), client);

    assert_eq!(executor.run_once().await, TaskOutcome::NewData);
    assert_eq!(uris(&queue).await, vec!["b", "x"]);
}

#[tokio::test]
async fn overlapping_invocations_deliver_each_item_once() {
    let db = test_db().await;
    seed(&*db, &[("1", "a"), ("2", "b")]).await;
    let queue = UploadQueue::new(db.clone());
    let client = ScriptedClient::new([]);
    let executor = Arc::new(TaskExecutor::new(queue.clone(), client.clone()));

    let (first, second) = tokio::join!(executor.run_once(), executor.run_once());
    assert_eq!(first, TaskOutcome::NewData);
    assert_eq!(second, TaskOutcome::NewData);
    assert!(queue.snapshot().await.unwrap().is_empty());
    assert_eq!(client.calls().await, vec!["a", "b"]);
}

#[tokio::test]
async fn executor_runs_as_a_background_task() {
    let db = test_db().await;
    seed(&*db, &[("1", "a")]).await;
    let task: Arc<dyn BackgroundTask> = Arc::new(TaskExecutor::new(
        UploadQueue::new(db.clone()),
        ScriptedClient::new([]),
    ));

    assert_eq!(task.run().await, TaskOutcome::NewData);
    assert_eq!(task.run().await, TaskOutcome::NoData);
    assert!(db.read().await.unwrap().is_empty());
}
