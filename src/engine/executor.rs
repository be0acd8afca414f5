//! Task executor: one scheduler wake-up, at most one delivery.

use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use tokio::sync::Mutex;
use tracing::{Instrument, Span, debug, error, info, warn};

use super::UploadQueue;
use crate::delivery::{Delivery, DeliveryClient, DeliveryError};
use crate::error::Result;
use crate::model::{QueueItem, RetryPolicy};
use crate::scheduler::BackgroundTask;
use crate::telemetry::metrics;
use crate::telemetry::task::{record_item, record_outcome, start_task_span};

/// Identity the upload task is registered under.
pub const UPLOAD_TASK_NAME: &str = "deferq-upload-task";

/// What a run reports back to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The queue was empty.
    NoData,
    /// The head item was delivered and removed.
    NewData,
    /// The head item failed, or the run hit an error before finishing.
    Failed,
}

impl TaskOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskOutcome::NoData => "no_data",
            TaskOutcome::NewData => "new_data",
            TaskOutcome::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Drains the head of the queue, one item per invocation.
///
/// Runs never overlap: the host scheduler is expected not to start a run
/// while one is in flight, and a run lock enforces it within the process.
pub struct TaskExecutor {
    queue: UploadQueue,
    client: Arc<dyn DeliveryClient>,
    policy: RetryPolicy,
    running: Mutex<()>,
}

impl TaskExecutor {
    pub fn new(queue: UploadQueue, client: Arc<dyn DeliveryClient>) -> Self {
        Self {
            queue,
            client,
            policy: RetryPolicy::unbounded(),
            running: Mutex::new(()),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run one invocation. Never fails: every error becomes `Failed`, and
    /// nothing is written to the queue on the failure path.
    pub async fn run_once(&self) -> TaskOutcome {
        let _running = self.running.lock().await;
        let span = start_task_span(UPLOAD_TASK_NAME);

        let outcome = match self.tick(&span).instrument(span.clone()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(parent: &span, "upload task aborted: {e}");
                TaskOutcome::Failed
            }
        };

        record_outcome(&span, outcome);
        metrics::task_runs().add(
            1,
            &[
                KeyValue::new("task", UPLOAD_TASK_NAME),
                KeyValue::new("outcome", outcome.as_str()),
            ],
        );
        outcome
    }

    async fn tick(&self, span: &Span) -> Result<TaskOutcome> {
        let queue = self.queue.snapshot().await?;

        let Some(head) = queue.head().cloned() else {
            debug!("queue empty");
            if let Err(e) = self.queue.clear_if_empty().await {
                warn!("could not clear empty queue record: {e}");
            }
            return Ok(TaskOutcome::NoData);
        };

        record_item(span, head.id.as_str());
        info!(id = %head.id, pending = queue.len(), "processing head of queue");

        match self.attempt(&head).await {
            Ok(delivery) => {
                // Success only counts once the removal is persisted.
                if !self.queue.complete(&head.id).await? {
                    warn!(id = %head.id, "delivered item was already gone from the queue");
                }
                info!(id = %head.id, label = delivery.label_or_dash(), "item delivered and removed");
                Ok(TaskOutcome::NewData)
            }
            Err(e) => {
                let reason = e.to_string();
                let attempts = self.queue.record_failure(&head.id).await?;
                warn!(id = %head.id, attempts, error = %reason, "delivery failed, item stays at head");

                if self.policy.is_exhausted(attempts) {
                    self.queue.dead_letter(&head, attempts, &reason).await?;
                    metrics::dead_lettered().add(1, &[]);
                    warn!(id = %head.id, attempts, "retry budget exhausted, item dead-lettered");
                }
                Ok(TaskOutcome::Failed)
            }
        }
    }

    /// Deliver on a separate task so a panicking client surfaces as an error.
    async fn attempt(&self, item: &QueueItem) -> std::result::Result<Delivery, DeliveryError> {
        let client = Arc::clone(&self.client);
        let uri = item.uri.clone();
        tokio::spawn(async move { client.deliver(&uri).await }.instrument(Span::current()))
            .await
            .map_err(|e| DeliveryError::Panicked(e.to_string()))?
    }
}

#[async_trait]
impl BackgroundTask for TaskExecutor {
    async fn run(&self) -> TaskOutcome {
        self.run_once().await
    }
}
