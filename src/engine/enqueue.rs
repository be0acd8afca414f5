//! Producer-side entry point.

use opentelemetry::KeyValue;
use tracing::{error, info};

use super::UploadQueue;
use crate::error::{Error, Result};
use crate::model::{ItemId, QueueItem};
use crate::telemetry::metrics;

impl UploadQueue {
    /// Append a capture for background delivery.
    ///
    /// On `Ok` the item is durably recorded and will be considered by the
    /// next executor run, after everything already queued. A blank `uri` is
    /// rejected without touching the queue; a storage failure is returned
    /// as-is, meaning the image is not scheduled.
    pub async fn enqueue(&self, uri: &str) -> Result<QueueItem> {
        if uri.trim().is_empty() {
            metrics::items_enqueued().add(1, &[KeyValue::new("result", "rejected")]);
            return Err(Error::InvalidUri("image reference is empty".to_string()));
        }

        let _lease = self.lease.lock().await;
        let result = async {
            let mut queue = self.store.read().await?;
            let mut item = QueueItem::new(uri);
            while queue.contains(&item.id) {
                item.id = ItemId::new();
            }
            queue.push(item.clone());
            self.store.write(&queue).await?;
            Ok::<_, Error>((item, queue.len()))
        }
        .await;

        match result {
            Ok((item, total)) => {
                metrics::items_enqueued().add(1, &[KeyValue::new("result", "ok")]);
                info!(id = %item.id, total, "item enqueued");
                Ok(item)
            }
            Err(e) => {
                metrics::items_enqueued().add(1, &[KeyValue::new("result", "error")]);
                error!(uri, "could not schedule upload: {e}");
                Err(e)
            }
        }
    }
}
