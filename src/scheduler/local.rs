//! In-process host scheduler for daemon deployments.
//!
//! Each registration gets a tokio task that sleeps the minimum interval,
//! runs the task, and repeats. Consecutive `Failed` outcomes stretch the
//! wait (doubling, capped at 8x); any other outcome resets it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BackgroundScheduler, BackgroundTask, RegistrationOptions};
use crate::db::Db;
use crate::engine::TaskOutcome;
use crate::error::{Error, Result};
use crate::model::record;

/// Storage key for registrations that survive restarts.
pub const REGISTRATIONS_KEY: &str = "scheduler.registrations";

/// Upper bound on the failure backoff, as a power of two.
const MAX_BACKOFF_SHIFT: u32 = 3;

#[derive(Clone)]
struct Slot {
    task: Arc<dyn BackgroundTask>,
    options: RegistrationOptions,
}

struct Entry {
    slot: watch::Sender<Slot>,
    handle: JoinHandle<()>,
}

struct Inner {
    db: Option<Arc<Db>>,
    entries: Mutex<HashMap<String, Entry>>,
}

#[derive(Clone)]
pub struct LocalScheduler {
    inner: Arc<Inner>,
}

impl Default for LocalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalScheduler {
    /// Scheduler with no persistence: every registration ends with the process.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                db: None,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Scheduler that records `persist_across_restart` registrations in `db`.
    pub fn with_store(db: Arc<Db>) -> Self {
        Self {
            inner: Arc::new(Inner {
                db: Some(db),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Re-register persisted tasks after a restart.
    ///
    /// Only identities present in `tasks` are restored; those flagged
    /// `run_after_boot` run immediately. Returns how many were restored.
    pub async fn restore(&self, tasks: &[(&str, Arc<dyn BackgroundTask>)]) -> Result<usize> {
        let stored = self.load_persisted().await?;
        let mut restored = 0;

        for (identity, options) in stored {
            let Some((_, task)) = tasks.iter().find(|(name, _)| *name == identity) else {
                debug!(identity = %identity, "no task supplied for persisted registration");
                continue;
            };
            self.install(&identity, Arc::clone(task), options, options.run_after_boot)
                .await;
            restored += 1;
        }

        info!(restored, "persisted registrations restored");
        Ok(restored)
    }

    /// Run a registered task right now, outside its schedule.
    pub async fn trigger(&self, identity: &str) -> Result<TaskOutcome> {
        let task = {
            let entries = self.inner.entries.lock().await;
            let entry = entries
                .get(identity)
                .ok_or_else(|| Error::NotFound(format!("task {identity}")))?;
            let task = Arc::clone(&entry.slot.borrow().task);
            task
        };
        info!(identity, "manual trigger");
        Ok(task.run().await)
    }

    /// Current registrations, sorted by identity.
    pub async fn registrations(&self) -> Vec<(String, RegistrationOptions)> {
        let entries = self.inner.entries.lock().await;
        let mut list: Vec<_> = entries
            .iter()
            .map(|(identity, entry)| (identity.clone(), entry.slot.borrow().options))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    /// Stop every timer. Runs already in progress finish on their own.
    pub async fn shutdown(&self) {
        let mut entries = self.inner.entries.lock().await;
        let count = entries.len();
        entries.clear();
        info!(count, "scheduler stopped");
    }

    async fn install(
        &self,
        identity: &str,
        task: Arc<dyn BackgroundTask>,
        options: RegistrationOptions,
        run_now: bool,
    ) {
        let slot = Slot { task, options };
        let mut entries = self.inner.entries.lock().await;

        if let Some(entry) = entries.get(identity) {
            if !entry.handle.is_finished() {
                // Same options: swap the task, keep the running countdown.
                let retimed = entry.slot.send_if_modified(|current| {
                    let changed = current.options != slot.options;
                    *current = slot;
                    changed
                });
                info!(
                    identity,
                    interval_secs = options.minimum_interval_secs,
                    retimed,
                    "registration updated"
                );
                return;
            }
        }

        let (tx, rx) = watch::channel(slot);
        let handle = tokio::spawn(drive(identity.to_string(), rx, run_now));
        entries.insert(identity.to_string(), Entry { slot: tx, handle });
        info!(
            identity,
            interval_secs = options.minimum_interval_secs,
            run_now,
            "task registered"
        );
    }

    async fn load_persisted(&self) -> Result<BTreeMap<String, RegistrationOptions>> {
        let Some(ref db) = self.inner.db else {
            return Ok(BTreeMap::new());
        };
        let Some(raw) = db.get_record(REGISTRATIONS_KEY).await? else {
            return Ok(BTreeMap::new());
        };
        match record::decode(&raw) {
            Ok(stored) => Ok(stored),
            Err(reason) => {
                warn!(%reason, "ignoring unreadable scheduler registrations");
                Ok(BTreeMap::new())
            }
        }
    }

    async fn persist(&self, identity: &str, options: Option<RegistrationOptions>) -> Result<()> {
        let Some(ref db) = self.inner.db else {
            return Ok(());
        };
        let mut stored = self.load_persisted().await?;
        let changed = match options {
            Some(options) if options.persist_across_restart => {
                stored.insert(identity.to_string(), options) != Some(options)
            }
            _ => stored.remove(identity).is_some(),
        };
        if !changed {
            return Ok(());
        }
        if stored.is_empty() {
            db.delete_record(REGISTRATIONS_KEY).await?;
        } else {
            db.put_record(REGISTRATIONS_KEY, &record::encode(&stored)?)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BackgroundScheduler for LocalScheduler {
    async fn register(
        &self,
        identity: &str,
        task: Arc<dyn BackgroundTask>,
        options: RegistrationOptions,
    ) -> Result<()> {
        if identity.trim().is_empty() {
            return Err(Error::Registration("task identity is empty".to_string()));
        }
        if options.minimum_interval_secs == 0 {
            return Err(Error::Registration(format!(
                "{identity}: minimum interval must be at least one second"
            )));
        }

        self.persist(identity, Some(options))
            .await
            .map_err(|e| Error::Registration(format!("{identity}: {e}")))?;
        self.install(identity, task, options, false).await;
        Ok(())
    }

    async fn unregister(&self, identity: &str) -> Result<bool> {
        self.persist(identity, None).await?;
        let removed = self.inner.entries.lock().await.remove(identity).is_some();
        if removed {
            info!(identity, "task unregistered");
        }
        Ok(removed)
    }

    async fn is_registered(&self, identity: &str) -> bool {
        self.inner.entries.lock().await.contains_key(identity)
    }
}

/// Wait before the next run, given how many runs in a row have failed.
pub fn next_delay(interval: Duration, consecutive_failures: u32) -> Duration {
    interval.saturating_mul(1 << consecutive_failures.min(MAX_BACKOFF_SHIFT))
}

/// Timer loop for one registration. Ends when the registration's sender is
/// dropped (unregister or shutdown).
async fn drive(identity: String, mut slot: watch::Receiver<Slot>, mut run_now: bool) {
    let mut failures = 0u32;

    loop {
        if !run_now {
            let delay = next_delay(slot.borrow().options.minimum_interval(), failures);
            tokio::select! {
                changed = slot.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // Options changed: restart the clock.
                    failures = 0;
                    continue;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        run_now = false;

        let task = Arc::clone(&slot.borrow_and_update().task);
        let outcome = task.run().await;
        failures = match outcome {
            TaskOutcome::Failed => failures.saturating_add(1),
            TaskOutcome::NoData | TaskOutcome::NewData => 0,
        };
        debug!(identity = %identity, %outcome, failures, "scheduled run finished");
    }

    debug!(identity = %identity, "timer stopped");
}
