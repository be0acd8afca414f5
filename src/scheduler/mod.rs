//! Background scheduling seam.
//!
//! The host decides when work runs. Tasks are registered explicitly at
//! process start under a stable identity; registering the same identity
//! again updates it in place.

pub mod local;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::TaskOutcome;
use crate::error::Result;

pub use local::LocalScheduler;

/// A unit of work the scheduler can invoke.
#[async_trait]
pub trait BackgroundTask: Send + Sync {
    async fn run(&self) -> TaskOutcome;
}

/// Parameters requested from the host scheduler.
///
/// These are requests: the host may run the task less often than
/// `minimum_interval_secs`, never more often, and may skip runs entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationOptions {
    pub minimum_interval_secs: u64,
    /// Keep the registration when the process exits.
    pub persist_across_restart: bool,
    /// Run as soon as the host comes back up, without waiting an interval.
    pub run_after_boot: bool,
}

impl RegistrationOptions {
    /// Every `secs` seconds, surviving restarts and running after boot.
    pub fn every(secs: u64) -> Self {
        Self {
            minimum_interval_secs: secs,
            persist_across_restart: true,
            run_after_boot: true,
        }
    }

    pub fn persist_across_restart(mut self, persist: bool) -> Self {
        self.persist_across_restart = persist;
        self
    }

    pub fn run_after_boot(mut self, run: bool) -> Self {
        self.run_after_boot = run;
        self
    }

    pub fn minimum_interval(&self) -> Duration {
        Duration::from_secs(self.minimum_interval_secs)
    }
}

#[async_trait]
pub trait BackgroundScheduler: Send + Sync {
    /// Register `task` under `identity`, or update an existing registration.
    ///
    /// A failure leaves any previous registration and all queued data as
    /// they were; the task can still be invoked directly.
    async fn register(
        &self,
        identity: &str,
        task: Arc<dyn BackgroundTask>,
        options: RegistrationOptions,
    ) -> Result<()>;

    /// Remove a registration. Returns false if there was none.
    async fn unregister(&self, identity: &str) -> Result<bool>;

    async fn is_registered(&self, identity: &str) -> bool;
}
