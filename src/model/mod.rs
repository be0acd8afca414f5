//! Core data model.
//!
//! A queue item is a capture that still needs delivering. Items live in a
//! FIFO queue; failures are counted on the side and items that exhaust
//! their retry budget become dead letters.

pub mod queue;
pub(crate) mod record;
pub mod retry;

pub use queue::{ItemId, Queue, QueueItem};
pub use record::SCHEMA_VERSION;
pub use retry::{AttemptLog, DeadLetter, RetryPolicy};
