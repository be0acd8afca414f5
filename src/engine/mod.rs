//! Queue engine: the enqueue API and the background task executor.

mod enqueue;
pub mod executor;
pub mod queue;

pub use executor::{TaskExecutor, TaskOutcome, UPLOAD_TASK_NAME};
pub use queue::UploadQueue;
