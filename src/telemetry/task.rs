//! Background task span helpers.

use tracing::Span;

use crate::engine::TaskOutcome;

/// Start a span for one task invocation.
///
/// `task.item` and `task.outcome` are declared empty: the item is only
/// known once the queue has been read, the outcome once the run ends.
pub fn start_task_span(task: &str) -> Span {
    tracing::info_span!(
        "task.run",
        "task.name" = task,
        "task.item" = tracing::field::Empty,
        "task.outcome" = tracing::field::Empty,
    )
}

/// Record which queue item this run is working on.
pub fn record_item(span: &Span, item_id: &str) {
    span.record("task.item", item_id);
}

/// Record the outcome reported back to the scheduler.
pub fn record_outcome(span: &Span, outcome: TaskOutcome) {
    span.record("task.outcome", outcome.as_str());
}
