//! Metric instrument factories for deferq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"deferq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for deferq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("deferq")
}

/// Counter: enqueue calls.
/// Labels: `result` ("ok" | "rejected" | "error").
pub fn items_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("deferq.queue.enqueued")
        .with_description("Number of enqueue calls")
        .build()
}

/// Counter: task executor invocations.
/// Labels: `task`, `outcome` ("no_data" | "new_data" | "failed").
pub fn task_runs() -> Counter<u64> {
    meter()
        .u64_counter("deferq.task.runs")
        .with_description("Number of background task invocations")
        .build()
}

/// Counter: delivery attempts.
/// Labels: `result` ("ok" | "error").
pub fn delivery_attempts() -> Counter<u64> {
    meter()
        .u64_counter("deferq.delivery.attempts")
        .with_description("Number of delivery attempts")
        .build()
}

/// Histogram: delivery duration in milliseconds (preprocessing + round trip).
pub fn delivery_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("deferq.delivery.duration_ms")
        .with_description("Delivery attempt duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: persisted records that failed to parse and were quarantined.
/// Labels: `key`.
pub fn corrupt_records() -> Counter<u64> {
    meter()
        .u64_counter("deferq.store.corrupt_records")
        .with_description("Persisted records quarantined as corrupt")
        .build()
}

/// Counter: items moved to the dead-letter list.
pub fn dead_lettered() -> Counter<u64> {
    meter()
        .u64_counter("deferq.queue.dead_lettered")
        .with_description("Items that exhausted their retry budget")
        .build()
}
