//! Metric instrument factories for illust-pool.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"illust-pool"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for illust-pool instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("illust-pool")
}

/// Counter: rotation rounds.
/// Labels: `result` ("selected" | "empty" | "raced").
pub fn rotation_selections() -> Counter<u64> {
    meter()
        .u64_counter("illust.rotation.selections")
        .with_description("Number of rotation selection rounds")
        .build()
}

/// Counter: records written by ingestion upserts.
pub fn records_upserted() -> Counter<u64> {
    meter()
        .u64_counter("illust.records.upserted")
        .with_description("Number of records inserted or overwritten")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("illust.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
