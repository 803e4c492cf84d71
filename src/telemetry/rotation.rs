//! Rotation span helpers.
//!
//! One span per selection round; the outcome fields are declared empty and
//! filled once the round finishes.

use crate::rotation::Selection;
use chrono::{DateTime, Utc};
use tracing::Span;

/// Start a span for one selection round at the given expiry threshold.
pub fn start_selection_span(expiry: DateTime<Utc>) -> Span {
    tracing::info_span!(
        "rotation.select",
        "rotation.expiry" = %expiry,
        "rotation.result" = tracing::field::Empty,
        "rotation.work_id" = tracing::field::Empty,
    )
}

/// Record how the round ended on its span and emit an `info` event in it.
pub fn record_outcome(span: &Span, selection: &Selection) {
    span.record("rotation.result", selection.label());
    if let Selection::Selected(record) = selection {
        span.record("rotation.work_id", record.work_id.0);
    }
    span.in_scope(|| {
        tracing::info!(result = selection.label(), "rotation_round");
    });
}
