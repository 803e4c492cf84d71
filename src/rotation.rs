//! Rotation selector: pick one eligible record uniformly at random and mark
//! it posted.
//!
//! The algorithm is written once against [`EligiblePool`], a view of the
//! record store scoped to a single selection. Each backend opens that scope
//! (a Postgres transaction, an in-memory mutex guard), runs
//! [`select_and_mark_one`] inside it, and closes it.

use crate::error::Result;
use crate::model::{Record, WorkId};
use crate::telemetry::metrics;
use crate::telemetry::rotation::{record_outcome, start_selection_span};
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use rand::Rng;
use tracing::{debug, warn};

/// The store operations one selection needs, all against the same snapshot
/// scope. `count_eligible` and `fetch_eligible_at_offset` must apply the same
/// predicate and the same ordering.
#[allow(async_fn_in_trait)]
pub trait EligiblePool {
    /// Number of records selectable at `expiry`.
    async fn count_eligible(&mut self, expiry: DateTime<Utc>) -> Result<i64>;

    /// The `offset`-th eligible record in `work_id` order, if any.
    async fn fetch_eligible_at_offset(
        &mut self,
        expiry: DateTime<Utc>,
        offset: i64,
    ) -> Result<Option<Record>>;

    /// Mark a record as posted at `now`. Returns `false` if it no longer exists.
    async fn mark_posted(&mut self, id: WorkId, now: DateTime<Utc>) -> Result<bool>;
}

/// What a selection round did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// This record was chosen and marked. Holds the pre-update snapshot.
    Selected(Record),
    /// No record was eligible. Nothing was written.
    Empty,
    /// The count saw eligible records but the fetch or mark lost them to a
    /// concurrent writer. Nothing was written; try again next cycle.
    Raced,
}

impl Selection {
    pub fn into_record(self) -> Option<Record> {
        match self {
            Selection::Selected(record) => Some(record),
            Selection::Empty | Selection::Raced => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Selection::Selected(_) => "selected",
            Selection::Empty => "empty",
            Selection::Raced => "raced",
        }
    }
}

/// Draw an offset uniformly from `[0, count)`. `count` must be at least 1.
///
/// A single-element pool short-circuits to 0 without touching the RNG.
pub fn pick_offset<R: Rng + ?Sized>(count: i64, rng: &mut R) -> i64 {
    debug_assert!(count >= 1, "pick_offset called on an empty pool");
    if count <= 1 {
        0
    } else {
        rng.gen_range(0..count)
    }
}

/// Count, draw, fetch and mark one eligible record within `pool`.
///
/// The caller owns the transactional scope: committing on `Ok`, rolling back
/// on `Err`. Empty pools and lost races are `Ok`, not errors.
pub async fn select_and_mark_one<P, R>(
    pool: &mut P,
    expiry: DateTime<Utc>,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<Selection>
where
    P: EligiblePool + ?Sized,
    R: Rng + ?Sized,
{
    let span = start_selection_span(expiry);
    let started = std::time::Instant::now();

    let selection = select_inner(pool, expiry, now, rng).await?;

    record_outcome(&span, &selection);
    metrics::rotation_selections().add(1, &[KeyValue::new("result", selection.label())]);
    metrics::operation_duration_ms().record(
        started.elapsed().as_secs_f64() * 1000.0,
        &[KeyValue::new("operation", "rotation.select")],
    );

    Ok(selection)
}

async fn select_inner<P, R>(
    pool: &mut P,
    expiry: DateTime<Utc>,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<Selection>
where
    P: EligiblePool + ?Sized,
    R: Rng + ?Sized,
{
    let count = pool.count_eligible(expiry).await?;
    if count < 1 {
        debug!(%expiry, "no eligible records");
        return Ok(Selection::Empty);
    }

    let offset = pick_offset(count, rng);
    let Some(record) = pool.fetch_eligible_at_offset(expiry, offset).await? else {
        warn!(count, offset, "eligible record vanished between count and fetch");
        return Ok(Selection::Raced);
    };

    if !pool.mark_posted(record.work_id, now).await? {
        warn!(work_id = %record.work_id, "selected record vanished before it could be marked");
        return Ok(Selection::Raced);
    }

    debug!(work_id = %record.work_id, count, offset, "record selected");
    Ok(Selection::Selected(record))
}
