//! Record store over Postgres: counts, offset fetch, touch, ingestion upsert,
//! and the transactional rotation round.

use crate::error::{Error, Result};
use crate::model::{Record, WorkId};
use crate::rotation::{self, EligiblePool, Selection};
use crate::telemetry::metrics;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sqlx::{PgConnection, PgExecutor, Postgres, QueryBuilder};
use std::collections::BTreeMap;
use tracing::info;

/// The one eligibility predicate. Count and offset fetch both splice this
/// literal so they can never disagree on which rows qualify. `$1` is the
/// expiry threshold. Mirrors `Record::is_eligible`.
macro_rules! eligible_where {
    () => {
        "work_id <> 0 AND (last_posted IS NULL OR last_posted < $1)"
    };
}

const COUNT_ELIGIBLE: &str = concat!(
    "SELECT COUNT(*) FROM daily_illust_source WHERE ",
    eligible_where!()
);

const FETCH_ELIGIBLE_AT_OFFSET: &str = concat!(
    "SELECT work_id, last_posted FROM daily_illust_source WHERE ",
    eligible_where!(),
    " ORDER BY work_id OFFSET $2 LIMIT 1"
);

// Row lock taken during a rotation round. A second selector blocks on the
// same row, re-checks the predicate once the first commits, and skips it.
const LOCK_ELIGIBLE_AT_OFFSET: &str = concat!(
    "SELECT work_id, last_posted FROM daily_illust_source WHERE ",
    eligible_where!(),
    " ORDER BY work_id OFFSET $2 LIMIT 1 FOR UPDATE"
);

/// Postgres bind limit is 65535; two binds per row.
const UPSERT_CHUNK: usize = 1000;

impl super::Db {
    /// Total number of records, eligible or not.
    pub async fn count_records(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM daily_illust_source")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Number of records selectable at `expiry`.
    pub async fn count_eligible(&self, expiry: DateTime<Utc>) -> Result<i64> {
        count_eligible_on(&self.pool, expiry).await
    }

    /// The `offset`-th eligible record in `work_id` order.
    pub async fn fetch_eligible_at_offset(
        &self,
        expiry: DateTime<Utc>,
        offset: i64,
    ) -> Result<Option<Record>> {
        fetch_eligible_on(&self.pool, FETCH_ELIGIBLE_AT_OFFSET, expiry, offset).await
    }

    /// Look up one record.
    pub async fn get_record(&self, id: WorkId) -> Result<Option<Record>> {
        let row: Option<RecordRow> = sqlx::query_as(
            "SELECT work_id, last_posted FROM daily_illust_source WHERE work_id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Record::from))
    }

    /// Set `last_posted = now` unconditionally (last write wins).
    pub async fn touch_record(&self, id: WorkId, now: DateTime<Utc>) -> Result<()> {
        let rows_affected =
            sqlx::query("UPDATE daily_illust_source SET last_posted = $2 WHERE work_id = $1")
                .bind(id.0)
                .bind(now)
                .execute(&self.pool)
                .await?
                .rows_affected();

        if rows_affected == 0 {
            return Err(Error::NotFound(format!("record {id}")));
        }
        Ok(())
    }

    /// Insert or overwrite records by `work_id` in one transaction.
    ///
    /// Later duplicates in `records` win. Returns the number of rows written.
    pub async fn upsert_records(&self, records: &[Record]) -> Result<u64> {
        let merged: BTreeMap<WorkId, Option<DateTime<Utc>>> = records
            .iter()
            .map(|r| (r.work_id, r.last_posted))
            .collect();
        if merged.is_empty() {
            return Ok(0);
        }
        let rows: Vec<(WorkId, Option<DateTime<Utc>>)> = merged.into_iter().collect();

        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for chunk in rows.chunks(UPSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO daily_illust_source (work_id, last_posted) ");
            builder.push_values(chunk, |mut row, &(id, last_posted)| {
                row.push_bind(id.0).push_bind(last_posted);
            });
            builder.push(" ON CONFLICT (work_id) DO UPDATE SET last_posted = EXCLUDED.last_posted");
            written += builder.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        metrics::records_upserted().add(written, &[]);
        info!(written, "records upserted");
        Ok(written)
    }

    /// Pick one eligible record at random and mark it posted now.
    ///
    /// Returns `None` when nothing is eligible or a concurrent writer won the
    /// race for the chosen row.
    pub async fn select_and_mark_one(&self, expiry: DateTime<Utc>) -> Result<Option<Record>> {
        let mut rng = StdRng::from_entropy();
        let selection = self
            .select_and_mark_one_at(expiry, Utc::now(), &mut rng)
            .await?;
        Ok(selection.into_record())
    }

    /// One rotation round with an explicit clock and RNG, inside its own
    /// transaction.
    pub async fn select_and_mark_one_at<R: Rng + ?Sized>(
        &self,
        expiry: DateTime<Utc>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Selection> {
        let mut tx = self.pool.begin().await?;
        let selection = rotation::select_and_mark_one(&mut *tx, expiry, now, rng).await?;
        tx.commit().await?;

        if let Selection::Selected(ref record) = selection {
            info!(work_id = %record.work_id, "record marked posted");
        }
        Ok(selection)
    }
}

/// A connection (normally a transaction) is a selection scope.
impl EligiblePool for PgConnection {
    async fn count_eligible(&mut self, expiry: DateTime<Utc>) -> Result<i64> {
        count_eligible_on(&mut *self, expiry).await
    }

    async fn fetch_eligible_at_offset(
        &mut self,
        expiry: DateTime<Utc>,
        offset: i64,
    ) -> Result<Option<Record>> {
        fetch_eligible_on(&mut *self, LOCK_ELIGIBLE_AT_OFFSET, expiry, offset).await
    }

    async fn mark_posted(&mut self, id: WorkId, now: DateTime<Utc>) -> Result<bool> {
        // GREATEST skips NULL, and never moves an existing timestamp backwards.
        let rows_affected = sqlx::query(
            "UPDATE daily_illust_source SET last_posted = GREATEST(last_posted, $2) WHERE work_id = $1",
        )
        .bind(id.0)
        .bind(now)
        .execute(&mut *self)
        .await?
        .rows_affected();
        Ok(rows_affected > 0)
    }
}

async fn count_eligible_on<'e>(
    executor: impl PgExecutor<'e>,
    expiry: DateTime<Utc>,
) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(COUNT_ELIGIBLE)
        .bind(expiry)
        .fetch_one(executor)
        .await?;
    Ok(row.0)
}

async fn fetch_eligible_on<'e>(
    executor: impl PgExecutor<'e>,
    sql: &'static str,
    expiry: DateTime<Utc>,
    offset: i64,
) -> Result<Option<Record>> {
    if offset < 0 {
        return Ok(None);
    }
    let row: Option<RecordRow> = sqlx::query_as(sql)
        .bind(expiry)
        .bind(offset)
        .fetch_optional(executor)
        .await?;
    Ok(row.map(Record::from))
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct RecordRow {
    work_id: i64,
    last_posted: Option<DateTime<Utc>>,
}

impl From<RecordRow> for Record {
    fn from(row: RecordRow) -> Self {
        Self {
            work_id: WorkId(row.work_id),
            last_posted: row.last_posted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn where_clause(sql: &str) -> &str {
        let start = sql.find(" WHERE ").expect("query has a WHERE clause");
        let rest = &sql[start..];
        match rest.find(" ORDER BY ") {
            Some(end) => &rest[..end],
            None => rest,
        }
    }

    #[test]
    fn count_and_fetch_share_one_predicate() {
        let count = where_clause(COUNT_ELIGIBLE);
        assert_eq!(count, where_clause(FETCH_ELIGIBLE_AT_OFFSET));
        assert_eq!(count, where_clause(LOCK_ELIGIBLE_AT_OFFSET));
        assert!(count.contains("work_id <> 0"));
    }

    #[test]
    fn offset_fetch_is_ordered_by_work_id() {
        assert!(FETCH_ELIGIBLE_AT_OFFSET.ends_with("ORDER BY work_id OFFSET $2 LIMIT 1"));
        assert!(LOCK_ELIGIBLE_AT_OFFSET.ends_with("FOR UPDATE"));
    }
}
