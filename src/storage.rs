//! In-process record store.
//!
//! Same operations and eligibility rules as the Postgres store, held in an
//! ordered map behind an async mutex. A rotation round holds the lock for
//! its whole count → fetch → mark sequence, so rounds never interleave.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{Error, Result};
use crate::model::{Record, WorkId};
use crate::rotation::{self, EligiblePool, Selection};
use crate::telemetry::metrics;

/// Storage backend. Owns the record table.
#[derive(Default)]
pub struct MemoryStore {
    table: Mutex<Table>,
}

/// `work_id` → `last_posted`, iterated in `work_id` order.
#[derive(Default)]
struct Table(BTreeMap<WorkId, Option<DateTime<Utc>>>);

impl Table {
    fn records(&self) -> impl Iterator<Item = Record> + '_ {
        self.0.iter().map(|(&work_id, &last_posted)| Record {
            work_id,
            last_posted,
        })
    }

    fn eligible(&self, expiry: DateTime<Utc>) -> impl Iterator<Item = Record> + '_ {
        self.records().filter(move |r| r.is_eligible(expiry))
    }
}

impl EligiblePool for Table {
    async fn count_eligible(&mut self, expiry: DateTime<Utc>) -> Result<i64> {
        Ok(self.eligible(expiry).count() as i64)
    }

    async fn fetch_eligible_at_offset(
        &mut self,
        expiry: DateTime<Utc>,
        offset: i64,
    ) -> Result<Option<Record>> {
        let Ok(offset) = usize::try_from(offset) else {
            return Ok(None);
        };
        Ok(self.eligible(expiry).nth(offset))
    }

    async fn mark_posted(&mut self, id: WorkId, now: DateTime<Utc>) -> Result<bool> {
        match self.0.get_mut(&id) {
            Some(last_posted) => {
                *last_posted = Some(last_posted.map_or(now, |at| at.max(now)));
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records, eligible or not.
    pub async fn count_records(&self) -> Result<i64> {
        Ok(self.table.lock().await.0.len() as i64)
    }

    /// Number of records selectable at `expiry`.
    pub async fn count_eligible(&self, expiry: DateTime<Utc>) -> Result<i64> {
        self.table.lock().await.count_eligible(expiry).await
    }

    /// The `offset`-th eligible record in `work_id` order.
    pub async fn fetch_eligible_at_offset(
        &self,
        expiry: DateTime<Utc>,
        offset: i64,
    ) -> Result<Option<Record>> {
        self.table
            .lock()
            .await
            .fetch_eligible_at_offset(expiry, offset)
            .await
    }

    pub async fn get_record(&self, id: WorkId) -> Result<Option<Record>> {
        let table = self.table.lock().await;
        Ok(table.0.get(&id).map(|&last_posted| Record {
            work_id: id,
            last_posted,
        }))
    }

    /// Set `last_posted = now` unconditionally (last write wins).
    pub async fn touch_record(&self, id: WorkId, now: DateTime<Utc>) -> Result<()> {
        let mut table = self.table.lock().await;
        match table.0.get_mut(&id) {
            Some(last_posted) => {
                *last_posted = Some(now);
                Ok(())
            }
            None => Err(Error::NotFound(format!("record {id}"))),
        }
    }

    /// Insert or overwrite records by `work_id`. Later duplicates win.
    /// Returns the number of distinct records written.
    pub async fn upsert_records(&self, records: &[Record]) -> Result<u64> {
        let mut table = self.table.lock().await;
        let mut written = BTreeSet::new();
        for record in records {
            table.0.insert(record.work_id, record.last_posted);
            written.insert(record.work_id);
        }
        let written = written.len() as u64;

        metrics::records_upserted().add(written, &[]);
        info!(written, "records upserted");
        Ok(written)
    }

    /// Every record in `work_id` order.
    pub async fn snapshot(&self) -> Vec<Record> {
        self.table.lock().await.records().collect()
    }

    /// Pick one eligible record at random and mark it posted now.
    pub async fn select_and_mark_one(&self, expiry: DateTime<Utc>) -> Result<Option<Record>> {
        let mut rng = StdRng::from_entropy();
        let selection = self
            .select_and_mark_one_at(expiry, Utc::now(), &mut rng)
            .await?;
        Ok(selection.into_record())
    }

    /// One rotation round with an explicit clock and RNG, under one lock.
    pub async fn select_and_mark_one_at<R: Rng + ?Sized>(
        &self,
        expiry: DateTime<Utc>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Selection> {
        let mut table = self.table.lock().await;
        rotation::select_and_mark_one(&mut *table, expiry, now, rng).await
    }
}
