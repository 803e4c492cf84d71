//! Core data model.
//!
//! A record is one illustration source in the rotation pool: a work identifier
//! plus the instant it was last posted (`None` = never posted).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Work ID
// ---------------------------------------------------------------------------

/// Newtype for work identifiers. Immutable once a record exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkId(pub i64);

impl WorkId {
    /// Reserved placeholder id. Never selected, whatever its timestamp.
    pub const SENTINEL: WorkId = WorkId(0);

    pub fn is_sentinel(self) -> bool {
        self == Self::SENTINEL
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for WorkId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::str::FromStr for WorkId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(WorkId)
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// An illustration source tracked by the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub work_id: WorkId,

    /// When this record was last selected for posting. `None` = never.
    #[serde(default)]
    pub last_posted: Option<DateTime<Utc>>,
}

impl Record {
    pub fn never_posted(work_id: i64) -> Self {
        Self {
            work_id: WorkId(work_id),
            last_posted: None,
        }
    }

    pub fn posted_at(work_id: i64, at: DateTime<Utc>) -> Self {
        Self {
            work_id: WorkId(work_id),
            last_posted: Some(at),
        }
    }

    /// The eligibility predicate for in-process stores.
    ///
    /// Must stay in lockstep with `eligible_where!` in `db::record`: sentinel
    /// excluded, never-posted eligible, otherwise strictly before `expiry`.
    pub fn is_eligible(&self, expiry: DateTime<Utc>) -> bool {
        !self.work_id.is_sentinel() && self.last_posted.is_none_or(|at| at < expiry)
    }
}

/// Expiry threshold for a cooldown: anything posted before `now - cooldown`
/// is selectable again.
pub fn cooldown_expiry(now: DateTime<Utc>, cooldown: Duration) -> DateTime<Utc> {
    now - cooldown
}
