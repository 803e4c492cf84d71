//! # illust-pool
//!
//! Rotation pool of illustration sources for daily posting.
//!
//! Records (a work id plus when it was last posted) live in Postgres
//! ([`db::Db`]) or in memory ([`storage::MemoryStore`]). Each rotation round
//! picks one record uniformly at random among those never posted or posted
//! before a caller-supplied expiry, and marks it posted now ([`rotation`]).

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod rotation;
pub mod storage;
pub mod telemetry;
