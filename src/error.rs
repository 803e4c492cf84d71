//! Error types for illust-pool.
//!
//! "No eligible record" is not an error: selection returns `Ok(None)` for an
//! empty pool and for a lost race. Only storage and setup failures surface here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
