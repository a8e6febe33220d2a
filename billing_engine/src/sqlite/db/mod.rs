//! # SQLite database methods
//!
//! "Low-level" SQLite interactions, kept as simple functions (rather than stateful structs) that
//! accept a `&mut SqliteConnection`. Callers obtain a connection from a pool, or open a
//! transaction and pass `&mut *tx` when several writes must land atomically.
//!
//! Orders and refunds are stored as their canonical JSON body next to the handful of scalar
//! columns the queries filter on; the version column drives the compare-and-set update discipline.
//! Accounting entries are flat and get real columns, with the `(source_id, entry_type)` unique key
//! backing the idempotent ledger insert.
use sqlx::{sqlite::SqlitePoolOptions, Error as SqlxError, SqlitePool};

pub mod entries;
pub mod orders;
pub mod refunds;

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect(url).await?;
    Ok(pool)
}
