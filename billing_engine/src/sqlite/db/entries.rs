use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db_types::{AccountingEntry, EntrySourceKind},
    traits::{InsertEntryResult, StoreError},
};

/// Idempotent ledger insert. The `(source_id, entry_type)` unique key makes a replayed settlement
/// a no-op; the caller counts the actually-inserted rows.
pub async fn insert_entry(entry: &AccountingEntry, conn: &mut SqliteConnection) -> Result<InsertEntryResult, StoreError> {
    let result = sqlx::query(
        r#"
            INSERT INTO accounting_entries (
                id,
                entry_type,
                source_id,
                source_kind,
                merchant_id,
                amount,
                currency,
                original_amount,
                original_currency,
                local_amount,
                local_currency,
                country,
                status,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (source_id, entry_type) DO NOTHING
        "#,
    )
    .bind(&entry.id)
    .bind(entry.entry_type)
    .bind(&entry.source_id)
    .bind(entry.source_kind)
    .bind(&entry.merchant_id)
    .bind(entry.amount)
    .bind(&entry.currency)
    .bind(entry.original_amount)
    .bind(&entry.original_currency)
    .bind(entry.local_amount)
    .bind(&entry.local_currency)
    .bind(&entry.country)
    .bind(&entry.status)
    .bind(entry.created_at)
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        trace!("🗃️ Ledger row ({}, {:?}) already present", entry.source_id, entry.entry_type);
        return Ok(InsertEntryResult::AlreadyExists);
    }
    Ok(InsertEntryResult::Inserted)
}

/// Every ledger row of a settlement source, in waterfall (insertion) order.
pub async fn fetch_entries_for_source(
    source_id: &str,
    kind: EntrySourceKind,
    conn: &mut SqliteConnection,
) -> Result<Vec<AccountingEntry>, StoreError> {
    let entries = sqlx::query_as(
        "SELECT * FROM accounting_entries WHERE source_id = $1 AND source_kind = $2 ORDER BY rowid",
    )
    .bind(source_id)
    .bind(kind)
    .fetch_all(conn)
    .await?;
    Ok(entries)
}
