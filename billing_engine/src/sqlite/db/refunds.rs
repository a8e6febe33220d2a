use bpg_common::Money;
use chrono::Utc;
use log::trace;
use sqlx::SqliteConnection;

use crate::{db_types::Refund, traits::StoreError};

fn decode(id: &str, body: String) -> Result<Refund, StoreError> {
    serde_json::from_str(&body).map_err(|e| StoreError::CorruptRecord(id.to_string(), e.to_string()))
}

pub async fn insert_refund(refund: &Refund, conn: &mut SqliteConnection) -> Result<(), StoreError> {
    let body = serde_json::to_string(refund).map_err(|e| StoreError::DatabaseError(e.to_string()))?;
    sqlx::query(
        r#"
            INSERT INTO refunds (id, order_id, status, version, body, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&refund.id)
    .bind(&refund.order_ref.id)
    .bind(refund.status as i64)
    .bind(refund.version)
    .bind(body)
    .bind(refund.created_at)
    .bind(refund.updated_at)
    .execute(conn)
    .await?;
    trace!("🗃️ Refund [{}] inserted", refund.id);
    Ok(())
}

pub async fn fetch_refund(id: &str, conn: &mut SqliteConnection) -> Result<Option<Refund>, StoreError> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT body FROM refunds WHERE id = $1").bind(id).fetch_optional(conn).await?;
    row.map(|(body,)| decode(id, body)).transpose()
}

/// The refunds of an order, newest first.
pub async fn fetch_refunds_for_order(
    order_id: &str,
    limit: i64,
    offset: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Refund>, StoreError> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT body FROM refunds WHERE order_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3")
            .bind(order_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(conn)
            .await?;
    rows.into_iter().map(|(body,)| decode(order_id, body)).collect()
}

pub async fn count_refunds_for_order(order_id: &str, conn: &mut SqliteConnection) -> Result<i64, StoreError> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM refunds WHERE order_id = $1")
        .bind(order_id)
        .fetch_one(conn)
        .await?;
    Ok(count)
}

/// The amount an order has already given back. Rejected and declined refunds free their amount up
/// again, so the status filter happens on the decoded rows.
pub async fn refunded_amount_for_order(order_id: &str, conn: &mut SqliteConnection) -> Result<Money, StoreError> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT body FROM refunds WHERE order_id = $1")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    let mut total = Money::zero();
    for (body,) in rows {
        let refund = decode(order_id, body)?;
        if refund.status.counts_towards_refunded() {
            total = total + refund.amount;
        }
    }
    Ok(total)
}

/// Compare-and-set write, same discipline as the orders table.
pub async fn update_refund(refund: &Refund, conn: &mut SqliteConnection) -> Result<Refund, StoreError> {
    let mut updated = refund.clone();
    updated.version = refund.version + 1;
    updated.updated_at = Utc::now();
    let body = serde_json::to_string(&updated).map_err(|e| StoreError::DatabaseError(e.to_string()))?;
    let result = sqlx::query(
        r#"
            UPDATE refunds
            SET status = $1, version = $2, body = $3, updated_at = $4
            WHERE id = $5 AND version = $6
        "#,
    )
    .bind(updated.status as i64)
    .bind(updated.version)
    .bind(body)
    .bind(updated.updated_at)
    .bind(&refund.id)
    .bind(refund.version)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        return match fetch_refund(&refund.id, conn).await? {
            Some(_) => Err(StoreError::VersionConflict(refund.id.clone(), refund.version)),
            None => Err(StoreError::RefundNotFound(refund.id.clone())),
        };
    }
    trace!("🗃️ Refund [{}] updated to version {}", updated.id, updated.version);
    Ok(updated)
}
