use chrono::Utc;
use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db_types::{Order, OrderUuid},
    traits::StoreError,
};

fn decode(id: &str, body: String) -> Result<Order, StoreError> {
    serde_json::from_str(&body).map_err(|e| StoreError::CorruptRecord(id.to_string(), e.to_string()))
}

/// Inserts a new order. The unique indexes on `uuid` and `(project_id, project_order_id)` are the
/// backstop for the pipeline's duplicate check.
pub async fn insert_order(order: &Order, conn: &mut SqliteConnection) -> Result<(), StoreError> {
    let body = serde_json::to_string(order).map_err(|e| StoreError::DatabaseError(e.to_string()))?;
    sqlx::query(
        r#"
            INSERT INTO orders (
                id,
                uuid,
                project_id,
                project_order_id,
                order_type,
                private_status,
                version,
                body,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(&order.id)
    .bind(order.uuid.as_str())
    .bind(&order.project.id)
    .bind(order.project_order_id.as_deref())
    .bind(order.order_type.to_string())
    .bind(order.private_status.to_string())
    .bind(order.version)
    .bind(body)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(conn)
    .await?;
    trace!("🗃️ Order [{}] inserted", order.id);
    Ok(())
}

pub async fn fetch_order_by_id(id: &str, conn: &mut SqliteConnection) -> Result<Option<Order>, StoreError> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT body FROM orders WHERE id = $1").bind(id).fetch_optional(conn).await?;
    row.map(|(body,)| decode(id, body)).transpose()
}

pub async fn fetch_order_by_uuid(uuid: &OrderUuid, conn: &mut SqliteConnection) -> Result<Option<Order>, StoreError> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT body FROM orders WHERE uuid = $1").bind(uuid.as_str()).fetch_optional(conn).await?;
    row.map(|(body,)| decode(uuid.as_str(), body)).transpose()
}

pub async fn fetch_order_by_project_order_id(
    project_id: &str,
    project_order_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, StoreError> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT body FROM orders WHERE project_id = $1 AND project_order_id = $2")
            .bind(project_id)
            .bind(project_order_id)
            .fetch_optional(conn)
            .await?;
    row.map(|(body,)| decode(project_order_id, body)).transpose()
}

/// Compare-and-set write: the stored version must still equal `order.version`. The persisted row
/// carries `version + 1` and a fresh `updated_at`.
pub async fn update_order(order: &Order, conn: &mut SqliteConnection) -> Result<Order, StoreError> {
    let mut updated = order.clone();
    updated.version = order.version + 1;
    updated.updated_at = Utc::now();
    let body = serde_json::to_string(&updated).map_err(|e| StoreError::DatabaseError(e.to_string()))?;
    let result = sqlx::query(
        r#"
            UPDATE orders
            SET private_status = $1, version = $2, body = $3, updated_at = $4
            WHERE id = $5 AND version = $6
        "#,
    )
    .bind(updated.private_status.to_string())
    .bind(updated.version)
    .bind(body)
    .bind(updated.updated_at)
    .bind(&order.id)
    .bind(order.version)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        return match fetch_order_by_id(&order.id, conn).await? {
            Some(_) => Err(StoreError::VersionConflict(order.id.clone(), order.version)),
            None => Err(StoreError::OrderNotFound(order.id.clone())),
        };
    }
    trace!("🗃️ Order [{}] updated to version {}", updated.id, updated.version);
    Ok(updated)
}
