//! `SqliteDatabase` is a concrete implementation of the billing engine's store traits.
//!
//! It keeps the engine's only owned state: orders, refunds and the accounting ledger. The actual
//! SQL lives in the [`super::db`] helper functions; this type just owns the pool and adapts the
//! helpers to the trait surfaces.
use std::fmt::Debug;

use bpg_common::Money;
use sqlx::SqlitePool;

use super::db::{entries, new_pool, orders, refunds};
use crate::{
    db_types::{AccountingEntry, EntrySourceKind, Order, OrderUuid, Refund},
    traits::{EntryStore, InsertEntryResult, OrderStore, RefundStore, StoreError},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new connection pool and returns a new database instance.
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl OrderStore for SqliteDatabase {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::insert_order(order, &mut conn).await
    }

    async fn fetch_order_by_uuid(&self, uuid: &OrderUuid) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order_by_uuid(uuid, &mut conn).await
    }

    async fn fetch_order_by_id(&self, id: &str) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order_by_id(id, &mut conn).await
    }

    async fn fetch_order_by_project_order_id(
        &self,
        project_id: &str,
        project_order_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order_by_project_order_id(project_id, project_order_id, &mut conn).await
    }

    async fn update_order(&self, order: &Order) -> Result<Order, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::update_order(order, &mut conn).await
    }
}

impl RefundStore for SqliteDatabase {
    async fn insert_refund(&self, refund: &Refund) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        refunds::insert_refund(refund, &mut conn).await
    }

    async fn fetch_refund(&self, id: &str) -> Result<Option<Refund>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        refunds::fetch_refund(id, &mut conn).await
    }

    async fn fetch_refunds_for_order(&self, order_id: &str, limit: i64, offset: i64) -> Result<Vec<Refund>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        refunds::fetch_refunds_for_order(order_id, limit, offset, &mut conn).await
    }

    async fn count_refunds_for_order(&self, order_id: &str) -> Result<i64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        refunds::count_refunds_for_order(order_id, &mut conn).await
    }

    async fn refunded_amount_for_order(&self, order_id: &str) -> Result<Money, StoreError> {
        let mut conn = self.pool.acquire().await?;
        refunds::refunded_amount_for_order(order_id, &mut conn).await
    }

    async fn update_refund(&self, refund: &Refund) -> Result<Refund, StoreError> {
        let mut conn = self.pool.acquire().await?;
        refunds::update_refund(refund, &mut conn).await
    }
}

impl EntryStore for SqliteDatabase {
    async fn insert_entry(&self, entry: &AccountingEntry) -> Result<InsertEntryResult, StoreError> {
        let mut conn = self.pool.acquire().await?;
        entries::insert_entry(entry, &mut conn).await
    }

    async fn fetch_entries_for_source(
        &self,
        source_id: &str,
        kind: EntrySourceKind,
    ) -> Result<Vec<AccountingEntry>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        entries::fetch_entries_for_source(source_id, kind, &mut conn).await
    }
}
