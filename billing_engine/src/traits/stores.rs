use bpg_common::Money;
use thiserror::Error;

use crate::db_types::{AccountingEntry, EntrySourceKind, Order, OrderUuid, Refund};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(String),
    #[error("The requested refund {0} does not exist")]
    RefundNotFound(String),
    #[error("Stale write for {0}: stored version is no longer {1}")]
    VersionConflict(String, i64),
    #[error("Stored row for {0} could not be decoded: {1}")]
    CorruptRecord(String, String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// Persistence for [`Order`] rows.
///
/// Orders are append-then-mutate: a row is inserted once by the checkout pipeline and afterwards
/// only changed through [`OrderStore::update_order`], which performs a compare-and-set on the
/// `version` column. A conflicting update returns [`StoreError::VersionConflict`] and the caller
/// re-reads and retries.
#[allow(async_fn_in_trait)]
pub trait OrderStore: Clone {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError>;

    async fn fetch_order_by_uuid(&self, uuid: &OrderUuid) -> Result<Option<Order>, StoreError>;

    async fn fetch_order_by_id(&self, id: &str) -> Result<Option<Order>, StoreError>;

    /// Looks an order up by the merchant-supplied external id. Used to reject duplicate checkout
    /// requests for the same `(project, project_order_id)` pair.
    async fn fetch_order_by_project_order_id(
        &self,
        project_id: &str,
        project_order_id: &str,
    ) -> Result<Option<Order>, StoreError>;

    /// Persists `order`, requiring the stored version to equal `order.version`. On success the
    /// stored row (with `version + 1`) is returned.
    async fn update_order(&self, order: &Order) -> Result<Order, StoreError>;
}

/// Persistence for [`Refund`] rows. Same versioning discipline as [`OrderStore`].
#[allow(async_fn_in_trait)]
pub trait RefundStore: Clone {
    async fn insert_refund(&self, refund: &Refund) -> Result<(), StoreError>;

    async fn fetch_refund(&self, id: &str) -> Result<Option<Refund>, StoreError>;

    /// Refunds for an order, newest first, paged.
    async fn fetch_refunds_for_order(
        &self,
        order_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Refund>, StoreError>;

    async fn count_refunds_for_order(&self, order_id: &str) -> Result<i64, StoreError>;

    /// The cumulative amount of all refunds that still count towards the order's refunded total
    /// (everything except rejected and declined refunds).
    async fn refunded_amount_for_order(&self, order_id: &str) -> Result<Money, StoreError>;

    async fn update_refund(&self, refund: &Refund) -> Result<Refund, StoreError>;
}

/// Outcome of an accounting-entry insert. A replayed settlement computes the same entries again;
/// the store recognises the `(source, type)` key and reports [`InsertEntryResult::AlreadyExists`]
/// instead of double-counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertEntryResult {
    Inserted,
    AlreadyExists,
}

/// Persistence for the append-only accounting ledger.
#[allow(async_fn_in_trait)]
pub trait EntryStore: Clone {
    /// Idempotent insert keyed on `(source_id, entry_type)`.
    async fn insert_entry(&self, entry: &AccountingEntry) -> Result<InsertEntryResult, StoreError>;

    async fn fetch_entries_for_source(
        &self,
        source_id: &str,
        kind: EntrySourceKind,
    ) -> Result<Vec<AccountingEntry>, StoreError>;
}
