//! An in-memory store backend with the same semantics as the sqlite one: compare-and-set version
//! updates and the idempotent `(source, entry type)` ledger insert. Engine flow tests run against
//! this so they stay synchronous-fast and need no database file.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use bpg_common::Money;

use crate::{
    db_types::{AccountingEntry, EntrySourceKind, Order, OrderUuid, Refund},
    traits::{EntryStore, InsertEntryResult, OrderStore, RefundStore, StoreError},
};

#[derive(Debug, Default)]
struct Inner {
    orders: HashMap<String, Order>,
    refunds: HashMap<String, Refund>,
    entries: Vec<AccountingEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock means a test already panicked; propagating the panic is fine here.
        self.inner.lock().unwrap()
    }

    /// Every ledger row written so far, insertion order.
    pub fn all_entries(&self) -> Vec<AccountingEntry> {
        self.lock().entries.clone()
    }

    pub fn order_count(&self) -> usize {
        self.lock().orders.len()
    }
}

impl OrderStore for MemoryDatabase {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.orders.contains_key(&order.id) {
            return Err(StoreError::DatabaseError(format!("duplicate order id {}", order.id)));
        }
        if let Some(ext) = order.project_order_id.as_deref() {
            let duplicate = inner
                .orders
                .values()
                .any(|o| o.project.id == order.project.id && o.project_order_id.as_deref() == Some(ext));
            if duplicate {
                return Err(StoreError::DatabaseError(format!(
                    "duplicate project order id {ext} for project {}",
                    order.project.id
                )));
            }
        }
        inner.orders.insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn fetch_order_by_uuid(&self, uuid: &OrderUuid) -> Result<Option<Order>, StoreError> {
        Ok(self.lock().orders.values().find(|o| &o.uuid == uuid).cloned())
    }

    async fn fetch_order_by_id(&self, id: &str) -> Result<Option<Order>, StoreError> {
        Ok(self.lock().orders.get(id).cloned())
    }

    async fn fetch_order_by_project_order_id(
        &self,
        project_id: &str,
        project_order_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        Ok(self
            .lock()
            .orders
            .values()
            .find(|o| o.project.id == project_id && o.project_order_id.as_deref() == Some(project_order_id))
            .cloned())
    }

    async fn update_order(&self, order: &Order) -> Result<Order, StoreError> {
        let mut inner = self.lock();
        let stored = inner
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| StoreError::OrderNotFound(order.id.clone()))?;
        if stored.version != order.version {
            return Err(StoreError::VersionConflict(order.id.clone(), order.version));
        }
        let mut updated = order.clone();
        updated.version += 1;
        *stored = updated.clone();
        Ok(updated)
    }
}

impl RefundStore for MemoryDatabase {
    async fn insert_refund(&self, refund: &Refund) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.refunds.contains_key(&refund.id) {
            return Err(StoreError::DatabaseError(format!("duplicate refund id {}", refund.id)));
        }
        inner.refunds.insert(refund.id.clone(), refund.clone());
        Ok(())
    }

    async fn fetch_refund(&self, id: &str) -> Result<Option<Refund>, StoreError> {
        Ok(self.lock().refunds.get(id).cloned())
    }

    async fn fetch_refunds_for_order(
        &self,
        order_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Refund>, StoreError> {
        let mut refunds: Vec<Refund> =
            self.lock().refunds.values().filter(|r| r.order_ref.id == order_id).cloned().collect();
        // Id breaks timestamp ties so paging stays stable across calls.
        refunds.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(refunds.into_iter().skip(offset.max(0) as usize).take(limit.max(0) as usize).collect())
    }

    async fn count_refunds_for_order(&self, order_id: &str) -> Result<i64, StoreError> {
        Ok(self.lock().refunds.values().filter(|r| r.order_ref.id == order_id).count() as i64)
    }

    async fn refunded_amount_for_order(&self, order_id: &str) -> Result<Money, StoreError> {
        Ok(self
            .lock()
            .refunds
            .values()
            .filter(|r| r.order_ref.id == order_id && r.status.counts_towards_refunded())
            .fold(Money::zero(), |acc, r| acc + r.amount))
    }

    async fn update_refund(&self, refund: &Refund) -> Result<Refund, StoreError> {
        let mut inner = self.lock();
        let stored = inner
            .refunds
            .get_mut(&refund.id)
            .ok_or_else(|| StoreError::RefundNotFound(refund.id.clone()))?;
        if stored.version != refund.version {
            return Err(StoreError::VersionConflict(refund.id.clone(), refund.version));
        }
        let mut updated = refund.clone();
        updated.version += 1;
        *stored = updated.clone();
        Ok(updated)
    }
}

impl EntryStore for MemoryDatabase {
    async fn insert_entry(&self, entry: &AccountingEntry) -> Result<InsertEntryResult, StoreError> {
        let mut inner = self.lock();
        let exists = inner
            .entries
            .iter()
            .any(|e| e.source_id == entry.source_id && e.entry_type == entry.entry_type);
        if exists {
            return Ok(InsertEntryResult::AlreadyExists);
        }
        inner.entries.push(entry.clone());
        Ok(InsertEntryResult::Inserted)
    }

    async fn fetch_entries_for_source(
        &self,
        source_id: &str,
        kind: EntrySourceKind,
    ) -> Result<Vec<AccountingEntry>, StoreError> {
        Ok(self
            .lock()
            .entries
            .iter()
            .filter(|e| e.source_id == source_id && e.source_kind == kind)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod test {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::db_types::RefundStatus;

    fn order(id: &str, project_order_id: &str) -> Order {
        let mut o = crate::test_utils::fixtures::new_order_fixture();
        o.id = id.to_string();
        o.uuid = OrderUuid(format!("uuid-{id}"));
        o.project_order_id = Some(project_order_id.to_string());
        o
    }

    #[tokio::test]
    async fn stale_order_update_is_rejected() {
        let db = MemoryDatabase::new();
        let o = order("o-1", "ext-1");
        db.insert_order(&o).await.unwrap();
        let fresh = db.update_order(&o).await.unwrap();
        assert_eq!(fresh.version, o.version + 1);
        // A writer still holding the original row loses the race.
        let err = db.update_order(&o).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict(_, _)));
    }

    #[tokio::test]
    async fn duplicate_project_order_id_is_rejected() {
        let db = MemoryDatabase::new();
        db.insert_order(&order("o-1", "ext-1")).await.unwrap();
        assert!(db.insert_order(&order("o-2", "ext-1")).await.is_err());
        assert!(db.insert_order(&order("o-3", "ext-2")).await.is_ok());
    }

    #[tokio::test]
    async fn refunded_amount_skips_rejected_refunds(){
        let db = MemoryDatabase::new();
        let mut r1 = crate::test_utils::fixtures::new_refund_fixture("r-1", "o-1", "10");
        r1.created_at = Utc::now() - Duration::minutes(5);
        let r2 = crate::test_utils::fixtures::new_refund_fixture("r-2", "o-1", "25");
        let mut r3 = crate::test_utils::fixtures::new_refund_fixture("r-3", "o-1", "100");
        r3.created_at = Utc::now() - Duration::minutes(1);
        r3.status = RefundStatus::Rejected;
        for r in [&r1, &r2, &r3] {
            db.insert_refund(r).await.unwrap();
        }
        let total = db.refunded_amount_for_order("o-1").await.unwrap();
        assert_eq!(total, "35".parse().unwrap());
        let newest_first = db.fetch_refunds_for_order("o-1", 10, 0).await.unwrap();
        assert_eq!(newest_first.first().map(|r| r.id.as_str()), Some("r-2"));
    }
}
