use std::fmt::Debug;

use log::*;

use crate::{
    bpe_api::ApiError,
    db_types::{CallbackProtocol, Order, PrivateOrderStatus, ProductType, PublicOrderStatus},
    events::{EventProducers, OrderAnnulledEvent, OrderSettledEvent},
    traits::{KeyInventory, Notifier, OrderStore, StoreError},
};

/// The single gate through which order state changes flow.
///
/// Every mutation of a stored order goes through [`OrderLifecycle::update_order`]: the write is a
/// compare-and-set on the order's version, and when the *public* status changed as a result, the
/// gate fires the attendant side effects exactly once. Writers racing on the same order get a
/// [`StoreError::VersionConflict`] back and must re-read before retrying, so no transition can be
/// observed (and its effects fired) twice.
///
/// Side effects never roll the write back. A notification or fulfilment failure is logged and the
/// order stays in its new state; merchant notifications additionally record their outcome on the
/// order so a retry pass can find the gaps.
pub struct OrderLifecycle<B, N> {
    db: B,
    effects: N,
    producers: EventProducers,
}

impl<B, N> Debug for OrderLifecycle<B, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderLifecycle")
    }
}

impl<B, N> OrderLifecycle<B, N> {
    pub fn new(db: B, effects: N, producers: EventProducers) -> Self {
        Self { db, effects, producers }
    }
}

impl<B, N> OrderLifecycle<B, N>
where
    B: OrderStore,
    N: Notifier + KeyInventory,
{
    /// Persists `order` and fires the transition side effects when its public status changed.
    ///
    /// `order` must carry the version of the row it was derived from. The stored row must exist;
    /// orders are never written here for the first time.
    pub async fn update_order(&self, order: &Order) -> Result<Order, ApiError> {
        let stored = self
            .db
            .fetch_order_by_id(&order.id)
            .await?
            .ok_or_else(|| ApiError::Store(StoreError::OrderNotFound(order.id.clone())))?;
        let old_status = stored.public_status();
        let mut updated = self.db.update_order(order).await?;
        let new_status = updated.public_status();
        if old_status == new_status {
            trace!("🔄️ Order [{}] updated, public status unchanged ({new_status})", updated.id);
            return Ok(updated);
        }
        debug!("🔄️ Order [{}] moved {old_status} -> {new_status}", updated.id);
        if new_status.is_preliminary() {
            return Ok(updated);
        }
        self.run_fulfilment(&mut updated, new_status).await;
        self.run_notifications(&mut updated, new_status).await;
        self.publish_events(&updated, old_status, new_status).await;
        Ok(updated)
    }

    /// Key orders deliver through the key inventory. Settled payments finalise the reserved keys;
    /// failed payments release them back to stock.
    async fn run_fulfilment(&self, order: &mut Order, status: PublicOrderStatus) {
        if order.product_type != ProductType::Key {
            return;
        }
        use PublicOrderStatus::*;
        match status {
            Paid => match self.effects.finalize_reservations(&order.id).await {
                Ok(()) => {
                    // Key delivery is the whole of fulfilment, so a paid key order is complete.
                    let mut complete = order.clone();
                    complete.private_status = PrivateOrderStatus::ProjectComplete;
                    match self.db.update_order(&complete).await {
                        Ok(o) => {
                            debug!("🔄️ Key order [{}] fulfilled and marked complete", o.id);
                            *order = o;
                        },
                        Err(e) => warn!("🔄️ Key order [{}] fulfilled but could not be marked complete: {e}", order.id),
                    }
                },
                Err(e) => error!("🔄️ Could not finalize key reservations for order [{}]: {e}", order.id),
            },
            Canceled | Rejected => {
                if let Err(e) = self.effects.cancel_reservations(&order.id).await {
                    warn!("🔄️ Could not release key reservations for order [{}]: {e}", order.id);
                }
            },
            _ => {},
        }
    }

    async fn run_notifications(&self, order: &mut Order, status: PublicOrderStatus) {
        if let Err(e) = self.effects.notify_customer(order, status).await {
            warn!("🔄️ Customer notification for order [{}] ({status}) failed: {e}", order.id);
        }
        if !self.merchant_wants_callbacks(order) {
            return;
        }
        let sent = match self.effects.notify_merchant(order, status).await {
            Ok(()) => true,
            Err(e) => {
                warn!("🔄️ Merchant notification for order [{}] ({status}) failed: {e}", order.id);
                false
            },
        };
        order.set_notification_status(status, sent);
        // Best effort. A conflicting write means someone else already moved the order on; the
        // notification ledger update loses that race silently.
        match self.db.update_order(order).await {
            Ok(o) => *order = o,
            Err(e) => trace!("🔄️ Could not record notification status for order [{}]: {e}", order.id),
        }
    }

    fn merchant_wants_callbacks(&self, order: &Order) -> bool {
        order.project.callback_protocol == CallbackProtocol::Default && order.project.notify_url.is_some()
    }

    async fn publish_events(&self, order: &Order, old_status: PublicOrderStatus, new_status: PublicOrderStatus) {
        use PublicOrderStatus::*;
        match new_status {
            Paid | Processed if old_status.is_preliminary() => {
                let event = OrderSettledEvent::new(order.clone());
                for producer in &self.producers.order_settled_producer {
                    producer.publish_event(event.clone()).await;
                }
            },
            Canceled | Rejected => {
                let event = OrderAnnulledEvent::new(order.clone());
                for producer in &self.producers.order_annulled_producer {
                    producer.publish_event(event.clone()).await;
                }
            },
            _ => {},
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        test_utils::{
            fixtures::{new_order_fixture, RecordingSideEffects},
            memory::MemoryDatabase,
        },
    };

    fn lifecycle(db: &MemoryDatabase, effects: &RecordingSideEffects) -> OrderLifecycle<MemoryDatabase, RecordingSideEffects> {
        OrderLifecycle::new(db.clone(), effects.clone(), EventProducers::default())
    }

    #[tokio::test]
    async fn settling_an_order_notifies_both_parties() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let mut order = new_order_fixture();
        db.insert_order(&order).await.unwrap();
        order.private_status = PrivateOrderStatus::PaymentSystemComplete;
        let updated = lifecycle(&db, &effects).update_order(&order).await.unwrap();
        assert_eq!(updated.public_status(), PublicOrderStatus::Paid);
        assert_eq!(effects.customer_notifications.lock().unwrap().as_slice(), &["order-1:paid".to_string()]);
        assert_eq!(effects.merchant_notifications.lock().unwrap().as_slice(), &["order-1:paid".to_string()]);
        // The successful merchant callback is recorded on the stored row.
        let stored = db.fetch_order_by_id("order-1").await.unwrap().unwrap();
        assert_eq!(stored.is_notifications_sent.get("paid"), Some(&true));
    }

    #[tokio::test]
    async fn preliminary_transitions_fire_no_side_effects() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let mut order = new_order_fixture();
        order.private_status = PrivateOrderStatus::New;
        db.insert_order(&order).await.unwrap();
        order.private_status = PrivateOrderStatus::Pending;
        lifecycle(&db, &effects).update_order(&order).await.unwrap();
        assert!(effects.customer_notifications.lock().unwrap().is_empty());
        assert!(effects.merchant_notifications.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn paid_key_orders_finalize_reservations_and_complete() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let mut order = new_order_fixture();
        order.product_type = ProductType::Key;
        db.insert_order(&order).await.unwrap();
        order.private_status = PrivateOrderStatus::PaymentSystemComplete;
        let updated = lifecycle(&db, &effects).update_order(&order).await.unwrap();
        assert_eq!(effects.finalized.lock().unwrap().as_slice(), &["order-1".to_string()]);
        assert_eq!(updated.private_status, PrivateOrderStatus::ProjectComplete);
    }

    #[tokio::test]
    async fn declined_key_orders_release_reservations() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let mut order = new_order_fixture();
        order.product_type = ProductType::Key;
        db.insert_order(&order).await.unwrap();
        order.private_status = PrivateOrderStatus::PaymentSystemDeclined;
        lifecycle(&db, &effects).update_order(&order).await.unwrap();
        assert_eq!(effects.cancelled.lock().unwrap().as_slice(), &["order-1".to_string()]);
        assert!(effects.finalized.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_writers_get_a_version_conflict() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let order = new_order_fixture();
        db.insert_order(&order).await.unwrap();
        let gate = lifecycle(&db, &effects);
        let mut first = order.clone();
        first.private_status = PrivateOrderStatus::PaymentSystemComplete;
        gate.update_order(&first).await.unwrap();
        let mut stale = order;
        stale.private_status = PrivateOrderStatus::PaymentSystemDeclined;
        let err = gate.update_order(&stale).await.unwrap_err();
        assert!(matches!(err, ApiError::Store(StoreError::VersionConflict(_, _))));
        // The losing transition fired nothing.
        assert!(effects.cancelled.lock().unwrap().is_empty());
    }
}
