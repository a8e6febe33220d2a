use thiserror::Error;

use crate::db_types::{Order, PublicOrderStatus, Refund};

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Outbound notifications fired by the order lifecycle gate. Delivery is at-least-once and
/// fire-and-forget: failures are logged, recorded on the order, and never roll back the order
/// mutation that triggered them.
#[allow(async_fn_in_trait)]
pub trait Notifier {
    /// The merchant webhook for a public status change.
    async fn notify_merchant(&self, order: &Order, status: PublicOrderStatus) -> Result<(), NotifyError>;

    /// Customer receipt (payment settled) or decline notice.
    async fn notify_customer(&self, order: &Order, status: PublicOrderStatus) -> Result<(), NotifyError>;

    /// Customer notification for a completed refund or chargeback.
    async fn notify_refund(&self, order: &Order, refund: &Refund) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Error)]
pub enum KeyInventoryError {
    #[error("No keys left for product {0} on platform {1}")]
    OutOfStock(String, String),
    #[error("Key inventory service error: {0}")]
    ServiceError(String),
}

/// Reservation bookkeeping for key-product orders, backed by the key service.
///
/// A reservation is taken per product at payment-create time and either finalized (keys delivered)
/// or cancelled (payment failed, order annulled) when the order reaches a settled public status.
#[allow(async_fn_in_trait)]
pub trait KeyInventory {
    async fn reserve_key(&self, order_id: &str, product_id: &str, platform_id: &str) -> Result<(), KeyInventoryError>;

    async fn finalize_reservations(&self, order_id: &str) -> Result<(), KeyInventoryError>;

    async fn cancel_reservations(&self, order_id: &str) -> Result<(), KeyInventoryError>;
}

#[derive(Debug, Clone, Error)]
pub enum CardVaultError {
    #[error("Card vault service error: {0}")]
    ServiceError(String),
}

/// Storage for recurring-payment card data. Only ever receives masked requisites and the card
/// fingerprint; the full PAN never reaches this engine.
#[allow(async_fn_in_trait)]
pub trait CardVault {
    async fn store_card(
        &self,
        user_id: &str,
        masked_pan: &str,
        expiry_month: &str,
        expiry_year: &str,
        fingerprint: &str,
    ) -> Result<(), CardVaultError>;
}
