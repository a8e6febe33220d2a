use serde::{Deserialize, Serialize};

use crate::db_types::{Order, PublicOrderStatus, Refund};

/// Fired once per order when its payment settles (the first transition into `Paid` or
/// `Processed`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSettledEvent {
    pub order: Order,
}

impl OrderSettledEvent {
    pub fn new(order: Order) -> Self {
        Self { order }
    }
}

/// Fired when an order reaches a failed public status (declined, canceled or rejected).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAnnulledEvent {
    pub order: Order,
    pub status: PublicOrderStatus,
}

impl OrderAnnulledEvent {
    pub fn new(order: Order) -> Self {
        let status = order.public_status();
        Self { order, status }
    }
}

/// Fired when a refund or chargeback completes against a settled order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundCompletedEvent {
    pub order: Order,
    pub refund: Refund,
}

impl RefundCompletedEvent {
    pub fn new(order: Order, refund: Refund) -> Self {
        Self { order, refund }
    }
}
