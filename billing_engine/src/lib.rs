//! Billing Platform Engine
//!
//! The billing engine is the transaction core of the payment platform. It turns a checkout request
//! into a priced, tax-computed order, drives that order through a payment gateway, and on
//! settlement or reversal produces a reconciled set of accounting entries that split the money
//! between the platform, the merchant and the customer across up to three currencies.
//!
//! The library is divided into three main sections:
//! 1. Persistent state management ([`mod@sqlite`]). Orders, refunds and accounting entries are the
//!    only state this engine owns; everything else (catalog, tariffs, exchange rates, tax rates,
//!    geo data) is read through the collaborator traits in [`mod@traits`] and belongs to other
//!    services.
//! 2. The engine public API ([`mod@bpe_api`]): the checkout pipeline, the payment and refund
//!    flows, the order lifecycle gate and the accounting-entry calculator.
//! 3. An event system ([`mod@events`]) that emits typed events (order status changed, refund
//!    completed) which downstream components subscribe to through a simple actor framework.
pub mod bpe_api;
pub mod db_types;
pub mod events;
pub mod gateways;
pub mod helpers;
#[cfg(feature = "sqlite")]
mod sqlite;

pub mod errors;
pub mod traits;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use bpe_api::{
    accounting::{order_settlement, refund_settlement, OrderLedger, OrderSettlementInput, RefundLedger, RefundSettlementInput},
    lifecycle::OrderLifecycle,
    order_objects,
    order_pipeline::CheckoutApi,
    payment_flow::PaymentFlowApi,
    refund_flow::RefundApi,
    ApiError,
};
pub use errors::{BillingError, CallbackStatus, DomainMessage, ResponseStatus};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
