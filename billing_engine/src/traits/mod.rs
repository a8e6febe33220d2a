//! # Collaborator contracts.
//!
//! The engine owns three collections (orders, refunds, accounting entries) and consumes everything
//! else through the narrow traits defined here. The split keeps each flow honest about its
//! dependencies: a component declares only the traits it needs in its generic bounds, and a test
//! can stand in a fake for exactly that subset.
//!
//! ## Stores
//! [`OrderStore`], [`RefundStore`] and [`EntryStore`] are the persistent collections the engine is
//! responsible for. Backends implement all three (see [`crate::SqliteDatabase`]). Order and refund
//! updates are compare-and-set on a version column; the accounting-entry insert is idempotent on
//! the `(source, entry type)` pair, which is what makes callback replays safe.
//!
//! ## Reference data
//! [`CatalogLookup`] resolves projects, merchants, payment methods, countries, price groups,
//! products and card BINs. [`CostRates`] resolves the fee tariff tables. [`CurrencyExchange`],
//! [`TaxRates`] and [`GeoIp`] wrap the platform's reference microservices. None of this data is
//! owned or cached by the engine.
//!
//! ## Outbound effects
//! [`PaymentGatewayClient`] submits payments and refunds upstream. [`Notifier`], [`KeyInventory`]
//! and [`CardVault`] carry the side effects fired by the order lifecycle gate.
mod gateway;
mod reference;
mod side_effects;
mod stores;

pub use gateway::{
    GatewayError,
    GatewayPaymentRequest,
    GatewayPaymentSession,
    GatewayRefundAccepted,
    GatewayRefundRequest,
    PaymentGatewayClient,
};
pub use reference::{
    CatalogError,
    CatalogLookup,
    ConversionSide,
    CostRateError,
    CostRates,
    CurrencyExchange,
    ExchangeError,
    GeoError,
    GeoIp,
    GeoLocation,
    RateSource,
    ResolvedTax,
    TaxError,
    TaxRates,
};
pub use side_effects::{CardVault, CardVaultError, KeyInventory, KeyInventoryError, Notifier, NotifyError};
pub use stores::{EntryStore, InsertEntryResult, OrderStore, RefundStore, StoreError};
