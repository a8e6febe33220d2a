use bpg_common::Money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::{
    BinRecord,
    Country,
    Merchant,
    MoneyBackCostMerchant,
    MoneyBackCostSystem,
    PaymentChannelCostMerchant,
    PaymentChannelCostSystem,
    PaymentMethod,
    PriceGroup,
    Product,
    Project,
    TaxType,
    UndoReason,
};

#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Catalog service error: {0}")]
    ServiceError(String),
}

/// Read access to the platform catalog: projects, merchants, payment methods and the reference
/// rows the pricing pipeline needs. The catalog is owned by another service; this engine only
/// ever reads it.
#[allow(async_fn_in_trait)]
pub trait CatalogLookup {
    async fn fetch_project(&self, id: &str) -> Result<Option<Project>, CatalogError>;

    async fn fetch_merchant(&self, id: &str) -> Result<Option<Merchant>, CatalogError>;

    async fn fetch_payment_method(&self, id: &str) -> Result<Option<PaymentMethod>, CatalogError>;

    /// Active payment methods that carry production settings for `currency`. Drives the payment
    /// form's method list.
    async fn fetch_payment_methods_for_currency(&self, currency: &str) -> Result<Vec<PaymentMethod>, CatalogError>;

    async fn fetch_country(&self, iso_code: &str) -> Result<Option<Country>, CatalogError>;

    async fn fetch_price_group(&self, id: &str) -> Result<Option<PriceGroup>, CatalogError>;

    /// Fetches the given products of a merchant. Products missing from the result set did not
    /// resolve (unknown, disabled, or owned by another merchant).
    async fn fetch_products(&self, merchant_id: &str, ids: &[String]) -> Result<Vec<Product>, CatalogError>;

    /// Card BIN lookup: first digits of a PAN to brand/issuer data.
    async fn fetch_bin(&self, bin: i64) -> Result<Option<BinRecord>, CatalogError>;
}

#[derive(Debug, Clone, Error)]
pub enum CostRateError {
    #[error("Cost rate service error: {0}")]
    ServiceError(String),
}

/// Read access to the fee tariff tables.
///
/// Lookups return every row matching the broad key (method name + region, plus payout currency
/// and undo reason where applicable); the accounting calculator picks the most specific row by
/// country itself, so the precedence rule lives in exactly one place.
#[allow(async_fn_in_trait)]
pub trait CostRates {
    async fn channel_costs_system(
        &self,
        name: &str,
        region: &str,
    ) -> Result<Vec<PaymentChannelCostSystem>, CostRateError>;

    async fn channel_costs_merchant(
        &self,
        merchant_id: &str,
        name: &str,
        payout_currency: &str,
        region: &str,
    ) -> Result<Vec<PaymentChannelCostMerchant>, CostRateError>;

    async fn money_back_costs_system(
        &self,
        name: &str,
        payout_currency: &str,
        undo_reason: UndoReason,
        region: &str,
    ) -> Result<Vec<MoneyBackCostSystem>, CostRateError>;

    async fn money_back_costs_merchant(
        &self,
        merchant_id: &str,
        name: &str,
        payout_currency: &str,
        undo_reason: UndoReason,
        region: &str,
    ) -> Result<Vec<MoneyBackCostMerchant>, CostRateError>;
}

/// Which rate table a conversion goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    /// The platform's stock exchange rate. Used for all cost-value conversions.
    Stock,
    /// The central-bank reference rate of the order's country. Used for VAT reporting.
    CentralBank,
}

/// Which side of the spread a merchant conversion lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionSide {
    /// The merchant receives the amount; the rate is reduced by the platform spread.
    Credit,
    /// The merchant pays the amount; the rate is increased by the platform spread.
    Debit,
}

#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    #[error("Currency exchange service error: {0}")]
    ServiceError(String),
    #[error("No exchange rate available for {0}->{1}")]
    RateNotAvailable(String, String),
}

/// The currency-exchange collaborator. The service performs the arithmetic and returns the
/// converted amount; callers apply the platform rounding rules to the result.
#[allow(async_fn_in_trait)]
pub trait CurrencyExchange {
    async fn convert(&self, from: &str, to: &str, amount: Money, source: RateSource) -> Result<Money, ExchangeError>;

    /// Converts at the merchant rate: the stock rate with the platform spread applied on `side`.
    /// The spread is part of the merchant's rate table, so a same-currency `Debit` conversion
    /// still carries the markup.
    async fn convert_for_merchant(
        &self,
        from: &str,
        to: &str,
        amount: Money,
        side: ConversionSide,
    ) -> Result<Money, ExchangeError>;
}

/// A resolved tax rate for a billing location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTax {
    pub tax_type: TaxType,
    /// Fractional rate, e.g. `0.20` for 20%.
    pub rate: Decimal,
}

#[derive(Debug, Clone, Error)]
pub enum TaxError {
    #[error("Tax rate service error: {0}")]
    ServiceError(String),
    #[error("No tax rate configured for country {0}")]
    RateNotFound(String),
}

/// Tax-rate lookup. US sales tax is keyed by zip code; everywhere else by country.
#[allow(async_fn_in_trait)]
pub trait TaxRates {
    async fn rate_for(&self, country: &str, zip: Option<&str>) -> Result<ResolvedTax, TaxError>;
}

/// The location a payer IP resolves to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub country: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum GeoError {
    #[error("GeoIP service error: {0}")]
    ServiceError(String),
}

#[allow(async_fn_in_trait)]
pub trait GeoIp {
    /// Resolves a payer IP to a location, or `None` when the IP is unknown to the geo database.
    async fn locate(&self, ip: &str) -> Result<Option<GeoLocation>, GeoError>;
}
