//! The settlement calculator.
//!
//! [`order_settlement`] and [`refund_settlement`] turn a settled payment or a completed refund
//! into the full waterfall of named money-flow components. The functions only read their input
//! and the exchange collaborator; persisting the produced rows is the caller's job (and is
//! idempotent through the entry store's `(source, type)` key, so a replayed settlement computes
//! the same ledger and inserts nothing).
//!
//! Every intermediate result is rounded half-away-from-zero to ten decimal places
//! ([`Money::to_precise`]). The money-conservation identities in the tests hold bit-for-bit
//! because rounding happens after each step, not once at the end.

use bpg_common::Money;
use chrono::Utc;
use log::*;
use thiserror::Error;

use crate::{
    db_types::{
        AccountingEntry,
        AccountingEntryType,
        Country,
        EntrySourceKind,
        MoneyBackCostMerchant,
        MoneyBackCostSystem,
        PaymentChannelCostMerchant,
        PaymentChannelCostSystem,
        ENTRY_STATUS_AVAILABLE,
    },
    helpers::ids,
    traits::{ConversionSide, CurrencyExchange, EntryStore, ExchangeError, InsertEntryResult, RateSource, StoreError},
};

#[derive(Debug, Clone, Error)]
pub enum AccountingError {
    /// No tariff row matched the settlement's (method, region, country) key. Raised before any
    /// entry is computed; payment submission and refund creation treat it as a precondition
    /// failure.
    #[error("No cost rate configured for method '{0}' in {1}/{2}")]
    CostRateNotFound(String, String, String),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

//--------------------------------------   Cost-row pickers   --------------------------------------------------------

/// Country-specific rows win over region-wide rows (`country = ""`).
pub fn pick_channel_cost_system<'a>(
    rows: &'a [PaymentChannelCostSystem],
    country: &str,
) -> Option<&'a PaymentChannelCostSystem> {
    rows.iter().find(|r| r.country == country).or_else(|| rows.iter().find(|r| r.country.is_empty()))
}

/// Country precedence as for the system table; among matching rows the one with the largest
/// `min_amount` not exceeding `amount` applies.
pub fn pick_channel_cost_merchant<'a>(
    rows: &'a [PaymentChannelCostMerchant],
    country: &str,
    amount: Money,
) -> Option<&'a PaymentChannelCostMerchant> {
    let best = |specific: bool| {
        rows.iter()
            .filter(|r| r.is_active && (if specific { r.country == country } else { r.country.is_empty() }))
            .filter(|r| r.min_amount <= amount)
            .max_by_key(|r| r.min_amount)
    };
    best(true).or_else(|| best(false))
}

pub fn pick_money_back_cost_system<'a>(
    rows: &'a [MoneyBackCostSystem],
    country: &str,
    days_since_payment: i64,
) -> Option<&'a MoneyBackCostSystem> {
    let best = |specific: bool| {
        rows.iter()
            .filter(|r| if specific { r.country == country } else { r.country.is_empty() })
            .filter(|r| i64::from(r.days_from) <= days_since_payment)
            .max_by_key(|r| r.days_from)
    };
    best(true).or_else(|| best(false))
}

pub fn pick_money_back_cost_merchant<'a>(
    rows: &'a [MoneyBackCostMerchant],
    country: &str,
    days_since_payment: i64,
) -> Option<&'a MoneyBackCostMerchant> {
    let best = |specific: bool| {
        rows.iter()
            .filter(|r| r.is_active && (if specific { r.country == country } else { r.country.is_empty() }))
            .filter(|r| i64::from(r.days_from) <= days_since_payment)
            .max_by_key(|r| r.days_from)
    };
    best(true).or_else(|| best(false))
}

//--------------------------------------  Order settlement   ---------------------------------------------------------

/// Everything the order waterfall needs, resolved by the payment callback handler before the
/// calculator runs.
#[derive(Debug, Clone)]
pub struct OrderSettlementInput {
    /// Internal id of the settled order; becomes the ledger source id.
    pub order_id: String,
    pub merchant_id: String,
    pub country: Country,
    pub origin_currency: String,
    /// The merchant's payout currency.
    pub royalty_currency: String,
    /// `total_payment_amount`, in the origin currency.
    pub total: Money,
    /// The tax portion of the total, in the origin currency.
    pub tax_amount: Money,
    /// Cost-table method name, e.g. the card brand for card payments.
    pub method_name: String,
    pub system_costs: Vec<PaymentChannelCostSystem>,
    pub merchant_costs: Vec<PaymentChannelCostMerchant>,
}

/// The computed order waterfall. All amounts are in the royalty currency.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderLedger {
    pub real_gross_revenue: Money,
    pub real_tax_fee: Money,
    pub central_bank_tax_fee: Money,
    pub real_tax_fee_total: Money,
    pub ps_gross_revenue_fx: Money,
    pub ps_gross_revenue_fx_tax_fee: Money,
    pub ps_gross_revenue_fx_profit: Money,
    pub merchant_gross_revenue: Money,
    pub merchant_tax_fee_cost_value: Money,
    pub merchant_tax_fee_central_bank_fx: Money,
    pub merchant_tax_fee: Money,
    pub ps_method_fee: Money,
    pub merchant_method_fee: Money,
    pub merchant_method_fee_cost_value: Money,
    pub ps_markup_merchant_method_fee: Money,
    pub merchant_method_fixed_fee: Money,
    pub real_merchant_method_fixed_fee: Money,
    pub markup_merchant_method_fixed_fee_fx: Money,
    pub real_merchant_method_fixed_fee_cost_value: Money,
    pub ps_method_fixed_fee_profit: Money,
    pub merchant_ps_fixed_fee: Money,
    pub real_merchant_ps_fixed_fee: Money,
    pub markup_merchant_ps_fixed_fee: Money,
    pub ps_method_profit: Money,
    pub merchant_net_revenue: Money,
    pub ps_profit_total: Money,
    /// Carried for the ledger rows' origin-side columns.
    pub origin_total: Money,
    pub origin_tax: Money,
}

/// Computes the order settlement waterfall.
pub async fn order_settlement<X: CurrencyExchange>(
    exchange: &X,
    input: &OrderSettlementInput,
) -> Result<OrderLedger, AccountingError> {
    let country = &input.country;
    let sys = pick_channel_cost_system(&input.system_costs, &country.iso_code).ok_or_else(|| {
        AccountingError::CostRateNotFound(input.method_name.clone(), country.region.clone(), country.iso_code.clone())
    })?;

    let origin = input.origin_currency.as_str();
    let royalty = input.royalty_currency.as_str();

    let real_gross_revenue =
        exchange.convert(origin, royalty, input.total, RateSource::Stock).await?.to_precise();
    let merchant_gross_revenue =
        exchange.convert_for_merchant(origin, royalty, input.total, ConversionSide::Credit).await?.to_precise();
    let ps_gross_revenue_fx = (real_gross_revenue - merchant_gross_revenue).to_precise();

    let merchant = pick_channel_cost_merchant(&input.merchant_costs, &country.iso_code, merchant_gross_revenue)
        .ok_or_else(|| {
            AccountingError::CostRateNotFound(
                input.method_name.clone(),
                country.region.clone(),
                country.iso_code.clone(),
            )
        })?;

    let real_tax_fee = exchange.convert(origin, royalty, input.tax_amount, RateSource::Stock).await?.to_precise();
    let merchant_tax_fee_cost_value = exchange
        .convert_for_merchant(origin, royalty, input.tax_amount, ConversionSide::Credit)
        .await?
        .to_precise();
    let ps_gross_revenue_fx_tax_fee = (real_tax_fee - merchant_tax_fee_cost_value).to_precise();
    let ps_gross_revenue_fx_profit = (ps_gross_revenue_fx - ps_gross_revenue_fx_tax_fee).to_precise();

    // The tax authority is paid in the country's VAT currency; the round trip through the
    // central-bank rates is what the conversion actually costs the merchant.
    let merchant_tax_fee_central_bank_fx = match country.vat_currency.as_deref() {
        Some(vat) if vat != royalty => {
            let there =
                exchange.convert(royalty, vat, merchant_tax_fee_cost_value, RateSource::CentralBank).await?.to_precise();
            let back = exchange.convert(vat, royalty, there, RateSource::CentralBank).await?.to_precise();
            (back - merchant_tax_fee_cost_value).to_precise()
        },
        _ => Money::zero(),
    };
    let merchant_tax_fee = (merchant_tax_fee_cost_value + merchant_tax_fee_central_bank_fx).to_precise();

    let ps_method_fee = (merchant_gross_revenue * merchant.ps_percent).to_precise();
    let merchant_method_fee = (merchant_gross_revenue * merchant.method_percent).to_precise();
    let merchant_method_fee_cost_value = (real_gross_revenue * sys.percent).to_precise();
    let ps_markup_merchant_method_fee = (merchant_method_fee - merchant_method_fee_cost_value).to_precise();

    let real_merchant_method_fixed_fee = exchange
        .convert(&merchant.method_fix_amount_currency, royalty, merchant.method_fix_amount, RateSource::Stock)
        .await?
        .to_precise();
    let merchant_method_fixed_fee = exchange
        .convert_for_merchant(
            &merchant.method_fix_amount_currency,
            royalty,
            merchant.method_fix_amount,
            ConversionSide::Debit,
        )
        .await?
        .to_precise();
    let markup_merchant_method_fixed_fee_fx = (merchant_method_fixed_fee - real_merchant_method_fixed_fee).to_precise();
    let real_merchant_method_fixed_fee_cost_value =
        exchange.convert(&sys.fix_amount_currency, royalty, sys.fix_amount, RateSource::Stock).await?.to_precise();
    let ps_method_fixed_fee_profit =
        (real_merchant_method_fixed_fee - real_merchant_method_fixed_fee_cost_value).to_precise();

    let real_merchant_ps_fixed_fee = exchange
        .convert(&merchant.ps_fixed_fee_currency, royalty, merchant.ps_fixed_fee, RateSource::Stock)
        .await?
        .to_precise();
    let merchant_ps_fixed_fee = exchange
        .convert_for_merchant(&merchant.ps_fixed_fee_currency, royalty, merchant.ps_fixed_fee, ConversionSide::Debit)
        .await?
        .to_precise();
    let markup_merchant_ps_fixed_fee = (merchant_ps_fixed_fee - real_merchant_ps_fixed_fee).to_precise();

    let ps_method_profit = (ps_method_fee + merchant_ps_fixed_fee
        - merchant_method_fee_cost_value
        - real_merchant_method_fixed_fee_cost_value)
        .to_precise();

    let merchant_net_revenue = (real_gross_revenue
        - merchant_tax_fee_central_bank_fx
        - ps_gross_revenue_fx
        - merchant_tax_fee_cost_value
        - ps_method_fee
        - merchant_ps_fixed_fee)
        .to_precise();

    let central_bank_tax_fee = (real_gross_revenue * country.central_bank_tax_rate).to_precise();
    let real_tax_fee_total = (real_tax_fee + central_bank_tax_fee).to_precise();

    let ps_profit_total = (ps_gross_revenue_fx_profit + ps_method_profit + ps_method_fixed_fee_profit
        - merchant_tax_fee_central_bank_fx)
        .to_precise();

    debug!(
        "🧮️ Order {} settled: gross {real_gross_revenue} {royalty}, merchant net {merchant_net_revenue}, ps profit \
         {ps_profit_total}",
        input.order_id
    );

    Ok(OrderLedger {
        real_gross_revenue,
        real_tax_fee,
        central_bank_tax_fee,
        real_tax_fee_total,
        ps_gross_revenue_fx,
        ps_gross_revenue_fx_tax_fee,
        ps_gross_revenue_fx_profit,
        merchant_gross_revenue,
        merchant_tax_fee_cost_value,
        merchant_tax_fee_central_bank_fx,
        merchant_tax_fee,
        ps_method_fee,
        merchant_method_fee,
        merchant_method_fee_cost_value,
        ps_markup_merchant_method_fee,
        merchant_method_fixed_fee,
        real_merchant_method_fixed_fee,
        markup_merchant_method_fixed_fee_fx,
        real_merchant_method_fixed_fee_cost_value,
        ps_method_fixed_fee_profit,
        merchant_ps_fixed_fee,
        real_merchant_ps_fixed_fee,
        markup_merchant_ps_fixed_fee,
        ps_method_profit,
        merchant_net_revenue,
        ps_profit_total,
        origin_total: input.total,
        origin_tax: input.tax_amount,
    })
}

//--------------------------------------  Refund settlement  ---------------------------------------------------------

/// Everything the refund waterfall needs. `original_*` fields come from the original order's
/// persisted settlement entries.
#[derive(Debug, Clone)]
pub struct RefundSettlementInput {
    /// Internal id of the synthetic refund order; becomes the ledger source id.
    pub refund_order_id: String,
    pub merchant_id: String,
    pub country: Country,
    pub origin_currency: String,
    pub royalty_currency: String,
    /// The refunded amount, in the origin currency.
    pub refund_amount: Money,
    /// The original order's `total_payment_amount`, in the origin currency.
    pub order_total: Money,
    /// The original order's fractional tax rate (tax-inclusive pricing).
    pub tax_rate: rust_decimal::Decimal,
    pub is_chargeback: bool,
    /// The original settlement's `merchant_tax_fee`, royalty currency.
    pub original_merchant_tax_fee: Money,
    /// The original settlement's `ps_gross_revenue_fx_tax_fee`, royalty currency.
    pub original_ps_gross_revenue_fx_tax_fee: Money,
    pub method_name: String,
    pub system_costs: Vec<MoneyBackCostSystem>,
    pub merchant_costs: Vec<MoneyBackCostMerchant>,
    pub days_since_payment: i64,
}

/// The computed refund waterfall. All amounts are in the royalty currency.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefundLedger {
    pub real_refund: Money,
    pub real_refund_tax_fee: Money,
    pub real_refund_fee: Money,
    pub real_refund_fixed_fee: Money,
    pub merchant_refund: Money,
    pub ps_merchant_refund_fx: Money,
    pub merchant_refund_fee: Money,
    pub ps_markup_merchant_refund_fee: Money,
    pub merchant_refund_fixed_fee_cost_value: Money,
    pub merchant_refund_fixed_fee: Money,
    pub ps_merchant_refund_fixed_fee_fx: Money,
    pub ps_merchant_refund_fixed_fee_profit: Money,
    pub reverse_tax_fee: Money,
    pub reverse_tax_fee_delta: Money,
    pub ps_reverse_tax_fee_delta: Money,
    pub merchant_reverse_tax_fee: Money,
    pub merchant_reverse_revenue: Money,
    pub ps_refund_profit: Money,
    pub origin_refund: Money,
}

/// Computes the refund/chargeback waterfall.
pub async fn refund_settlement<X: CurrencyExchange>(
    exchange: &X,
    input: &RefundSettlementInput,
) -> Result<RefundLedger, AccountingError> {
    let country = &input.country;
    let sys = pick_money_back_cost_system(&input.system_costs, &country.iso_code, input.days_since_payment)
        .ok_or_else(|| {
            AccountingError::CostRateNotFound(
                input.method_name.clone(),
                country.region.clone(),
                country.iso_code.clone(),
            )
        })?;
    let merchant = pick_money_back_cost_merchant(&input.merchant_costs, &country.iso_code, input.days_since_payment)
        .ok_or_else(|| {
            AccountingError::CostRateNotFound(
                input.method_name.clone(),
                country.region.clone(),
                country.iso_code.clone(),
            )
        })?;

    let origin = input.origin_currency.as_str();
    let royalty = input.royalty_currency.as_str();

    let real_refund = exchange.convert(origin, royalty, input.refund_amount, RateSource::Stock).await?.to_precise();
    // Tax-inclusive pricing: the tax part of the refunded amount is amount * r / (1 + r).
    let tax_part = (input.refund_amount * input.tax_rate / (rust_decimal::Decimal::ONE + input.tax_rate)).to_precise();
    let real_refund_tax_fee = exchange.convert(origin, royalty, tax_part, RateSource::Stock).await?.to_precise();
    let real_refund_fee = (real_refund * sys.percent).to_precise();
    // The system money-back fix amount is already expressed in the payout currency.
    let real_refund_fixed_fee = sys.fix_amount.to_precise();

    let merchant_refund =
        exchange.convert_for_merchant(origin, royalty, input.refund_amount, ConversionSide::Debit).await?.to_precise();
    let ps_merchant_refund_fx = (merchant_refund - real_refund).to_precise();

    // Plain reversals are free for the merchant unless the tariff says otherwise; chargebacks
    // always charge.
    let charged = input.is_chargeback || merchant.is_paid_by_merchant;
    let merchant_refund_fee =
        if charged { (merchant_refund * merchant.percent).to_precise() } else { Money::zero() };
    let ps_markup_merchant_refund_fee = (merchant_refund_fee - real_refund_fee).to_precise();

    let (merchant_refund_fixed_fee_cost_value, merchant_refund_fixed_fee) = if charged {
        let cost_value = exchange
            .convert(&merchant.fix_amount_currency, royalty, merchant.fix_amount, RateSource::Stock)
            .await?
            .to_precise();
        let fee = exchange
            .convert_for_merchant(&merchant.fix_amount_currency, royalty, merchant.fix_amount, ConversionSide::Debit)
            .await?
            .to_precise();
        (cost_value, fee)
    } else {
        (Money::zero(), Money::zero())
    };
    let ps_merchant_refund_fixed_fee_fx = (merchant_refund_fixed_fee - merchant_refund_fixed_fee_cost_value).to_precise();
    let ps_merchant_refund_fixed_fee_profit = (merchant_refund_fixed_fee - real_refund_fixed_fee).to_precise();

    // Reverse the original tax proportionally to the refunded share of the order.
    let share = input.refund_amount.checked_ratio(input.order_total).unwrap_or_default();
    let reverse_tax_fee = (input.original_merchant_tax_fee * share).to_precise();
    let reverse_tax_fee_delta = Money::zero();
    let ps_reverse_tax_fee_delta = ((input.original_ps_gross_revenue_fx_tax_fee * share).to_precise()
        + (real_refund_tax_fee - reverse_tax_fee).to_precise())
    .to_precise();
    let merchant_reverse_tax_fee = reverse_tax_fee;

    let merchant_reverse_revenue =
        (merchant_refund + merchant_refund_fee + merchant_refund_fixed_fee - merchant_reverse_tax_fee).to_precise();

    let ps_refund_profit =
        (ps_markup_merchant_refund_fee + ps_merchant_refund_fixed_fee_profit + ps_reverse_tax_fee_delta).to_precise();

    debug!(
        "🧮️ Refund order {} settled: real refund {real_refund} {royalty}, merchant reverse revenue \
         {merchant_reverse_revenue}",
        input.refund_order_id
    );

    Ok(RefundLedger {
        real_refund,
        real_refund_tax_fee,
        real_refund_fee,
        real_refund_fixed_fee,
        merchant_refund,
        ps_merchant_refund_fx,
        merchant_refund_fee,
        ps_markup_merchant_refund_fee,
        merchant_refund_fixed_fee_cost_value,
        merchant_refund_fixed_fee,
        ps_merchant_refund_fixed_fee_fx,
        ps_merchant_refund_fixed_fee_profit,
        reverse_tax_fee,
        reverse_tax_fee_delta,
        ps_reverse_tax_fee_delta,
        merchant_reverse_tax_fee,
        merchant_reverse_revenue,
        ps_refund_profit,
        origin_refund: input.refund_amount,
    })
}

//--------------------------------------    Ledger rows      ---------------------------------------------------------

/// The row scope shared by every entry of one settlement event.
#[derive(Debug, Clone)]
pub struct LedgerScope {
    pub source_id: String,
    pub source_kind: EntrySourceKind,
    pub merchant_id: String,
    pub royalty_currency: String,
    pub origin_currency: String,
    /// The VAT currency of the order's country, falling back to the royalty currency.
    pub local_currency: String,
    pub country: String,
}

fn entry(scope: &LedgerScope, entry_type: AccountingEntryType, amount: Money) -> AccountingEntry {
    AccountingEntry {
        id: ids::new_id(),
        entry_type,
        source_id: scope.source_id.clone(),
        source_kind: scope.source_kind,
        merchant_id: scope.merchant_id.clone(),
        amount,
        currency: scope.royalty_currency.clone(),
        original_amount: amount,
        original_currency: scope.royalty_currency.clone(),
        local_amount: amount,
        local_currency: scope.local_currency.clone(),
        country: scope.country.clone(),
        status: ENTRY_STATUS_AVAILABLE.to_string(),
        created_at: Utc::now(),
    }
}

fn entry_with_origin(
    scope: &LedgerScope,
    entry_type: AccountingEntryType,
    amount: Money,
    origin_amount: Money,
) -> AccountingEntry {
    let mut e = entry(scope, entry_type, amount);
    e.original_amount = origin_amount;
    e.original_currency = scope.origin_currency.clone();
    e
}

impl OrderLedger {
    /// The 26 ledger rows of an order settlement, in waterfall order.
    pub fn entries(&self, scope: &LedgerScope) -> Vec<AccountingEntry> {
        use AccountingEntryType::*;
        vec![
            entry_with_origin(scope, RealGrossRevenue, self.real_gross_revenue, self.origin_total),
            entry_with_origin(scope, RealTaxFee, self.real_tax_fee, self.origin_tax),
            entry(scope, CentralBankTaxFee, self.central_bank_tax_fee),
            entry(scope, RealTaxFeeTotal, self.real_tax_fee_total),
            entry(scope, PsGrossRevenueFx, self.ps_gross_revenue_fx),
            entry(scope, PsGrossRevenueFxTaxFee, self.ps_gross_revenue_fx_tax_fee),
            entry(scope, PsGrossRevenueFxProfit, self.ps_gross_revenue_fx_profit),
            entry_with_origin(scope, MerchantGrossRevenue, self.merchant_gross_revenue, self.origin_total),
            entry_with_origin(scope, MerchantTaxFeeCostValue, self.merchant_tax_fee_cost_value, self.origin_tax),
            entry(scope, MerchantTaxFeeCentralBankFx, self.merchant_tax_fee_central_bank_fx),
            entry(scope, MerchantTaxFee, self.merchant_tax_fee),
            entry(scope, PsMethodFee, self.ps_method_fee),
            entry(scope, MerchantMethodFee, self.merchant_method_fee),
            entry(scope, MerchantMethodFeeCostValue, self.merchant_method_fee_cost_value),
            entry(scope, PsMarkupMerchantMethodFee, self.ps_markup_merchant_method_fee),
            entry(scope, MerchantMethodFixedFee, self.merchant_method_fixed_fee),
            entry(scope, RealMerchantMethodFixedFee, self.real_merchant_method_fixed_fee),
            entry(scope, MarkupMerchantMethodFixedFeeFx, self.markup_merchant_method_fixed_fee_fx),
            entry(scope, RealMerchantMethodFixedFeeCostValue, self.real_merchant_method_fixed_fee_cost_value),
            entry(scope, PsMethodFixedFeeProfit, self.ps_method_fixed_fee_profit),
            entry(scope, MerchantPsFixedFee, self.merchant_ps_fixed_fee),
            entry(scope, RealMerchantPsFixedFee, self.real_merchant_ps_fixed_fee),
            entry(scope, MarkupMerchantPsFixedFee, self.markup_merchant_ps_fixed_fee),
            entry(scope, PsMethodProfit, self.ps_method_profit),
            entry(scope, MerchantNetRevenue, self.merchant_net_revenue),
            entry(scope, PsProfitTotal, self.ps_profit_total),
        ]
    }
}

impl RefundLedger {
    /// The 18 ledger rows of a refund settlement, in waterfall order.
    pub fn entries(&self, scope: &LedgerScope) -> Vec<AccountingEntry> {
        use AccountingEntryType::*;
        vec![
            entry_with_origin(scope, RealRefund, self.real_refund, self.origin_refund),
            entry(scope, RealRefundTaxFee, self.real_refund_tax_fee),
            entry(scope, RealRefundFee, self.real_refund_fee),
            entry(scope, RealRefundFixedFee, self.real_refund_fixed_fee),
            entry_with_origin(scope, MerchantRefund, self.merchant_refund, self.origin_refund),
            entry(scope, PsMerchantRefundFx, self.ps_merchant_refund_fx),
            entry(scope, MerchantRefundFee, self.merchant_refund_fee),
            entry(scope, PsMarkupMerchantRefundFee, self.ps_markup_merchant_refund_fee),
            entry(scope, MerchantRefundFixedFeeCostValue, self.merchant_refund_fixed_fee_cost_value),
            entry(scope, MerchantRefundFixedFee, self.merchant_refund_fixed_fee),
            entry(scope, PsMerchantRefundFixedFeeFx, self.ps_merchant_refund_fixed_fee_fx),
            entry(scope, PsMerchantRefundFixedFeeProfit, self.ps_merchant_refund_fixed_fee_profit),
            entry(scope, ReverseTaxFee, self.reverse_tax_fee),
            entry(scope, ReverseTaxFeeDelta, self.reverse_tax_fee_delta),
            entry(scope, PsReverseTaxFeeDelta, self.ps_reverse_tax_fee_delta),
            entry(scope, MerchantReverseTaxFee, self.merchant_reverse_tax_fee),
            entry(scope, MerchantReverseRevenue, self.merchant_reverse_revenue),
            entry(scope, PsRefundProfit, self.ps_refund_profit),
        ]
    }
}

/// Persists a ledger. Returns how many rows were actually inserted; rows already present (a
/// replayed settlement) are skipped silently.
pub async fn persist_entries<S: EntryStore>(store: &S, entries: &[AccountingEntry]) -> Result<usize, StoreError> {
    let mut inserted = 0;
    for e in entries {
        if store.insert_entry(e).await? == InsertEntryResult::Inserted {
            inserted += 1;
        }
    }
    if inserted < entries.len() {
        info!(
            "🧮️ {} of {} ledger rows already existed for source {}; duplicate settlement skipped",
            entries.len() - inserted,
            entries.len(),
            entries.first().map(|e| e.source_id.as_str()).unwrap_or("?")
        );
    }
    Ok(inserted)
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::test_utils::fixtures::{
        country_fi,
        country_ru,
        merchant_channel_cost,
        merchant_money_back_cost,
        system_channel_cost,
        system_money_back_cost,
        FixedRates,
    };
    use crate::db_types::UndoReason;

    fn money(s: &str) -> Money {
        s.parse().unwrap()
    }

    fn ru_order_input() -> OrderSettlementInput {
        OrderSettlementInput {
            order_id: "ord-0001".into(),
            merchant_id: "merchant-1".into(),
            country: country_ru(),
            origin_currency: "RUB".into(),
            royalty_currency: "RUB".into(),
            total: money("120"),
            tax_amount: money("20"),
            method_name: "card".into(),
            system_costs: vec![system_channel_cost("russia_and_cis", "")],
            merchant_costs: vec![merchant_channel_cost("RUB", "russia_and_cis", "")],
        }
    }

    #[tokio::test]
    async fn same_currency_settlement_waterfall() {
        let ledger = order_settlement(&FixedRates, &ru_order_input()).await.unwrap();
        assert_eq!(ledger.real_gross_revenue, money("120"));
        assert_eq!(ledger.merchant_gross_revenue, money("120"));
        assert_eq!(ledger.ps_gross_revenue_fx, Money::zero());
        assert_eq!(ledger.real_tax_fee, money("20"));
        assert_eq!(ledger.merchant_tax_fee_cost_value, money("20"));
        assert_eq!(ledger.merchant_tax_fee_central_bank_fx, Money::zero());
        assert_eq!(ledger.merchant_tax_fee, money("20"));
        assert_eq!(ledger.ps_method_fee, money("6"));
        assert_eq!(ledger.merchant_method_fee, money("3.6"));
        assert_eq!(ledger.merchant_method_fee_cost_value, money("2.4"));
        assert_eq!(ledger.ps_markup_merchant_method_fee, money("1.2"));
        assert_eq!(ledger.real_merchant_method_fixed_fee, money("1.44"));
        assert_eq!(ledger.merchant_method_fixed_fee, money("1.4688"));
        assert_eq!(ledger.real_merchant_method_fixed_fee_cost_value, money("0.65"));
        assert_eq!(ledger.ps_method_fixed_fee_profit, money("0.79"));
        assert_eq!(ledger.real_merchant_ps_fixed_fee, money("3.6"));
        assert_eq!(ledger.merchant_ps_fixed_fee, money("3.672"));
        assert_eq!(ledger.ps_method_profit, money("6.622"));
        assert_eq!(ledger.merchant_net_revenue, money("90.328"));
        assert_eq!(ledger.ps_profit_total, money("6.622"));
    }

    #[tokio::test]
    async fn settlement_conserves_gross_revenue() {
        let ledger = order_settlement(&FixedRates, &ru_order_input()).await.unwrap();
        let reassembled = ledger.merchant_net_revenue
            + ledger.merchant_ps_fixed_fee
            + ledger.ps_method_fee
            + ledger.merchant_tax_fee
            + ledger.ps_gross_revenue_fx;
        assert_eq!(reassembled, ledger.real_gross_revenue);
    }

    fn fi_order_input() -> OrderSettlementInput {
        OrderSettlementInput {
            order_id: "ord-0002".into(),
            merchant_id: "merchant-1".into(),
            country: country_fi(),
            origin_currency: "RUB".into(),
            royalty_currency: "USD".into(),
            total: money("780"),
            tax_amount: money("130"),
            method_name: "card".into(),
            system_costs: vec![system_channel_cost("eu", "")],
            merchant_costs: vec![merchant_channel_cost("USD", "eu", "")],
        }
    }

    #[tokio::test]
    async fn cross_currency_settlement_with_vat_round_trip() {
        let ledger = order_settlement(&FixedRates, &fi_order_input()).await.unwrap();
        assert_eq!(ledger.real_gross_revenue, money("12"));
        assert_eq!(ledger.merchant_gross_revenue, money("11.76"));
        assert_eq!(ledger.ps_gross_revenue_fx, money("0.24"));
        assert_eq!(ledger.real_tax_fee, money("2"));
        assert_eq!(ledger.merchant_tax_fee_cost_value, money("1.96"));
        assert_eq!(ledger.ps_gross_revenue_fx_tax_fee, money("0.04"));
        assert_eq!(ledger.ps_gross_revenue_fx_profit, money("0.2"));
        // 1.96 USD -> 1.764 EUR -> 1.9644353448 USD: the round trip costs 0.0044353448.
        assert_eq!(ledger.merchant_tax_fee_central_bank_fx, money("0.0044353448"));
        assert_eq!(ledger.merchant_tax_fee, money("1.9644353448"));
        assert_eq!(ledger.ps_method_fee, money("0.588"));
        assert_eq!(ledger.merchant_method_fee, money("0.3528"));
        assert_eq!(ledger.merchant_method_fee_cost_value, money("0.24"));
        assert_eq!(ledger.real_merchant_method_fixed_fee, money("0.0221538462"));
        assert_eq!(ledger.merchant_method_fixed_fee, money("0.0225969231"));
        assert_eq!(ledger.real_merchant_method_fixed_fee_cost_value, money("0.01"));
        assert_eq!(ledger.real_merchant_ps_fixed_fee, money("0.0553846154"));
        assert_eq!(ledger.merchant_ps_fixed_fee, money("0.0564923077"));
        assert_eq!(ledger.ps_method_profit, money("0.3944923077"));
        assert_eq!(ledger.merchant_net_revenue, money("9.1510723475"));
        assert_eq!(ledger.ps_profit_total, money("0.5900569629"));
    }

    #[tokio::test]
    async fn country_specific_cost_row_wins() {
        let mut input = ru_order_input();
        let mut special = merchant_channel_cost("RUB", "russia_and_cis", "RU");
        special.ps_percent = dec!(0.10);
        input.merchant_costs.push(special);
        let ledger = order_settlement(&FixedRates, &input).await.unwrap();
        // The RU row's 10% applies instead of the region-wide 5%.
        assert_eq!(ledger.ps_method_fee, money("12"));
    }

    #[tokio::test]
    async fn missing_cost_row_is_a_precondition_failure() {
        let mut input = ru_order_input();
        input.merchant_costs.clear();
        let err = order_settlement(&FixedRates, &input).await.unwrap_err();
        assert!(matches!(err, AccountingError::CostRateNotFound(..)));
    }

    fn chargeback_input() -> RefundSettlementInput {
        RefundSettlementInput {
            refund_order_id: "rord-0001".into(),
            merchant_id: "merchant-1".into(),
            country: country_fi(),
            origin_currency: "RUB".into(),
            royalty_currency: "USD".into(),
            refund_amount: money("780"),
            order_total: money("780"),
            tax_rate: dec!(0.20),
            is_chargeback: true,
            original_merchant_tax_fee: money("1.9644353448"),
            original_ps_gross_revenue_fx_tax_fee: money("0.04"),
            method_name: "card".into(),
            system_costs: vec![system_money_back_cost("USD", UndoReason::Chargeback, "eu", "")],
            merchant_costs: vec![merchant_money_back_cost("USD", UndoReason::Chargeback, "eu", "", false)],
            days_since_payment: 0,
        }
    }

    #[tokio::test]
    async fn chargeback_waterfall() {
        let ledger = refund_settlement(&FixedRates, &chargeback_input()).await.unwrap();
        assert_eq!(ledger.real_refund, money("12"));
        assert_eq!(ledger.real_refund_tax_fee, money("2"));
        assert_eq!(ledger.real_refund_fee, money("1.2"));
        assert_eq!(ledger.real_refund_fixed_fee, money("0.15"));
        assert_eq!(ledger.merchant_refund, money("12.24"));
        assert_eq!(ledger.ps_merchant_refund_fx, money("0.24"));
        assert_eq!(ledger.merchant_refund_fee, money("2.448"));
        assert_eq!(ledger.ps_markup_merchant_refund_fee, money("1.248"));
        assert_eq!(ledger.merchant_refund_fixed_fee_cost_value, money("0.1661538462"));
        assert_eq!(ledger.merchant_refund_fixed_fee, money("0.1694769231"));
        assert_eq!(ledger.ps_merchant_refund_fixed_fee_profit, money("0.0194769231"));
        assert_eq!(ledger.reverse_tax_fee, money("1.9644353448"));
        assert_eq!(ledger.ps_reverse_tax_fee_delta, money("0.0755646552"));
        assert_eq!(ledger.merchant_reverse_revenue, money("12.8930415783"));
        assert_eq!(ledger.ps_refund_profit, money("1.3430415783"));
    }

    #[tokio::test]
    async fn refund_conserves_real_refund() {
        let ledger = refund_settlement(&FixedRates, &chargeback_input()).await.unwrap();
        let reassembled = ledger.merchant_reverse_revenue + ledger.merchant_reverse_tax_fee
            - ledger.merchant_refund_fixed_fee
            - ledger.merchant_refund_fee
            - ledger.ps_merchant_refund_fx;
        assert_eq!(reassembled, ledger.real_refund);
    }

    #[tokio::test]
    async fn plain_refund_waives_merchant_fees() {
        let mut input = chargeback_input();
        input.is_chargeback = false;
        input.system_costs = vec![system_money_back_cost("USD", UndoReason::Reversal, "eu", "")];
        input.merchant_costs = vec![merchant_money_back_cost("USD", UndoReason::Reversal, "eu", "", false)];
        let ledger = refund_settlement(&FixedRates, &input).await.unwrap();
        assert_eq!(ledger.merchant_refund_fee, Money::zero());
        assert_eq!(ledger.merchant_refund_fixed_fee, Money::zero());
        assert_eq!(ledger.merchant_refund_fixed_fee_cost_value, Money::zero());
        // The markup goes negative: the platform still pays the system fee.
        assert_eq!(ledger.ps_markup_merchant_refund_fee, money("-1.2"));
        assert_eq!(ledger.merchant_reverse_revenue, money("10.2755646552"));
    }

    #[tokio::test]
    async fn reversal_charged_when_tariff_says_so() {
        let mut input = chargeback_input();
        input.is_chargeback = false;
        input.merchant_costs = vec![merchant_money_back_cost("USD", UndoReason::Reversal, "eu", "", true)];
        let ledger = refund_settlement(&FixedRates, &input).await.unwrap();
        assert_eq!(ledger.merchant_refund_fee, money("2.448"));
    }

    #[tokio::test]
    async fn partial_refund_reverses_tax_proportionally() {
        let mut input = chargeback_input();
        input.is_chargeback = false;
        input.refund_amount = money("390");
        input.merchant_costs = vec![merchant_money_back_cost("USD", UndoReason::Reversal, "eu", "", false)];
        let ledger = refund_settlement(&FixedRates, &input).await.unwrap();
        assert_eq!(ledger.real_refund, money("6"));
        assert_eq!(ledger.real_refund_tax_fee, money("1"));
        // Half of the original merchant tax fee is reversed.
        assert_eq!(ledger.reverse_tax_fee, money("0.9822176724"));
        assert_eq!(ledger.merchant_reverse_tax_fee, money("0.9822176724"));
    }

    #[test]
    fn order_ledger_emits_all_entry_types() {
        let scope = LedgerScope {
            source_id: "ord-0001".into(),
            source_kind: EntrySourceKind::Order,
            merchant_id: "merchant-1".into(),
            royalty_currency: "USD".into(),
            origin_currency: "RUB".into(),
            local_currency: "EUR".into(),
            country: "FI".into(),
        };
        let entries = OrderLedger::default().entries(&scope);
        assert_eq!(entries.len(), 26);
        let mut types: Vec<_> = entries.iter().map(|e| e.entry_type).collect();
        types.dedup();
        assert_eq!(types.len(), 26, "every entry type appears exactly once");
        assert!(entries.iter().all(|e| e.source_id == "ord-0001" && e.status == ENTRY_STATUS_AVAILABLE));
    }

    #[test]
    fn refund_ledger_emits_all_entry_types() {
        let scope = LedgerScope {
            source_id: "rord-0001".into(),
            source_kind: EntrySourceKind::Refund,
            merchant_id: "merchant-1".into(),
            royalty_currency: "USD".into(),
            origin_currency: "RUB".into(),
            local_currency: "USD".into(),
            country: "RU".into(),
        };
        let entries = RefundLedger::default().entries(&scope);
        assert_eq!(entries.len(), 18);
        assert!(entries.iter().all(|e| e.source_kind == EntrySourceKind::Refund));
    }
}
