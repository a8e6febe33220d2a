use std::{collections::HashMap, fmt::Display, str::FromStr};

use bpg_common::{Money, Secret};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid value for {0}: {1}")]
pub struct ConversionError(pub &'static str, pub String);

//--------------------------------------      OrderUuid      ---------------------------------------------------------

/// The public, opaque identifier of an order. This is the only order handle ever exposed to
/// payment forms and merchant back-ends; the internal id stays inside the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct OrderUuid(pub String);

impl OrderUuid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for OrderUuid {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for OrderUuid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for OrderUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//--------------------------------------    Order statuses    --------------------------------------------------------

/// Fine-grained internal order state. Drives the state machine; never exposed to customers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PrivateOrderStatus {
    /// Created by the pricing pipeline, nothing submitted to a gateway yet.
    New,
    /// A payment request has been handed to the payment system.
    Pending,
    /// The payment system settled the payment.
    PaymentSystemComplete,
    /// Fulfilment is complete (for example, keys were delivered).
    ProjectComplete,
    /// The payment system declined the payment.
    PaymentSystemDeclined,
    /// The payment was cancelled on the payment system side.
    PaymentSystemCanceled,
    /// Rejected by the platform or the project.
    Rejected,
    /// Fully refunded.
    Refunded,
    /// Reversed by a chargeback.
    Chargeback,
}

impl PrivateOrderStatus {
    pub fn as_str(&self) -> &'static str {
        use PrivateOrderStatus::*;
        match self {
            New => "new",
            Pending => "pending",
            PaymentSystemComplete => "payment_system_complete",
            ProjectComplete => "project_complete",
            PaymentSystemDeclined => "payment_system_declined",
            PaymentSystemCanceled => "payment_system_canceled",
            Rejected => "rejected",
            Refunded => "refunded",
            Chargeback => "chargeback",
        }
    }

    /// The coarse customer-facing projection of this status.
    pub fn public(&self) -> PublicOrderStatus {
        use PrivateOrderStatus::*;
        match self {
            New => PublicOrderStatus::Created,
            Pending => PublicOrderStatus::Pending,
            PaymentSystemComplete => PublicOrderStatus::Paid,
            ProjectComplete => PublicOrderStatus::Processed,
            PaymentSystemDeclined => PublicOrderStatus::Rejected,
            PaymentSystemCanceled => PublicOrderStatus::Canceled,
            Rejected => PublicOrderStatus::Rejected,
            Refunded => PublicOrderStatus::Refunded,
            Chargeback => PublicOrderStatus::Chargeback,
        }
    }

    /// Whether a refund may be raised against an order in this status.
    pub fn is_refundable(&self) -> bool {
        matches!(self, PrivateOrderStatus::PaymentSystemComplete | PrivateOrderStatus::ProjectComplete)
    }
}

impl Display for PrivateOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PrivateOrderStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use PrivateOrderStatus::*;
        match s {
            "new" => Ok(New),
            "pending" => Ok(Pending),
            "payment_system_complete" => Ok(PaymentSystemComplete),
            "project_complete" => Ok(ProjectComplete),
            "payment_system_declined" => Ok(PaymentSystemDeclined),
            "payment_system_canceled" => Ok(PaymentSystemCanceled),
            "rejected" => Ok(Rejected),
            "refunded" => Ok(Refunded),
            "chargeback" => Ok(Chargeback),
            other => Err(ConversionError("order status", other.to_string())),
        }
    }
}

/// Coarse customer-facing order state. Merchant notifications fire on transitions of this
/// projection, never on private-status churn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PublicOrderStatus {
    Created,
    Pending,
    Paid,
    Processed,
    Canceled,
    Rejected,
    Refunded,
    Chargeback,
}

impl PublicOrderStatus {
    pub fn as_str(&self) -> &'static str {
        use PublicOrderStatus::*;
        match self {
            Created => "created",
            Pending => "pending",
            Paid => "paid",
            Processed => "processed",
            Canceled => "canceled",
            Rejected => "rejected",
            Refunded => "refunded",
            Chargeback => "chargeback",
        }
    }

    /// Statuses that are not interesting to the merchant yet. No side effects fire while the
    /// public status stays in this set.
    pub fn is_preliminary(&self) -> bool {
        matches!(self, PublicOrderStatus::Created | PublicOrderStatus::Pending)
    }
}

impl Display for PublicOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//--------------------------------------     RefundStatus     --------------------------------------------------------

/// Refund lifecycle state. The numeric discriminants are part of the stored and reported format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[repr(i32)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Created = 0,
    Rejected = 1,
    InProgress = 2,
    Completed = 3,
    PaymentSystemDeclined = 4,
    PaymentSystemCanceled = 5,
}

impl RefundStatus {
    /// Whether this refund still counts towards the order's refunded total. Rejected and
    /// declined refunds free their amount up again.
    pub fn counts_towards_refunded(&self) -> bool {
        !matches!(
            self,
            RefundStatus::Rejected | RefundStatus::PaymentSystemDeclined | RefundStatus::PaymentSystemCanceled
        )
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, RefundStatus::Created | RefundStatus::InProgress)
    }
}

impl Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use RefundStatus::*;
        let s = match self {
            Created => "created",
            Rejected => "rejected",
            InProgress => "in_progress",
            Completed => "completed",
            PaymentSystemDeclined => "payment_system_declined",
            PaymentSystemCanceled => "payment_system_canceled",
        };
        write!(f, "{s}")
    }
}

//--------------------------------------    Order sub-types   --------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Order,
    Refund,
}

impl Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Order => write!(f, "order"),
            OrderType::Refund => write!(f, "refund"),
        }
    }
}

/// What is being sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    /// An arbitrary amount set by the caller.
    Simple,
    /// A bundle of catalog products.
    Product,
    /// A bundle of game keys, delivered per platform.
    Key,
    /// Units of the project's virtual currency.
    VirtualCurrency,
}

impl Display for ProductType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductType::Simple => write!(f, "simple"),
            ProductType::Product => write!(f, "product"),
            ProductType::Key => write!(f, "key"),
            ProductType::VirtualCurrency => write!(f, "virtual_currency"),
        }
    }
}

impl FromStr for ProductType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(Self::Simple),
            "product" => Ok(Self::Product),
            "key" => Ok(Self::Key),
            "virtual_currency" => Ok(Self::VirtualCurrency),
            other => Err(ConversionError("product type", other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxType {
    Vat,
    SalesTax,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTax {
    pub tax_type: TaxType,
    /// Fractional rate, e.g. `0.20` for 20% VAT.
    pub rate: Decimal,
    pub amount: Money,
    pub currency: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub country: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderUser {
    pub id: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub address: Option<Address>,
    /// Set when the declared country contradicts the geo-resolved one; the payment form must ask
    /// the payer to confirm their billing address before a payment can be created.
    #[serde(default)]
    pub address_data_required: bool,
}

/// Snapshot of the relevant project fields at order-creation time. The live project record can
/// change after checkout; settled orders keep the terms they were created under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderProject {
    pub id: String,
    pub merchant_id: String,
    pub name: String,
    #[serde(default)]
    pub notify_url: Option<String>,
    #[serde(default)]
    pub redirect_success_url: Option<String>,
    #[serde(default)]
    pub redirect_fail_url: Option<String>,
    pub callback_protocol: CallbackProtocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackProtocol {
    Empty,
    Default,
}

impl Default for CallbackProtocol {
    fn default() -> Self {
        CallbackProtocol::Empty
    }
}

/// The payment method chosen for an order, denormalised from the method catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPaymentMethod {
    pub id: String,
    pub name: String,
    /// Gateway handler alias, e.g. `cardpay`.
    pub handler: String,
    /// Identifier of the method on the payment system side, e.g. `BANKCARD`.
    pub external_id: String,
    pub kind: PaymentMethodKind,
    /// True when the payer asked for the card to be stored for recurring use.
    #[serde(default)]
    pub saved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodKind {
    BankCard,
    EWallet,
    Crypto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    #[serde(default)]
    pub sku: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub amount: Money,
    pub currency: String,
    #[serde(default)]
    pub platform_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderIssuer {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub embedded: bool,
    #[serde(default)]
    pub reference: Option<String>,
}

/// Summary of the refund that produced a synthetic refund order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRefundSummary {
    pub refund_id: String,
    pub amount: Money,
    pub currency: String,
    pub is_chargeback: bool,
    pub reason: String,
}

//--------------------------------------        Order         --------------------------------------------------------

/// The central entity of the platform. Created by the pricing pipeline, mutated only through the
/// lifecycle manager's `update_order` gate, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub uuid: OrderUuid,
    pub order_type: OrderType,
    pub product_type: ProductType,
    pub project: OrderProject,
    /// The merchant-supplied order identifier, unique per project.
    #[serde(default)]
    pub project_order_id: Option<String>,
    #[serde(default)]
    pub description: String,
    /// The net amount before tax, in [`Order::currency`].
    pub order_amount: Money,
    /// `order_amount + tax.amount`. What the customer is actually charged.
    pub total_payment_amount: Money,
    pub charge_amount: Money,
    pub currency: String,
    #[serde(default)]
    pub tax: Option<OrderTax>,
    pub user: OrderUser,
    #[serde(default)]
    pub billing_address: Option<Address>,
    #[serde(default)]
    pub payment_method: Option<OrderPaymentMethod>,
    /// Method-specific requisites captured at payment time (masked PAN, wallet account, …).
    #[serde(default)]
    pub payment_requisites: HashMap<String, String>,
    /// Transaction parameters reported by the gateway callback.
    #[serde(default)]
    pub transaction: HashMap<String, String>,
    pub private_status: PrivateOrderStatus,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub platform_id: Option<String>,
    #[serde(default)]
    pub virtual_currency_amount: Option<Money>,
    #[serde(default)]
    pub issuer: OrderIssuer,
    /// Which public statuses the merchant has been successfully notified about.
    #[serde(default)]
    pub is_notifications_sent: HashMap<String, bool>,
    #[serde(default)]
    pub receipt_id: Option<String>,
    /// On synthetic refund orders, the id of the original order.
    #[serde(default)]
    pub parent_order_id: Option<String>,
    #[serde(default)]
    pub refund: Option<OrderRefundSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
    #[serde(default)]
    pub refunded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub canceled_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency token. Incremented on every successful update.
    pub version: i64,
}

impl Order {
    pub fn public_status(&self) -> PublicOrderStatus {
        self.private_status.public()
    }

    pub fn is_expired(&self) -> bool {
        self.private_status == PrivateOrderStatus::New && self.expire_at < Utc::now()
    }

    pub fn can_be_refunded(&self) -> bool {
        self.order_type == OrderType::Order && self.private_status.is_refundable()
    }

    /// The tax portion of the total, or zero when no tax applies.
    pub fn tax_amount(&self) -> Money {
        self.tax.as_ref().map(|t| t.amount).unwrap_or_else(Money::zero)
    }

    pub fn tax_rate(&self) -> Decimal {
        self.tax.as_ref().map(|t| t.rate).unwrap_or_default()
    }

    pub fn set_notification_status(&mut self, status: PublicOrderStatus, sent: bool) {
        self.is_notifications_sent.insert(status.as_str().to_string(), sent);
    }

    /// The user's effective country: the confirmed billing address wins over the declared or
    /// geo-resolved one.
    pub fn country(&self) -> Option<&str> {
        self.billing_address
            .as_ref()
            .map(|a| a.country.as_str())
            .or_else(|| self.user.address.as_ref().map(|a| a.country.as_str()))
            .filter(|c| !c.is_empty())
    }

    /// Expiry window granted to a new order for the payer to complete the form.
    pub fn expiry_from(created_at: DateTime<Utc>, lifetime_secs: i64) -> DateTime<Utc> {
        created_at + Duration::seconds(lifetime_secs)
    }
}

//--------------------------------------        Refund        --------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundOrderRef {
    pub id: String,
    pub uuid: OrderUuid,
}

/// A full or partial reversal of an order, or a chargeback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    /// Identifier assigned by the payment system once the refund is accepted.
    #[serde(default)]
    pub external_id: Option<String>,
    pub order_ref: RefundOrderRef,
    pub amount: Money,
    pub currency: String,
    pub status: RefundStatus,
    pub creator_id: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub is_chargeback: bool,
    /// The synthetic refund order spawned when this refund completed.
    #[serde(default)]
    pub created_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

//--------------------------------------   AccountingEntry    --------------------------------------------------------

/// What a ledger row is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntrySourceKind {
    Order,
    Refund,
    Merchant,
}

impl Display for EntrySourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntrySourceKind::Order => write!(f, "order"),
            EntrySourceKind::Refund => write!(f, "refund"),
            EntrySourceKind::Merchant => write!(f, "merchant"),
        }
    }
}

/// The closed set of named money-flow components. Every settlement or reversal produces one row
/// per applicable member; the `(source, type)` pair is unique per settlement event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccountingEntryType {
    // Order settlement.
    RealGrossRevenue,
    RealTaxFee,
    CentralBankTaxFee,
    RealTaxFeeTotal,
    PsGrossRevenueFx,
    PsGrossRevenueFxTaxFee,
    PsGrossRevenueFxProfit,
    MerchantGrossRevenue,
    MerchantTaxFeeCostValue,
    MerchantTaxFeeCentralBankFx,
    MerchantTaxFee,
    PsMethodFee,
    MerchantMethodFee,
    MerchantMethodFeeCostValue,
    PsMarkupMerchantMethodFee,
    MerchantMethodFixedFee,
    RealMerchantMethodFixedFee,
    MarkupMerchantMethodFixedFeeFx,
    RealMerchantMethodFixedFeeCostValue,
    PsMethodFixedFeeProfit,
    MerchantPsFixedFee,
    RealMerchantPsFixedFee,
    MarkupMerchantPsFixedFee,
    PsMethodProfit,
    MerchantNetRevenue,
    PsProfitTotal,
    // Refund / chargeback reversal.
    RealRefund,
    RealRefundTaxFee,
    RealRefundFee,
    RealRefundFixedFee,
    MerchantRefund,
    PsMerchantRefundFx,
    MerchantRefundFee,
    PsMarkupMerchantRefundFee,
    MerchantRefundFixedFeeCostValue,
    MerchantRefundFixedFee,
    PsMerchantRefundFixedFeeFx,
    PsMerchantRefundFixedFeeProfit,
    ReverseTaxFee,
    ReverseTaxFeeDelta,
    PsReverseTaxFeeDelta,
    MerchantReverseTaxFee,
    MerchantReverseRevenue,
    PsRefundProfit,
}

pub const ENTRY_STATUS_AVAILABLE: &str = "available";

/// One immutable ledger row. Amounts are carried in three currencies: `amount` in the merchant's
/// royalty currency, `original_amount` in the currency the component arose in, and `local_amount`
/// in the VAT currency of the order's country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AccountingEntry {
    pub id: String,
    pub entry_type: AccountingEntryType,
    pub source_id: String,
    pub source_kind: EntrySourceKind,
    pub merchant_id: String,
    pub amount: Money,
    pub currency: String,
    pub original_amount: Money,
    pub original_currency: String,
    pub local_amount: Money,
    pub local_currency: String,
    pub country: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------    Reference data    --------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Draft,
    InProduction,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellCountType {
    Fractional,
    Integral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPrice {
    pub region: String,
    pub currency: String,
    pub amount: Money,
}

/// Virtual-currency settings of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectVirtualCurrency {
    pub name: String,
    pub sell_count_type: SellCountType,
    #[serde(default)]
    pub min_purchase_value: Option<Decimal>,
    #[serde(default)]
    pub max_purchase_value: Option<Decimal>,
    /// Price of one unit, per currency.
    pub prices: Vec<ProductPrice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub merchant_id: String,
    pub name: String,
    pub status: ProjectStatus,
    pub secret_key: Secret<String>,
    #[serde(default)]
    pub signature_required: bool,
    #[serde(default)]
    pub allow_dynamic_notify_urls: bool,
    #[serde(default)]
    pub allow_dynamic_redirect_urls: bool,
    #[serde(default)]
    pub min_payment_amount: Option<Money>,
    #[serde(default)]
    pub max_payment_amount: Option<Money>,
    /// Currency the project limits are expressed in, when it differs from the order currency.
    #[serde(default)]
    pub limits_currency: Option<String>,
    pub callback_protocol: CallbackProtocol,
    #[serde(default)]
    pub notify_url: Option<String>,
    #[serde(default)]
    pub redirect_success_url: Option<String>,
    #[serde(default)]
    pub redirect_fail_url: Option<String>,
    #[serde(default)]
    pub virtual_currency: Option<ProjectVirtualCurrency>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn is_deleted(&self) -> bool {
        self.status == ProjectStatus::Deleted
    }

    pub fn can_process_payments(&self) -> bool {
        self.status == ProjectStatus::InProduction
    }

    /// The order snapshot of this project, with any permitted dynamic URL overrides applied.
    pub fn order_snapshot(&self) -> OrderProject {
        OrderProject {
            id: self.id.clone(),
            merchant_id: self.merchant_id.clone(),
            name: self.name.clone(),
            notify_url: self.notify_url.clone(),
            redirect_success_url: self.redirect_success_url.clone(),
            redirect_fail_url: self.redirect_fail_url.clone(),
            callback_protocol: self.callback_protocol,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MerchantStatus {
    Draft,
    AgreementSigned,
    Deleted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Merchant {
    pub id: String,
    pub company_name: String,
    /// The royalty currency: what the platform pays this merchant out in.
    pub payout_currency: String,
    pub status: MerchantStatus,
    /// False until the merchant's fee tariffs have been provisioned. Orders cannot be created
    /// against a merchant without tariffs.
    pub has_tariff: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Merchant {
    pub fn is_deleted(&self) -> bool {
        self.status == MerchantStatus::Deleted
    }
}

/// Per-currency production settings of a payment method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodCurrencySettings {
    pub terminal_id: String,
    pub secret: Secret<String>,
    pub secret_callback: Secret<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSystem {
    pub id: String,
    pub name: String,
    pub handler: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: String,
    pub name: String,
    /// Identifier of the method on the payment system side, e.g. `BANKCARD`.
    pub external_id: String,
    /// Gateway handler alias, e.g. `cardpay`.
    pub handler: String,
    pub kind: PaymentMethodKind,
    pub is_active: bool,
    pub payment_system: PaymentSystem,
    pub min_payment_amount: Money,
    pub max_payment_amount: Money,
    /// Validation pattern for externally entered accounts (e-wallet ids, card PANs).
    #[serde(default)]
    pub account_regexp: Option<String>,
    /// Keyed by currency code.
    #[serde(default)]
    pub settings: HashMap<String, MethodCurrencySettings>,
}

impl PaymentMethod {
    pub fn settings_for(&self, currency: &str) -> Option<&MethodCurrencySettings> {
        self.settings.get(currency)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    pub iso_code: String,
    pub region: String,
    pub currency: String,
    pub payments_allowed: bool,
    /// Whether the payer may change their billing country on the payment form.
    pub change_allowed: bool,
    pub vat_enabled: bool,
    #[serde(default)]
    pub vat_currency: Option<String>,
    pub price_group_id: String,
    /// Country-level levy applied on top of VAT. Zero for almost every country.
    #[serde(default)]
    pub central_bank_tax_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceGroup {
    pub id: String,
    pub region: String,
    pub currency: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub merchant_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub enabled: bool,
    pub default_currency: String,
    pub prices: Vec<ProductPrice>,
    /// Platforms this product's keys are available for. Empty for non-key products.
    #[serde(default)]
    pub platforms: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn price_in(&self, currency: &str) -> Option<Money> {
        self.prices.iter().find(|p| p.currency == currency).map(|p| p.amount)
    }
}

/// Card BIN reference record. Resolves the first card digits into brand and issuer data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BinRecord {
    pub card_bin: i64,
    pub card_brand: String,
    pub card_type: String,
    pub card_category: String,
    pub bank_name: String,
    pub bank_country_iso: String,
}

//--------------------------------------      Cost tables     --------------------------------------------------------

/// Why money is being pulled back from a settled order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UndoReason {
    Reversal,
    Chargeback,
}

impl Display for UndoReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UndoReason::Reversal => write!(f, "reversal"),
            UndoReason::Chargeback => write!(f, "chargeback"),
        }
    }
}

/// What the upstream payment system charges the platform for a payment channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentChannelCostSystem {
    pub id: String,
    pub name: String,
    pub region: String,
    /// Empty string marks the region-wide row; country-specific rows take precedence.
    pub country: String,
    pub percent: Decimal,
    pub fix_amount: Money,
    pub fix_amount_currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the platform charges a merchant for a payment channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentChannelCostMerchant {
    pub id: String,
    pub merchant_id: String,
    pub name: String,
    pub payout_currency: String,
    /// The row applies to orders of at least this amount (in payout currency).
    pub min_amount: Money,
    pub region: String,
    pub country: String,
    pub method_percent: Decimal,
    pub method_fix_amount: Money,
    pub method_fix_amount_currency: String,
    pub ps_percent: Decimal,
    pub ps_fixed_fee: Money,
    pub ps_fixed_fee_currency: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the upstream payment system charges the platform for a reversal or chargeback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoneyBackCostSystem {
    pub id: String,
    pub name: String,
    pub payout_currency: String,
    pub undo_reason: UndoReason,
    pub region: String,
    pub country: String,
    /// The row applies from this many days after the original payment.
    pub days_from: i32,
    pub payment_stage: i32,
    pub percent: Decimal,
    /// Fixed fee, in the payout currency.
    pub fix_amount: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the platform charges a merchant for a reversal or chargeback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoneyBackCostMerchant {
    pub id: String,
    pub merchant_id: String,
    pub name: String,
    pub payout_currency: String,
    pub undo_reason: UndoReason,
    pub region: String,
    pub country: String,
    pub days_from: i32,
    pub payment_stage: i32,
    pub percent: Decimal,
    pub fix_amount: Money,
    pub fix_amount_currency: String,
    /// When false, the punitive fee is waived for plain reversals and only charged on
    /// chargebacks.
    pub is_paid_by_merchant: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
