//! Reference-data fixtures and collaborator fakes shared by the engine tests.
//!
//! The fixture economy is deliberately small and round: a RUB/USD stock rate of 65, a 2% merchant
//! spread, a 2%+0.65 system channel tariff, a 3%+1.44 / 5%+3.6 merchant channel tariff and
//! 10%+0.15 / 20%+10.8 money-back tariffs. The accounting tests assert exact ledger values
//! derived from these numbers.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use bpg_common::{Money, Secret};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::{
    db_types::{
        Address,
        BinRecord,
        CallbackProtocol,
        Country,
        Merchant,
        MerchantStatus,
        MethodCurrencySettings,
        MoneyBackCostMerchant,
        MoneyBackCostSystem,
        Order,
        OrderIssuer,
        OrderPaymentMethod,
        OrderTax,
        OrderType,
        OrderUser,
        OrderUuid,
        PaymentChannelCostMerchant,
        PaymentChannelCostSystem,
        PaymentMethod,
        PaymentMethodKind,
        PaymentSystem,
        PriceGroup,
        PrivateOrderStatus,
        Product,
        ProductPrice,
        ProductType,
        Project,
        ProjectStatus,
        Refund,
        RefundOrderRef,
        RefundStatus,
        TaxType,
        UndoReason,
    },
    traits::{
        CatalogError,
        CatalogLookup,
        ConversionSide,
        CostRateError,
        CostRates,
        CurrencyExchange,
        ExchangeError,
        GatewayError,
        GatewayPaymentRequest,
        GatewayPaymentSession,
        GatewayRefundAccepted,
        GatewayRefundRequest,
        GeoError,
        GeoIp,
        GeoLocation,
        CardVault,
        CardVaultError,
        KeyInventory,
        KeyInventoryError,
        Notifier,
        NotifyError,
        PaymentGatewayClient,
        RateSource,
        ResolvedTax,
        TaxError,
        TaxRates,
    },
};

//--------------------------------------     Exchange fake    --------------------------------------------------------

/// A fixed exchange-rate table. Stock RUB/USD at 65; merchant spread of 2% (reduced on `Credit`
/// for cross-currency conversions, added on `Debit` always); central-bank USD/EUR and USD/RUB
/// pairs with a realistic asymmetry.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedRates;

impl FixedRates {
    fn stock(from: &str, to: &str, amount: Money) -> Result<Money, ExchangeError> {
        match (from, to) {
            _ if from == to => Ok(amount),
            ("RUB", "USD") => Ok(amount / dec!(65)),
            ("USD", "RUB") => Ok(amount * dec!(65)),
            ("RUB", "EUR") => Ok(amount / dec!(72)),
            ("EUR", "RUB") => Ok(amount * dec!(72)),
            ("USD", "EUR") => Ok(amount * dec!(0.92)),
            ("EUR", "USD") => Ok(amount / dec!(0.92)),
            _ => Err(ExchangeError::RateNotAvailable(from.to_string(), to.to_string())),
        }
    }

    fn central_bank(from: &str, to: &str, amount: Money) -> Result<Money, ExchangeError> {
        match (from, to) {
            _ if from == to => Ok(amount),
            ("USD", "EUR") => Ok(amount * dec!(0.9)),
            ("EUR", "USD") => Ok(amount * dec!(1.1136254789)),
            ("USD", "RUB") => Ok(amount * dec!(65.5)),
            ("RUB", "USD") => Ok(amount * dec!(0.0459375)),
            ("EUR", "RUB") => Ok(amount * dec!(72.5)),
            ("RUB", "EUR") => Ok(amount * dec!(0.0136)),
            _ => Err(ExchangeError::RateNotAvailable(from.to_string(), to.to_string())),
        }
    }
}

impl CurrencyExchange for FixedRates {
    async fn convert(&self, from: &str, to: &str, amount: Money, source: RateSource) -> Result<Money, ExchangeError> {
        match source {
            RateSource::Stock => Self::stock(from, to, amount),
            RateSource::CentralBank => Self::central_bank(from, to, amount),
        }
    }

    async fn convert_for_merchant(
        &self,
        from: &str,
        to: &str,
        amount: Money,
        side: ConversionSide,
    ) -> Result<Money, ExchangeError> {
        let at_stock = Self::stock(from, to, amount)?;
        match side {
            ConversionSide::Credit if from == to => Ok(at_stock),
            ConversionSide::Credit => Ok(at_stock * dec!(0.98)),
            ConversionSide::Debit => Ok(at_stock * dec!(1.02)),
        }
    }
}

//--------------------------------------    Reference rows    --------------------------------------------------------

pub fn country_ru() -> Country {
    Country {
        iso_code: "RU".into(),
        region: "russia_and_cis".into(),
        currency: "RUB".into(),
        payments_allowed: true,
        change_allowed: true,
        vat_enabled: true,
        vat_currency: Some("RUB".into()),
        price_group_id: "pg-rub".into(),
        central_bank_tax_rate: Decimal::ZERO,
    }
}

pub fn country_fi() -> Country {
    Country {
        iso_code: "FI".into(),
        region: "eu".into(),
        currency: "EUR".into(),
        payments_allowed: true,
        change_allowed: true,
        vat_enabled: true,
        vat_currency: Some("EUR".into()),
        price_group_id: "pg-usd".into(),
        central_bank_tax_rate: Decimal::ZERO,
    }
}

pub fn country_by() -> Country {
    Country {
        iso_code: "BY".into(),
        region: "russia_and_cis".into(),
        currency: "BYN".into(),
        payments_allowed: false,
        change_allowed: false,
        vat_enabled: false,
        vat_currency: None,
        price_group_id: "pg-rub".into(),
        central_bank_tax_rate: Decimal::ZERO,
    }
}

pub fn system_channel_cost(region: &str, country: &str) -> PaymentChannelCostSystem {
    PaymentChannelCostSystem {
        id: format!("pccs-{region}-{country}"),
        name: "card".into(),
        region: region.into(),
        country: country.into(),
        percent: dec!(0.02),
        fix_amount: "0.65".parse().unwrap(),
        fix_amount_currency: "RUB".into(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn merchant_channel_cost(payout_currency: &str, region: &str, country: &str) -> PaymentChannelCostMerchant {
    PaymentChannelCostMerchant {
        id: format!("pccm-{region}-{country}"),
        merchant_id: "merchant-1".into(),
        name: "card".into(),
        payout_currency: payout_currency.into(),
        min_amount: Money::zero(),
        region: region.into(),
        country: country.into(),
        method_percent: dec!(0.03),
        method_fix_amount: "1.44".parse().unwrap(),
        method_fix_amount_currency: "RUB".into(),
        ps_percent: dec!(0.05),
        ps_fixed_fee: "3.6".parse().unwrap(),
        ps_fixed_fee_currency: "RUB".into(),
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn system_money_back_cost(
    payout_currency: &str,
    undo_reason: UndoReason,
    region: &str,
    country: &str,
) -> MoneyBackCostSystem {
    MoneyBackCostSystem {
        id: format!("mbcs-{region}-{country}-{undo_reason}"),
        name: "card".into(),
        payout_currency: payout_currency.into(),
        undo_reason,
        region: region.into(),
        country: country.into(),
        days_from: 0,
        payment_stage: 1,
        percent: dec!(0.10),
        fix_amount: "0.15".parse().unwrap(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn merchant_money_back_cost(
    payout_currency: &str,
    undo_reason: UndoReason,
    region: &str,
    country: &str,
    is_paid_by_merchant: bool,
) -> MoneyBackCostMerchant {
    MoneyBackCostMerchant {
        id: format!("mbcm-{region}-{country}-{undo_reason}"),
        merchant_id: "merchant-1".into(),
        name: "card".into(),
        payout_currency: payout_currency.into(),
        undo_reason,
        region: region.into(),
        country: country.into(),
        days_from: 0,
        payment_stage: 1,
        percent: dec!(0.20),
        fix_amount: "10.8".parse().unwrap(),
        fix_amount_currency: "RUB".into(),
        is_paid_by_merchant,
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn merchant(payout_currency: &str) -> Merchant {
    Merchant {
        id: "merchant-1".into(),
        company_name: "Unit Test Games Ltd".into(),
        payout_currency: payout_currency.into(),
        status: MerchantStatus::AgreementSigned,
        has_tariff: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn project() -> Project {
    Project {
        id: "project-1".into(),
        merchant_id: "merchant-1".into(),
        name: "Unit Test Game".into(),
        status: ProjectStatus::InProduction,
        secret_key: Secret::new("project-secret".to_string()),
        signature_required: false,
        allow_dynamic_notify_urls: true,
        allow_dynamic_redirect_urls: true,
        min_payment_amount: Some("1".parse().unwrap()),
        max_payment_amount: Some("100000".parse().unwrap()),
        limits_currency: None,
        callback_protocol: CallbackProtocol::Default,
        notify_url: Some("https://merchant.example.com/notify".into()),
        redirect_success_url: Some("https://merchant.example.com/ok".into()),
        redirect_fail_url: Some("https://merchant.example.com/fail".into()),
        virtual_currency: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn card_method() -> PaymentMethod {
    let mut settings = HashMap::new();
    for currency in ["RUB", "USD", "EUR"] {
        settings.insert(currency.to_string(), MethodCurrencySettings {
            terminal_id: format!("terminal-{currency}"),
            secret: Secret::new(format!("secret-{currency}")),
            secret_callback: Secret::new(format!("secret-callback-{currency}")),
        });
    }
    PaymentMethod {
        id: "method-card".into(),
        name: "Bank card".into(),
        external_id: "BANKCARD".into(),
        handler: "cardpay".into(),
        kind: PaymentMethodKind::BankCard,
        is_active: true,
        payment_system: PaymentSystem {
            id: "ps-cardpay".into(),
            name: "CardPay".into(),
            handler: "cardpay".into(),
            is_active: true,
        },
        min_payment_amount: "1".parse().unwrap(),
        max_payment_amount: "100000".parse().unwrap(),
        account_regexp: Some(r"^\d{13,19}$".into()),
        settings,
    }
}

pub fn product(id: &str, rub_price: &str, usd_price: &str) -> Product {
    Product {
        id: id.into(),
        merchant_id: "merchant-1".into(),
        project_id: Some("project-1".into()),
        sku: format!("sku-{id}"),
        name: format!("Product {id}"),
        description: String::new(),
        enabled: true,
        default_currency: "USD".into(),
        prices: vec![
            ProductPrice { region: "russia_and_cis".into(), currency: "RUB".into(), amount: rub_price.parse().unwrap() },
            ProductPrice { region: "default".into(), currency: "USD".into(), amount: usd_price.parse().unwrap() },
        ],
        platforms: vec!["steam".into(), "gog".into()],
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// A settled-ready RUB order: 100 net + 20 VAT, card method selected, pending at the gateway.
pub fn new_order_fixture() -> Order {
    let created_at = Utc::now();
    let project = project();
    Order {
        id: "order-1".into(),
        uuid: OrderUuid("uuid-order-1".into()),
        order_type: OrderType::Order,
        product_type: ProductType::Simple,
        project: project.order_snapshot(),
        project_order_id: Some("ext-order-1".into()),
        description: "Test purchase".into(),
        order_amount: "100".parse().unwrap(),
        total_payment_amount: "120".parse().unwrap(),
        charge_amount: "120".parse().unwrap(),
        currency: "RUB".into(),
        tax: Some(OrderTax {
            tax_type: TaxType::Vat,
            rate: dec!(0.20),
            amount: "20".parse().unwrap(),
            currency: "RUB".into(),
        }),
        user: OrderUser {
            id: "user-1".into(),
            external_id: Some("player-77".into()),
            email: Some("payer@example.com".into()),
            ip: Some("127.0.0.1".into()),
            locale: Some("ru".into()),
            address: Some(Address { country: "RU".into(), ..Default::default() }),
            address_data_required: false,
        },
        billing_address: Some(Address { country: "RU".into(), postal_code: Some("190000".into()), ..Default::default() }),
        payment_method: Some(OrderPaymentMethod {
            id: "method-card".into(),
            name: "Bank card".into(),
            handler: "cardpay".into(),
            external_id: "BANKCARD".into(),
            kind: PaymentMethodKind::BankCard,
            saved: false,
        }),
        payment_requisites: HashMap::new(),
        transaction: HashMap::new(),
        private_status: PrivateOrderStatus::Pending,
        items: Vec::new(),
        platform_id: None,
        virtual_currency_amount: None,
        issuer: OrderIssuer::default(),
        is_notifications_sent: HashMap::new(),
        receipt_id: None,
        parent_order_id: None,
        refund: None,
        created_at,
        updated_at: created_at,
        expire_at: Order::expiry_from(created_at, 1800),
        refunded_at: None,
        canceled_at: None,
        version: 1,
    }
}

pub fn new_refund_fixture(id: &str, order_id: &str, amount: &str) -> Refund {
    Refund {
        id: id.into(),
        external_id: None,
        order_ref: RefundOrderRef { id: order_id.into(), uuid: OrderUuid(format!("uuid-{order_id}")) },
        amount: amount.parse().unwrap(),
        currency: "RUB".into(),
        status: RefundStatus::InProgress,
        creator_id: "merchant-1".into(),
        reason: "customer request".into(),
        is_chargeback: false,
        created_order_id: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        version: 1,
    }
}

//--------------------------------------   Directory fake     --------------------------------------------------------

/// Duplicates each tariff row under the `visa` channel name, since the flows resolve the cost
/// channel through the card brand for card payments while the accounting tests use `card`.
fn with_brand_rows<T: Clone>(rows: Vec<T>, set_name: impl Fn(&mut T, String)) -> Vec<T> {
    let mut all = rows.clone();
    for row in rows {
        let mut branded = row;
        set_name(&mut branded, "visa".to_string());
        all.push(branded);
    }
    all
}

/// One type implementing all reference-data traits, so the APIs' `R` parameter resolves to a
/// single fake in tests.
#[derive(Debug, Clone)]
pub struct TestDirectory {
    pub projects: Vec<Project>,
    pub merchants: Vec<Merchant>,
    pub methods: Vec<PaymentMethod>,
    pub countries: Vec<Country>,
    pub price_groups: Vec<PriceGroup>,
    pub products: Vec<Product>,
    pub bins: Vec<BinRecord>,
    pub channel_costs_system: Vec<PaymentChannelCostSystem>,
    pub channel_costs_merchant: Vec<PaymentChannelCostMerchant>,
    pub money_back_system: Vec<MoneyBackCostSystem>,
    pub money_back_merchant: Vec<MoneyBackCostMerchant>,
    /// Fractional VAT rate per country iso code.
    pub tax_rates: HashMap<String, Decimal>,
    /// IP prefix to country resolution for the geo fake.
    pub geo: HashMap<String, GeoLocation>,
}

impl Default for TestDirectory {
    fn default() -> Self {
        Self::with_payout_currency("RUB")
    }
}

impl TestDirectory {
    /// A complete consistent directory: one project, one merchant paying out in
    /// `payout_currency`, a card method, RU/FI/BY countries and the fixture tariffs.
    pub fn with_payout_currency(payout_currency: &str) -> Self {
        let mut tax_rates = HashMap::new();
        tax_rates.insert("RU".to_string(), dec!(0.20));
        tax_rates.insert("FI".to_string(), dec!(0.20));
        let mut geo = HashMap::new();
        geo.insert("127.0.0".to_string(), GeoLocation {
            country: "RU".into(),
            city: Some("St Petersburg".into()),
            postal_code: Some("190000".into()),
            state: None,
        });
        Self {
            projects: vec![project()],
            merchants: vec![merchant(payout_currency)],
            methods: vec![card_method()],
            countries: vec![country_ru(), country_fi(), country_by()],
            price_groups: vec![
                PriceGroup { id: "pg-rub".into(), region: "russia_and_cis".into(), currency: "RUB".into(), is_active: true },
                PriceGroup { id: "pg-usd".into(), region: "default".into(), currency: "USD".into(), is_active: true },
            ],
            products: vec![product("prod-1", "650", "10")],
            bins: vec![BinRecord {
                card_bin: 400000,
                card_brand: "VISA".into(),
                card_type: "debit".into(),
                card_category: "classic".into(),
                bank_name: "Test Issuer Bank".into(),
                bank_country_iso: "RU".into(),
            }],
            channel_costs_system: with_brand_rows(
                vec![system_channel_cost("russia_and_cis", ""), system_channel_cost("eu", "")],
                |c, name| c.name = name,
            ),
            channel_costs_merchant: with_brand_rows(
                vec![
                    merchant_channel_cost(payout_currency, "russia_and_cis", ""),
                    merchant_channel_cost(payout_currency, "eu", ""),
                ],
                |c, name| c.name = name,
            ),
            money_back_system: with_brand_rows(
                vec![
                    system_money_back_cost(payout_currency, UndoReason::Reversal, "russia_and_cis", ""),
                    system_money_back_cost(payout_currency, UndoReason::Chargeback, "russia_and_cis", ""),
                    system_money_back_cost(payout_currency, UndoReason::Reversal, "eu", ""),
                    system_money_back_cost(payout_currency, UndoReason::Chargeback, "eu", ""),
                ],
                |c, name| c.name = name,
            ),
            money_back_merchant: with_brand_rows(
                vec![
                    merchant_money_back_cost(payout_currency, UndoReason::Reversal, "russia_and_cis", "", false),
                    merchant_money_back_cost(payout_currency, UndoReason::Chargeback, "russia_and_cis", "", false),
                    merchant_money_back_cost(payout_currency, UndoReason::Reversal, "eu", "", false),
                    merchant_money_back_cost(payout_currency, UndoReason::Chargeback, "eu", "", false),
                ],
                |c, name| c.name = name,
            ),
            tax_rates,
            geo,
        }
    }
}

impl CatalogLookup for TestDirectory {
    async fn fetch_project(&self, id: &str) -> Result<Option<Project>, CatalogError> {
        Ok(self.projects.iter().find(|p| p.id == id).cloned())
    }

    async fn fetch_merchant(&self, id: &str) -> Result<Option<Merchant>, CatalogError> {
        Ok(self.merchants.iter().find(|m| m.id == id).cloned())
    }

    async fn fetch_payment_method(&self, id: &str) -> Result<Option<PaymentMethod>, CatalogError> {
        Ok(self.methods.iter().find(|m| m.id == id).cloned())
    }

    async fn fetch_payment_methods_for_currency(&self, currency: &str) -> Result<Vec<PaymentMethod>, CatalogError> {
        Ok(self.methods.iter().filter(|m| m.is_active && m.settings.contains_key(currency)).cloned().collect())
    }

    async fn fetch_country(&self, iso_code: &str) -> Result<Option<Country>, CatalogError> {
        Ok(self.countries.iter().find(|c| c.iso_code == iso_code).cloned())
    }

    async fn fetch_price_group(&self, id: &str) -> Result<Option<PriceGroup>, CatalogError> {
        Ok(self.price_groups.iter().find(|g| g.id == id).cloned())
    }

    async fn fetch_products(&self, merchant_id: &str, ids: &[String]) -> Result<Vec<Product>, CatalogError> {
        Ok(self
            .products
            .iter()
            .filter(|p| p.enabled && p.merchant_id == merchant_id && ids.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn fetch_bin(&self, bin: i64) -> Result<Option<BinRecord>, CatalogError> {
        Ok(self.bins.iter().find(|b| b.card_bin == bin).cloned())
    }
}

impl CostRates for TestDirectory {
    async fn channel_costs_system(
        &self,
        name: &str,
        region: &str,
    ) -> Result<Vec<PaymentChannelCostSystem>, CostRateError> {
        Ok(self.channel_costs_system.iter().filter(|c| c.name == name && c.region == region).cloned().collect())
    }

    async fn channel_costs_merchant(
        &self,
        merchant_id: &str,
        name: &str,
        payout_currency: &str,
        region: &str,
    ) -> Result<Vec<PaymentChannelCostMerchant>, CostRateError> {
        Ok(self
            .channel_costs_merchant
            .iter()
            .filter(|c| {
                c.merchant_id == merchant_id &&
                    c.name == name &&
                    c.payout_currency == payout_currency &&
                    c.region == region
            })
            .cloned()
            .collect())
    }

    async fn money_back_costs_system(
        &self,
        name: &str,
        payout_currency: &str,
        undo_reason: UndoReason,
        region: &str,
    ) -> Result<Vec<MoneyBackCostSystem>, CostRateError> {
        Ok(self
            .money_back_system
            .iter()
            .filter(|c| {
                c.name == name && c.payout_currency == payout_currency && c.undo_reason == undo_reason && c.region == region
            })
            .cloned()
            .collect())
    }

    async fn money_back_costs_merchant(
        &self,
        merchant_id: &str,
        name: &str,
        payout_currency: &str,
        undo_reason: UndoReason,
        region: &str,
    ) -> Result<Vec<MoneyBackCostMerchant>, CostRateError> {
        Ok(self
            .money_back_merchant
            .iter()
            .filter(|c| {
                c.merchant_id == merchant_id &&
                    c.name == name &&
                    c.payout_currency == payout_currency &&
                    c.undo_reason == undo_reason &&
                    c.region == region
            })
            .cloned()
            .collect())
    }
}

impl CurrencyExchange for TestDirectory {
    async fn convert(&self, from: &str, to: &str, amount: Money, source: RateSource) -> Result<Money, ExchangeError> {
        FixedRates.convert(from, to, amount, source).await
    }

    async fn convert_for_merchant(
        &self,
        from: &str,
        to: &str,
        amount: Money,
        side: ConversionSide,
    ) -> Result<Money, ExchangeError> {
        FixedRates.convert_for_merchant(from, to, amount, side).await
    }
}

impl TaxRates for TestDirectory {
    async fn rate_for(&self, country: &str, _zip: Option<&str>) -> Result<ResolvedTax, TaxError> {
        self.tax_rates
            .get(country)
            .map(|rate| ResolvedTax { tax_type: TaxType::Vat, rate: *rate })
            .ok_or_else(|| TaxError::RateNotFound(country.to_string()))
    }
}

impl GeoIp for TestDirectory {
    async fn locate(&self, ip: &str) -> Result<Option<GeoLocation>, GeoError> {
        Ok(self.geo.iter().find(|(prefix, _)| ip.starts_with(prefix.as_str())).map(|(_, loc)| loc.clone()))
    }
}

//--------------------------------------    Gateway fake      --------------------------------------------------------

/// A scriptable gateway. Records every request; payments succeed with a canned redirect unless
/// `fail_payments` is set, refunds are accepted with a sequential external id unless
/// `reject_refunds` is set.
#[derive(Debug, Clone, Default)]
pub struct TestGateway {
    pub fail_payments: bool,
    pub reject_refunds: bool,
    pub payments: Arc<Mutex<Vec<GatewayPaymentRequest>>>,
    pub refunds: Arc<Mutex<Vec<GatewayRefundRequest>>>,
}

impl PaymentGatewayClient for TestGateway {
    async fn create_payment(&self, request: GatewayPaymentRequest) -> Result<GatewayPaymentSession, GatewayError> {
        if self.fail_payments {
            return Err(GatewayError::Rejected("scripted rejection".into()));
        }
        let url = format!("https://gateway.example.com/pay/{}", request.order_uuid);
        self.payments.lock().unwrap().push(request);
        Ok(GatewayPaymentSession { redirect_url: url, need_redirect: true })
    }

    async fn create_refund(&self, request: GatewayRefundRequest) -> Result<GatewayRefundAccepted, GatewayError> {
        if self.reject_refunds {
            return Err(GatewayError::Rejected("scripted rejection".into()));
        }
        let n = {
            let mut refunds = self.refunds.lock().unwrap();
            refunds.push(request);
            refunds.len()
        };
        Ok(GatewayRefundAccepted { external_id: format!("ext-refund-{n:03}") })
    }
}

//--------------------------------------  Side-effect fake    --------------------------------------------------------

/// Implements every side-effect trait, recording calls for assertions.
#[derive(Debug, Clone, Default)]
pub struct RecordingSideEffects {
    pub merchant_notifications: Arc<Mutex<Vec<String>>>,
    pub customer_notifications: Arc<Mutex<Vec<String>>>,
    pub refund_notifications: Arc<Mutex<Vec<String>>>,
    pub reserved: Arc<Mutex<Vec<(String, String)>>>,
    pub finalized: Arc<Mutex<Vec<String>>>,
    pub cancelled: Arc<Mutex<Vec<String>>>,
    pub stored_cards: Arc<Mutex<Vec<String>>>,
    /// When set, reservations fail for this product id.
    pub out_of_stock: Option<String>,
}

impl Notifier for RecordingSideEffects {
    async fn notify_merchant(
        &self,
        order: &crate::db_types::Order,
        status: crate::db_types::PublicOrderStatus,
    ) -> Result<(), NotifyError> {
        self.merchant_notifications.lock().unwrap().push(format!("{}:{status}", order.id));
        Ok(())
    }

    async fn notify_customer(
        &self,
        order: &crate::db_types::Order,
        status: crate::db_types::PublicOrderStatus,
    ) -> Result<(), NotifyError> {
        self.customer_notifications.lock().unwrap().push(format!("{}:{status}", order.id));
        Ok(())
    }

    async fn notify_refund(
        &self,
        order: &crate::db_types::Order,
        refund: &crate::db_types::Refund,
    ) -> Result<(), NotifyError> {
        self.refund_notifications.lock().unwrap().push(format!("{}:{}", order.id, refund.id));
        Ok(())
    }
}

impl KeyInventory for RecordingSideEffects {
    async fn reserve_key(&self, order_id: &str, product_id: &str, platform_id: &str) -> Result<(), KeyInventoryError> {
        if self.out_of_stock.as_deref() == Some(product_id) {
            return Err(KeyInventoryError::OutOfStock(product_id.to_string(), platform_id.to_string()));
        }
        self.reserved.lock().unwrap().push((order_id.to_string(), product_id.to_string()));
        Ok(())
    }

    async fn finalize_reservations(&self, order_id: &str) -> Result<(), KeyInventoryError> {
        self.finalized.lock().unwrap().push(order_id.to_string());
        Ok(())
    }

    async fn cancel_reservations(&self, order_id: &str) -> Result<(), KeyInventoryError> {
        self.cancelled.lock().unwrap().push(order_id.to_string());
        self.reserved.lock().unwrap().retain(|(oid, _)| oid != order_id);
        Ok(())
    }
}

impl CardVault for RecordingSideEffects {
    async fn store_card(
        &self,
        user_id: &str,
        masked_pan: &str,
        _expiry_month: &str,
        _expiry_year: &str,
        _fingerprint: &str,
    ) -> Result<(), CardVaultError> {
        self.stored_cards.lock().unwrap().push(format!("{user_id}:{masked_pan}"));
        Ok(())
    }
}
