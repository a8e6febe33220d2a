//! Payment submission and the gateway payment-callback handler.
//!
//! [`PaymentFlowApi::payment_create`] is the last interactive step of a purchase: it validates the
//! payer's requisites, locks in tax and fee preconditions and hands the payment to the gateway.
//! [`PaymentFlowApi::payment_callback`] is the asynchronous other half, driven by the gateway's
//! notifications. Both are safe to replay: order mutations go through the lifecycle gate and the
//! settlement ledger insert is idempotent.

use std::fmt::Debug;

use bpg_common::Money;
use log::*;

use crate::{
    bpe_api::{
        accounting::{
            order_settlement,
            persist_entries,
            pick_channel_cost_merchant,
            pick_channel_cost_system,
            LedgerScope,
            OrderSettlementInput,
        },
        lifecycle::OrderLifecycle,
        order_objects::{CallbackResponse, PaymentCreateRequest, PaymentCreateResponse},
        ApiError,
        Halt,
    },
    db_types::{
        Address,
        Country,
        EntrySourceKind,
        Order,
        OrderPaymentMethod,
        OrderTax,
        OrderUuid,
        PaymentMethod,
        PaymentMethodKind,
        PrivateOrderStatus,
        ProductType,
    },
    errors::{BillingError, DeclineCode},
    events::EventProducers,
    gateways::{CallbackOutcome, GatewayKind, PaymentNotification},
    helpers::{card, ids},
    traits::{
        CardVault,
        CatalogLookup,
        ConversionSide,
        CostRates,
        CurrencyExchange,
        EntryStore,
        GatewayPaymentRequest,
        KeyInventory,
        KeyInventoryError,
        Notifier,
        OrderStore,
        PaymentGatewayClient,
        TaxRates,
    },
};

/// Advisory string answered to intermediate-status callbacks so the gateway stops retrying them.
const TEMPORARY_SKIP: &str = "transaction is in an intermediate status; processing skipped";

pub struct PaymentFlowApi<B, R, G, N> {
    db: B,
    reference: R,
    gateway: G,
    effects: N,
    lifecycle: OrderLifecycle<B, N>,
}

impl<B, R, G, N> Debug for PaymentFlowApi<B, R, G, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentFlowApi")
    }
}

impl<B: Clone, R, G, N: Clone> PaymentFlowApi<B, R, G, N> {
    pub fn new(db: B, reference: R, gateway: G, effects: N, producers: EventProducers) -> Self {
        let lifecycle = OrderLifecycle::new(db.clone(), effects.clone(), producers);
        Self { db, reference, gateway, effects, lifecycle }
    }
}

impl<B, R, G, N> PaymentFlowApi<B, R, G, N>
where
    B: OrderStore + EntryStore,
    R: CatalogLookup + CostRates + CurrencyExchange + TaxRates,
    G: PaymentGatewayClient,
    N: Notifier + KeyInventory + CardVault + Clone,
{
    /// Validates the payer's input and submits the payment to the gateway. On success the order is
    /// `Pending` and the response carries the gateway redirect.
    pub async fn payment_create(
        &self,
        order_uuid: &OrderUuid,
        request: PaymentCreateRequest,
    ) -> Result<PaymentCreateResponse, ApiError> {
        match self.run_payment_create(order_uuid, request).await {
            Ok(session) => Ok(PaymentCreateResponse::ok(session.0, session.1)),
            Err(Halt::Domain(e)) => {
                debug!("💳️ Payment creation for order [{order_uuid}] rejected: {} ({})", e, e.code());
                Ok(PaymentCreateResponse::rejected(e))
            },
            Err(Halt::Infra(e)) => Err(e),
        }
    }

    async fn run_payment_create(
        &self,
        order_uuid: &OrderUuid,
        request: PaymentCreateRequest,
    ) -> Result<(String, bool), Halt> {
        let mut order = self.fetch_payable_order(order_uuid).await?;
        let (method, settings) = self.resolve_method(&order, request.method_id.as_deref()).await?;
        let email = request
            .email
            .clone()
            .or_else(|| order.user.email.clone())
            .ok_or(BillingError::EmailRequired)?;
        order.user.email = Some(email.clone());
        let country = self.resolve_payment_country(&mut order, &request).await?;
        let gateway_account = self.capture_requisites(&mut order, &method, &settings.1, &request)?;
        if method.kind == PaymentMethodKind::BankCard {
            if let Some(pan) = request.account.as_deref() {
                self.enrich_card_bin(&mut order, pan).await?;
            }
        }
        order.tax = self
            .compute_tax(&country, order.billing_address.as_ref().and_then(|a| a.postal_code.as_deref()), order.order_amount, &order.currency)
            .await?;
        let tax_amount = order.tax.as_ref().map(|t| t.amount).unwrap_or_else(Money::zero);
        order.total_payment_amount = order.order_amount + tax_amount;
        order.charge_amount = order.total_payment_amount;
        self.check_cost_rates(&order, &country).await?;
        if order.product_type == ProductType::Key {
            self.reserve_keys(&order).await?;
        }
        order.payment_method = Some(OrderPaymentMethod {
            id: method.id.clone(),
            name: method.name.clone(),
            handler: method.handler.clone(),
            external_id: method.external_id.clone(),
            kind: method.kind,
            saved: request.store_card,
        });
        order.private_status = PrivateOrderStatus::Pending;
        let order = self.lifecycle.update_order(&order).await.map_err(Halt::Infra)?;
        let gateway_request = GatewayPaymentRequest {
            order_uuid: order.uuid.clone(),
            amount: order.charge_amount,
            currency: order.currency.clone(),
            method_external_id: method.external_id.clone(),
            terminal_id: settings.0,
            description: order.description.clone(),
            account: gateway_account,
            email: Some(email),
            return_url: order.project.redirect_success_url.clone(),
        };
        match self.gateway.create_payment(gateway_request).await {
            Ok(session) => {
                info!("💳️ Order [{}] submitted to the gateway; payer redirect ready", order.id);
                Ok((session.redirect_url, session.need_redirect))
            },
            Err(e) => {
                warn!("💳️ Gateway rejected payment for order [{}]: {e}", order.id);
                if order.product_type == ProductType::Key {
                    if let Err(e) = self.effects.cancel_reservations(&order.id).await {
                        warn!("💳️ Could not release key reservations for order [{}]: {e}", order.id);
                    }
                }
                Err(BillingError::OrderCanNotCreate.into())
            },
        }
    }

    async fn fetch_payable_order(&self, order_uuid: &OrderUuid) -> Result<Order, Halt> {
        let order = self.db.fetch_order_by_uuid(order_uuid).await?.ok_or(BillingError::OrderNotFound)?;
        if order.is_expired() {
            return Err(BillingError::FormInputTimeExpired.into());
        }
        match order.private_status {
            PrivateOrderStatus::New | PrivateOrderStatus::Pending => Ok(order),
            _ => Err(BillingError::OrderAlreadyComplete.into()),
        }
    }

    /// The chosen payment method plus its `(terminal_id, secret)` settings for the order currency.
    async fn resolve_method(
        &self,
        order: &Order,
        requested: Option<&str>,
    ) -> Result<(PaymentMethod, (String, String)), Halt> {
        let method_id = requested
            .map(String::from)
            .or_else(|| order.payment_method.as_ref().map(|m| m.id.clone()))
            .ok_or(BillingError::PaymentFieldMethodNotFound)?;
        let method = self
            .reference
            .fetch_payment_method(&method_id)
            .await?
            .ok_or(BillingError::PaymentMethodNotFound)?;
        if !method.is_active {
            return Err(BillingError::PaymentMethodInactive.into());
        }
        if !method.payment_system.is_active {
            return Err(BillingError::PaymentSystemInactive.into());
        }
        let settings = method
            .settings_for(&order.currency)
            .ok_or(BillingError::PaymentMethodEmptySettings)?;
        let extracted = (settings.terminal_id.clone(), settings.secret.reveal().clone());
        Ok((method, extracted))
    }

    async fn resolve_payment_country(
        &self,
        order: &mut Order,
        request: &PaymentCreateRequest,
    ) -> Result<Country, Halt> {
        let iso = request
            .country
            .clone()
            .or_else(|| order.country().map(String::from))
            .ok_or(BillingError::PaymentFieldUserCountryNotFound)?;
        let country = self.reference.fetch_country(&iso).await?.ok_or(BillingError::CountryNotFound)?;
        if !country.payments_allowed {
            return Err(BillingError::CountryPaymentsRestricted.into());
        }
        let zip = request
            .zip
            .clone()
            .or_else(|| order.billing_address.as_ref().and_then(|a| a.postal_code.clone()));
        if country.iso_code == "US" && zip.is_none() {
            return Err(BillingError::PaymentFieldUserZipNotFound.into());
        }
        if request.country.is_some() || order.billing_address.is_none() {
            order.billing_address =
                Some(Address { country: country.iso_code.clone(), postal_code: zip, ..Default::default() });
        }
        Ok(country)
    }

    /// Validates the requisites the payer entered and stores their derived, non-sensitive forms on
    /// the order. Returns the account the gateway needs up front, when the method has one. Full
    /// PANs never leave this function.
    fn capture_requisites(
        &self,
        order: &mut Order,
        method: &PaymentMethod,
        secret: &str,
        request: &PaymentCreateRequest,
    ) -> Result<Option<String>, Halt> {
        let pattern = method.account_regexp.as_deref().unwrap_or_default();
        match method.kind {
            PaymentMethodKind::BankCard => {
                let pan = request.account.as_deref().ok_or(BillingError::PaymentAccountIncorrect)?;
                card::validate_account(pan, pattern)?;
                order.payment_requisites.insert("pan".to_string(), card::mask_pan(pan)?);
                order
                    .payment_requisites
                    .insert("card_fingerprint".to_string(), card::fingerprint(pan, secret));
                if let Some(holder) = &request.card_holder {
                    order.payment_requisites.insert("card_holder".to_string(), holder.clone());
                }
                if let (Some(month), Some(year)) = (&request.expiry_month, &request.expiry_year) {
                    order.payment_requisites.insert("expiry_month".to_string(), month.clone());
                    order.payment_requisites.insert("expiry_year".to_string(), year.clone());
                }
                Ok(None)
            },
            PaymentMethodKind::EWallet | PaymentMethodKind::Crypto => {
                let account = request.account.as_deref().ok_or(BillingError::PaymentAccountIncorrect)?;
                card::validate_account(account, pattern)?;
                order.payment_requisites.insert("account".to_string(), account.to_string());
                Ok(Some(account.to_string()))
            },
        }
    }

    /// Enriches card requisites from the BIN table, when the account looks like a PAN.
    async fn enrich_card_bin(&self, order: &mut Order, pan: &str) -> Result<(), Halt> {
        if let Some(bin) = card::bin(pan).and_then(|b| b.parse::<i64>().ok()) {
            if let Some(record) = self.reference.fetch_bin(bin).await? {
                order.payment_requisites.insert("card_brand".to_string(), record.card_brand);
                order.payment_requisites.insert("bank_country_iso".to_string(), record.bank_country_iso);
            }
        }
        Ok(())
    }

    async fn compute_tax(
        &self,
        country: &Country,
        zip: Option<&str>,
        net: Money,
        currency: &str,
    ) -> Result<Option<OrderTax>, Halt> {
        if !country.vat_enabled {
            return Ok(None);
        }
        let resolved = self.reference.rate_for(&country.iso_code, zip).await?;
        let amount = (net * resolved.rate).round_currency(currency);
        Ok(Some(OrderTax { tax_type: resolved.tax_type, rate: resolved.rate, amount, currency: currency.to_string() }))
    }

    /// Both tariff tables must carry a usable row before the gateway is ever called; settling a
    /// payment we cannot account for is worse than rejecting it.
    async fn check_cost_rates(&self, order: &Order, country: &Country) -> Result<(), Halt> {
        let merchant = self
            .reference
            .fetch_merchant(&order.project.merchant_id)
            .await?
            .ok_or(BillingError::ProjectMerchantNotFound)?;
        let name = cost_channel_name(order);
        let system_rows = self.reference.channel_costs_system(&name, &country.region).await?;
        if pick_channel_cost_system(&system_rows, &country.iso_code).is_none() {
            return Err(BillingError::CostsRatesNotFound.into());
        }
        let merchant_rows = self
            .reference
            .channel_costs_merchant(&merchant.id, &name, &merchant.payout_currency, &country.region)
            .await?;
        let royalty_amount = self
            .reference
            .convert_for_merchant(&order.currency, &merchant.payout_currency, order.total_payment_amount, ConversionSide::Credit)
            .await?
            .to_precise();
        if pick_channel_cost_merchant(&merchant_rows, &country.iso_code, royalty_amount).is_none() {
            return Err(BillingError::CostsRatesNotFound.into());
        }
        Ok(())
    }

    async fn reserve_keys(&self, order: &Order) -> Result<(), Halt> {
        let platform = order.platform_id.as_deref().unwrap_or_default();
        for item in &order.items {
            if let Err(e) = self.effects.reserve_key(&order.id, &item.id, platform).await {
                warn!("💳️ Key reservation failed for order [{}], product {}: {e}", order.id, item.id);
                if let Err(rollback) = self.effects.cancel_reservations(&order.id).await {
                    warn!("💳️ Reservation rollback failed for order [{}]: {rollback}", order.id);
                }
                return match e {
                    KeyInventoryError::OutOfStock(_, _) => Err(BillingError::ProductsInvalid.into()),
                    KeyInventoryError::ServiceError(_) => Err(Halt::Infra(ApiError::KeyInventory(e))),
                };
            }
        }
        Ok(())
    }

    //------------------------------------  Payment callback  --------------------------------------------------------

    /// Processes an asynchronous payment notification. Callbacks always answer with a
    /// [`CallbackResponse`]; the transport succeeds even for rejected payloads so the gateway's
    /// retry policy reacts to the outcome code, not to HTTP errors.
    pub async fn payment_callback(&self, handler: &str, raw_body: &[u8], claimed_signature: &str) -> CallbackResponse {
        match self.process_payment_callback(handler, raw_body, claimed_signature).await {
            Ok(response) => response,
            Err(Halt::Domain(e)) => {
                warn!("📥️ Payment callback rejected: {} ({})", e, e.code());
                CallbackResponse::validation_error(format!("{}: {e}", e.code()))
            },
            Err(Halt::Infra(e)) => {
                error!("📥️ Payment callback processing failed: {e}");
                CallbackResponse::system_error(e.to_string())
            },
        }
    }

    async fn process_payment_callback(
        &self,
        handler: &str,
        raw_body: &[u8],
        claimed_signature: &str,
    ) -> Result<CallbackResponse, Halt> {
        let kind = GatewayKind::from_handler(handler).ok_or(BillingError::CallbackHandlerNotFound)?;
        let notification = kind.parse_payment_callback(raw_body)?;
        let order = self
            .db
            .fetch_order_by_uuid(&OrderUuid(notification.merchant_order.id.clone()))
            .await?
            .ok_or(BillingError::OrderNotFound)?;
        let method_ref = order.payment_method.as_ref().ok_or(BillingError::CallbackRequestIncorrect)?;
        let method = self
            .reference
            .fetch_payment_method(&method_ref.id)
            .await?
            .ok_or(BillingError::PaymentMethodNotFound)?;
        let settings = method.settings_for(&order.currency).ok_or(BillingError::PaymentMethodEmptySettings)?;
        // Nothing below may run on an unauthenticated payload.
        kind.verify_signature(raw_body, settings.secret_callback.reveal(), claimed_signature)?;
        match notification.outcome() {
            CallbackOutcome::Temporary => {
                debug!("📥️ Order [{}]: intermediate gateway status, leaving untouched", order.id);
                Ok(CallbackResponse::temporary(TEMPORARY_SKIP))
            },
            CallbackOutcome::Success => self.settle_payment(order, &notification).await,
            CallbackOutcome::Declined { code, canceled } => self.decline_payment(order, &notification, code, canceled).await,
        }
    }

    async fn settle_payment(
        &self,
        mut order: Order,
        notification: &PaymentNotification,
    ) -> Result<CallbackResponse, Halt> {
        let data = &notification.payment_data;
        order.transaction.insert("payment_id".to_string(), data.id.clone());
        order.transaction.insert("is_3d".to_string(), data.is_3d.to_string());
        if let Some(auth_code) = &data.auth_code {
            order.transaction.insert("auth_code".to_string(), auth_code.clone());
        }
        if let Some(rrn) = &data.rrn {
            order.transaction.insert("rrn".to_string(), rrn.clone());
        }
        if order.receipt_id.is_none() {
            order.receipt_id = Some(ids::new_id());
        }
        order.private_status = PrivateOrderStatus::PaymentSystemComplete;
        let order = self.lifecycle.update_order(&order).await.map_err(Halt::Infra)?;
        let inserted = self.settle_accounting(&order).await?;
        if inserted > 0 {
            self.store_card_if_requested(&order).await;
        }
        info!("📥️ Order [{}] settled by gateway transaction {}", order.id, data.id);
        Ok(CallbackResponse::ok())
    }

    /// Computes and persists the settlement ledger. Returns how many rows were new; a replayed
    /// callback recomputes the identical ledger and inserts nothing.
    async fn settle_accounting(&self, order: &Order) -> Result<usize, Halt> {
        let iso = order.country().map(String::from).ok_or(BillingError::CountryNotFound)?;
        let country = self.reference.fetch_country(&iso).await?.ok_or(BillingError::CountryNotFound)?;
        let merchant = self
            .reference
            .fetch_merchant(&order.project.merchant_id)
            .await?
            .ok_or(BillingError::ProjectMerchantNotFound)?;
        let name = cost_channel_name(order);
        let input = OrderSettlementInput {
            order_id: order.id.clone(),
            merchant_id: merchant.id.clone(),
            country: country.clone(),
            origin_currency: order.currency.clone(),
            royalty_currency: merchant.payout_currency.clone(),
            total: order.total_payment_amount,
            tax_amount: order.tax_amount(),
            method_name: name.clone(),
            system_costs: self.reference.channel_costs_system(&name, &country.region).await?,
            merchant_costs: self
                .reference
                .channel_costs_merchant(&merchant.id, &name, &merchant.payout_currency, &country.region)
                .await?,
        };
        let ledger = order_settlement(&self.reference, &input).await.map_err(ApiError::from).map_err(Halt::Infra)?;
        let scope = LedgerScope {
            source_id: order.id.clone(),
            source_kind: EntrySourceKind::Order,
            merchant_id: merchant.id,
            royalty_currency: merchant.payout_currency.clone(),
            origin_currency: order.currency.clone(),
            local_currency: country.vat_currency.clone().unwrap_or(merchant.payout_currency),
            country: country.iso_code,
        };
        Ok(persist_entries(&self.db, &ledger.entries(&scope)).await?)
    }

    async fn store_card_if_requested(&self, order: &Order) {
        let wants_storage = order.payment_method.as_ref().is_some_and(|m| m.saved);
        if !wants_storage {
            return;
        }
        let (Some(pan), Some(fingerprint)) =
            (order.payment_requisites.get("pan"), order.payment_requisites.get("card_fingerprint"))
        else {
            return;
        };
        let month = order.payment_requisites.get("expiry_month").map(String::as_str).unwrap_or_default();
        let year = order.payment_requisites.get("expiry_year").map(String::as_str).unwrap_or_default();
        if let Err(e) = self.effects.store_card(&order.user.id, pan, month, year, fingerprint).await {
            warn!("📥️ Could not store card for user {}: {e}", order.user.id);
        }
    }

    async fn decline_payment(
        &self,
        mut order: Order,
        notification: &PaymentNotification,
        code: DeclineCode,
        canceled: bool,
    ) -> Result<CallbackResponse, Halt> {
        let data = &notification.payment_data;
        order.transaction.insert("payment_id".to_string(), data.id.clone());
        order.transaction.insert("decline_code".to_string(), code.code().to_string());
        if let Some(reason) = data.decline.as_ref().and_then(|d| d.reason.clone()) {
            order.transaction.insert("decline_reason".to_string(), reason);
        }
        order.private_status =
            if canceled { PrivateOrderStatus::PaymentSystemCanceled } else { PrivateOrderStatus::PaymentSystemDeclined };
        if canceled {
            order.canceled_at = Some(chrono::Utc::now());
        }
        let order = self.lifecycle.update_order(&order).await.map_err(Halt::Infra)?;
        info!("📥️ Order [{}] declined by the gateway ({})", order.id, code.code());
        Ok(CallbackResponse::ok())
    }
}

/// The tariff-table channel name of an order's payment method. Card payments are costed per card
/// brand; other methods per their gateway identifier.
pub(crate) fn cost_channel_name(order: &Order) -> String {
    match order.payment_method.as_ref() {
        Some(m) if m.kind == PaymentMethodKind::BankCard => order
            .payment_requisites
            .get("card_brand")
            .map(|b| b.to_lowercase())
            .unwrap_or_else(|| "card".to_string()),
        Some(m) => m.external_id.to_lowercase(),
        None => "card".to_string(),
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::{
        db_types::PublicOrderStatus,
        errors::{CallbackStatus, ResponseStatus},
        helpers::signature,
        test_utils::{
            fixtures::{self, RecordingSideEffects, TestDirectory, TestGateway},
            memory::MemoryDatabase,
        },
    };

    fn api(
        db: &MemoryDatabase,
        directory: TestDirectory,
        gateway: TestGateway,
        effects: &RecordingSideEffects,
    ) -> PaymentFlowApi<MemoryDatabase, TestDirectory, TestGateway, RecordingSideEffects> {
        PaymentFlowApi::new(db.clone(), directory, gateway, effects.clone(), EventProducers::default())
    }

    fn card_request() -> PaymentCreateRequest {
        PaymentCreateRequest {
            method_id: Some("method-card".into()),
            account: Some("4000000000000002".into()),
            card_holder: Some("CARD HOLDER".into()),
            expiry_month: Some("11".into()),
            expiry_year: Some("2030".into()),
            email: None,
            store_card: false,
            country: None,
            zip: None,
        }
    }

    fn success_callback_body(order_uuid: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "merchant_order": {"id": order_uuid},
            "payment_method": "BANKCARD",
            "payment_data": {
                "id": "ext-tx-100",
                "amount": "120",
                "currency": "RUB",
                "status": "COMPLETED",
                "auth_code": "025682",
                "is_3d": true,
                "rrn": "918374539809"
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn payment_create_submits_to_the_gateway() {
        let db = MemoryDatabase::new();
        let gateway = TestGateway::default();
        let effects = RecordingSideEffects::default();
        let api = api(&db, TestDirectory::default(), gateway.clone(), &effects);
        let mut order = fixtures::new_order_fixture();
        order.private_status = PrivateOrderStatus::New;
        db.insert_order(&order).await.unwrap();

        let response = api.payment_create(&order.uuid, card_request()).await.unwrap();
        assert_eq!(response.status, ResponseStatus::Ok);
        assert!(response.redirect_url.unwrap().contains("uuid-order-1"));
        assert_eq!(gateway.payments.lock().unwrap().len(), 1);

        let stored = db.fetch_order_by_id("order-1").await.unwrap().unwrap();
        assert_eq!(stored.private_status, PrivateOrderStatus::Pending);
        // Only the masked PAN is stored.
        assert_eq!(stored.payment_requisites.get("pan").map(String::as_str), Some("400000******0002"));
        assert!(stored.payment_requisites.contains_key("card_fingerprint"));
    }

    #[tokio::test]
    async fn non_digit_card_accounts_are_rejected_even_without_a_pattern() {
        let db = MemoryDatabase::new();
        let gateway = TestGateway::default();
        let effects = RecordingSideEffects::default();
        let mut directory = TestDirectory::default();
        directory.methods[0].account_regexp = None;
        let api = api(&db, directory, gateway.clone(), &effects);
        let mut order = fixtures::new_order_fixture();
        order.private_status = PrivateOrderStatus::New;
        db.insert_order(&order).await.unwrap();

        let mut request = card_request();
        request.account = Some("a€€€€€€€€€".into());
        let response = api.payment_create(&order.uuid, request).await.unwrap();
        assert_eq!(response.message.unwrap().code, "fm000030");
        assert!(gateway.payments.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_cost_rates_block_payment_before_the_gateway() {
        let db = MemoryDatabase::new();
        let gateway = TestGateway::default();
        let effects = RecordingSideEffects::default();
        let mut directory = TestDirectory::default();
        directory.channel_costs_merchant.clear();
        let api = api(&db, directory, gateway.clone(), &effects);
        let mut order = fixtures::new_order_fixture();
        order.private_status = PrivateOrderStatus::New;
        db.insert_order(&order).await.unwrap();

        let response = api.payment_create(&order.uuid, card_request()).await.unwrap();
        assert_eq!(response.message.unwrap().code, "fm000064");
        assert!(gateway.payments.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn key_reservation_failure_rolls_back_and_rejects() {
        let db = MemoryDatabase::new();
        let gateway = TestGateway::default();
        let effects = RecordingSideEffects { out_of_stock: Some("prod-1".into()), ..Default::default() };
        let api = api(&db, TestDirectory::default(), gateway.clone(), &effects);
        let mut order = fixtures::new_order_fixture();
        order.private_status = PrivateOrderStatus::New;
        order.product_type = ProductType::Key;
        order.platform_id = Some("steam".into());
        order.items = vec![crate::db_types::OrderItem {
            id: "prod-1".into(),
            sku: Some("sku-prod-1".into()),
            name: "Product prod-1".into(),
            description: String::new(),
            amount: "100".parse().unwrap(),
            currency: "RUB".into(),
            platform_id: Some("steam".into()),
        }];
        db.insert_order(&order).await.unwrap();

        let response = api.payment_create(&order.uuid, card_request()).await.unwrap();
        assert_eq!(response.message.unwrap().code, "fm000032");
        assert_eq!(effects.cancelled.lock().unwrap().len(), 1);
        assert!(gateway.payments.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn successful_callback_settles_the_order() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let api = api(&db, TestDirectory::default(), TestGateway::default(), &effects);
        let mut order = fixtures::new_order_fixture();
        order.payment_requisites.insert("card_brand".into(), "VISA".into());
        db.insert_order(&order).await.unwrap();

        let body = success_callback_body("uuid-order-1");
        let sig = signature::sign(&body, "secret-callback-RUB");
        let response = api.payment_callback("cardpay", &body, &sig).await;
        assert_eq!(response.status, CallbackStatus::Ok);

        let stored = db.fetch_order_by_id("order-1").await.unwrap().unwrap();
        assert_eq!(stored.public_status(), PublicOrderStatus::Paid);
        assert_eq!(stored.transaction.get("payment_id").map(String::as_str), Some("ext-tx-100"));
        assert!(stored.receipt_id.is_some());
        assert_eq!(db.all_entries().len(), 26);
        assert_eq!(effects.merchant_notifications.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replayed_callbacks_are_idempotent() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let api = api(&db, TestDirectory::default(), TestGateway::default(), &effects);
        let mut order = fixtures::new_order_fixture();
        order.payment_requisites.insert("card_brand".into(), "VISA".into());
        db.insert_order(&order).await.unwrap();

        let body = success_callback_body("uuid-order-1");
        let sig = signature::sign(&body, "secret-callback-RUB");
        assert_eq!(api.payment_callback("cardpay", &body, &sig).await.status, CallbackStatus::Ok);
        assert_eq!(api.payment_callback("cardpay", &body, &sig).await.status, CallbackStatus::Ok);

        // One settlement, one notification round: the replay found every row already present.
        assert_eq!(db.all_entries().len(), 26);
        assert_eq!(effects.merchant_notifications.lock().unwrap().len(), 1);
        assert_eq!(effects.customer_notifications.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn declined_callback_records_the_platform_code() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let api = api(&db, TestDirectory::default(), TestGateway::default(), &effects);
        let order = fixtures::new_order_fixture();
        db.insert_order(&order).await.unwrap();

        let body = serde_json::to_vec(&json!({
            "merchant_order": {"id": "uuid-order-1"},
            "payment_method": "BANKCARD",
            "payment_data": {
                "id": "ext-tx-101",
                "amount": "120",
                "currency": "RUB",
                "status": "DECLINED",
                "decline": {"code": "13", "reason": "Insufficient funds"}
            }
        }))
        .unwrap();
        let sig = signature::sign(&body, "secret-callback-RUB");
        let response = api.payment_callback("cardpay", &body, &sig).await;
        assert_eq!(response.status, CallbackStatus::Ok);

        let stored = db.fetch_order_by_id("order-1").await.unwrap().unwrap();
        assert_eq!(stored.private_status, PrivateOrderStatus::PaymentSystemDeclined);
        assert_eq!(stored.transaction.get("decline_code").map(String::as_str), Some("ps000011"));
        assert!(db.all_entries().is_empty());
    }

    #[tokio::test]
    async fn bad_signature_leaves_the_order_untouched() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let api = api(&db, TestDirectory::default(), TestGateway::default(), &effects);
        let order = fixtures::new_order_fixture();
        db.insert_order(&order).await.unwrap();

        let body = success_callback_body("uuid-order-1");
        let response = api.payment_callback("cardpay", &body, "deadbeef").await;
        assert_eq!(response.status, CallbackStatus::ErrorValidation);
        let stored = db.fetch_order_by_id("order-1").await.unwrap().unwrap();
        assert_eq!(stored.private_status, PrivateOrderStatus::Pending);
        assert!(db.all_entries().is_empty());
    }

    #[tokio::test]
    async fn authorized_status_is_acknowledged_without_settling() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let api = api(&db, TestDirectory::default(), TestGateway::default(), &effects);
        let order = fixtures::new_order_fixture();
        db.insert_order(&order).await.unwrap();

        let body = String::from_utf8(success_callback_body("uuid-order-1"))
            .unwrap()
            .replace("COMPLETED", "AUTHORIZED")
            .into_bytes();
        let sig = signature::sign(&body, "secret-callback-RUB");
        let response = api.payment_callback("cardpay", &body, &sig).await;
        assert_eq!(response.status, CallbackStatus::Temporary);
        let stored = db.fetch_order_by_id("order-1").await.unwrap().unwrap();
        assert_eq!(stored.private_status, PrivateOrderStatus::Pending);
    }
}
