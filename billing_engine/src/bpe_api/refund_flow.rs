//! Refund and chargeback management.
//!
//! A refund is created against a settled order, handed to the gateway and left `InProgress` until
//! the gateway's refund callback confirms it. Completion spawns an immutable synthetic refund
//! order that anchors the reversal ledger, and flips the original order to `Refunded` or
//! `Chargeback` when its amount is exhausted. The cumulative non-rejected refund amount of an
//! order never exceeds its `total_payment_amount`.

use std::{collections::HashMap, fmt::Debug};

use chrono::Utc;
use log::*;

use crate::{
    bpe_api::{
        accounting::{
            persist_entries,
            pick_money_back_cost_merchant,
            pick_money_back_cost_system,
            refund_settlement,
            LedgerScope,
            RefundSettlementInput,
        },
        lifecycle::OrderLifecycle,
        order_objects::{CallbackResponse, CreateRefundRequest, RefundListResponse, RefundResponse},
        payment_flow::cost_channel_name,
        ApiError,
        Halt,
    },
    db_types::{
        AccountingEntryType,
        Country,
        EntrySourceKind,
        Merchant,
        Order,
        OrderRefundSummary,
        OrderType,
        OrderUuid,
        PrivateOrderStatus,
        Refund,
        RefundOrderRef,
        RefundStatus,
        UndoReason,
    },
    errors::BillingError,
    events::{EventProducers, RefundCompletedEvent},
    gateways::{CallbackOutcome, GatewayKind, RefundNotification},
    helpers::ids,
    traits::{
        CatalogLookup,
        CostRates,
        CurrencyExchange,
        EntryStore,
        GatewayRefundRequest,
        KeyInventory,
        Notifier,
        OrderStore,
        PaymentGatewayClient,
        RefundStore,
    },
};

/// Advisory string answered to intermediate-status refund callbacks.
const TEMPORARY_SKIP: &str = "refund is in an intermediate status; processing skipped";

pub struct RefundApi<B, R, G, N> {
    db: B,
    reference: R,
    gateway: G,
    effects: N,
    lifecycle: OrderLifecycle<B, N>,
    producers: EventProducers,
}

impl<B, R, G, N> Debug for RefundApi<B, R, G, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RefundApi")
    }
}

impl<B: Clone, R, G, N: Clone> RefundApi<B, R, G, N> {
    pub fn new(db: B, reference: R, gateway: G, effects: N, producers: EventProducers) -> Self {
        let lifecycle = OrderLifecycle::new(db.clone(), effects.clone(), producers.clone());
        Self { db, reference, gateway, effects, lifecycle, producers }
    }
}

impl<B, R, G, N> RefundApi<B, R, G, N>
where
    B: OrderStore + RefundStore + EntryStore,
    R: CatalogLookup + CostRates + CurrencyExchange,
    G: PaymentGatewayClient,
    N: Notifier + KeyInventory + Clone,
{
    /// Creates a refund or chargeback against a settled order and submits it to the gateway. The
    /// refund row is only written once the gateway has accepted it.
    pub async fn create_refund(
        &self,
        order_uuid: &OrderUuid,
        request: CreateRefundRequest,
    ) -> Result<RefundResponse, ApiError> {
        match self.run_create_refund(order_uuid, request).await {
            Ok(refund) => Ok(RefundResponse::ok(refund)),
            Err(Halt::Domain(e)) => {
                debug!("↩️ Refund creation for order [{order_uuid}] rejected: {} ({})", e, e.code());
                Ok(RefundResponse::rejected(e))
            },
            Err(Halt::Infra(e)) => Err(e),
        }
    }

    async fn run_create_refund(&self, order_uuid: &OrderUuid, request: CreateRefundRequest) -> Result<Refund, Halt> {
        let order = self.db.fetch_order_by_uuid(order_uuid).await?.ok_or(BillingError::RefundOrderNotFound)?;
        if order.private_status == PrivateOrderStatus::Refunded {
            return Err(BillingError::RefundAlreadyRefunded.into());
        }
        if !order.can_be_refunded() {
            return Err(BillingError::RefundNotAllowed.into());
        }
        // A chargeback always reverses the full payment, whatever amount was asked for.
        let amount = if request.is_chargeback { order.total_payment_amount } else { request.amount };
        if amount <= bpg_common::Money::zero() {
            return Err(BillingError::RefundNotAllowed.into());
        }
        let already_refunded = self.db.refunded_amount_for_order(&order.id).await?;
        if already_refunded + amount > order.total_payment_amount {
            return Err(BillingError::RefundAmountExceedsRemaining.into());
        }
        self.check_money_back_rates(&order, request.is_chargeback).await?;
        let method_ref = order.payment_method.as_ref().ok_or(BillingError::RefundNotAllowed)?;
        if GatewayKind::from_handler(&method_ref.handler).is_none() {
            return Err(BillingError::CallbackHandlerNotFound.into());
        }
        let method = self
            .reference
            .fetch_payment_method(&method_ref.id)
            .await?
            .ok_or(BillingError::PaymentMethodNotFound)?;
        let settings = method.settings_for(&order.currency).ok_or(BillingError::PaymentMethodEmptySettings)?;
        let refund_id = ids::new_id();
        let gateway_request = GatewayRefundRequest {
            refund_id: refund_id.clone(),
            order_uuid: order.uuid.clone(),
            gateway_payment_id: order.transaction.get("payment_id").cloned(),
            amount,
            currency: order.currency.clone(),
            terminal_id: settings.terminal_id.clone(),
            is_chargeback: request.is_chargeback,
        };
        let accepted = match self.gateway.create_refund(gateway_request).await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("↩️ Gateway rejected refund for order [{}]: {e}", order.id);
                return Err(BillingError::RefundRejectedByGateway.into());
            },
        };
        let now = Utc::now();
        let refund = Refund {
            id: refund_id,
            external_id: Some(accepted.external_id),
            order_ref: RefundOrderRef { id: order.id.clone(), uuid: order.uuid.clone() },
            amount,
            currency: order.currency.clone(),
            status: RefundStatus::InProgress,
            creator_id: request.creator_id,
            reason: request.reason,
            is_chargeback: request.is_chargeback,
            created_order_id: None,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        self.db.insert_refund(&refund).await?;
        info!("↩️ Refund [{}] for order [{}] accepted by the gateway", refund.id, order.id);
        Ok(refund)
    }

    /// Both money-back tariff tables must carry a usable row before the gateway is asked to move
    /// money back.
    async fn check_money_back_rates(&self, order: &Order, is_chargeback: bool) -> Result<(), Halt> {
        let (country, merchant) = self.resolve_settlement_parties(order).await?;
        let name = cost_channel_name(order);
        let undo_reason = if is_chargeback { UndoReason::Chargeback } else { UndoReason::Reversal };
        let days = (Utc::now() - order.created_at).num_days();
        let system_rows = self
            .reference
            .money_back_costs_system(&name, &merchant.payout_currency, undo_reason, &country.region)
            .await?;
        if pick_money_back_cost_system(&system_rows, &country.iso_code, days).is_none() {
            return Err(BillingError::RefundCostsRatesNotFound.into());
        }
        let merchant_rows = self
            .reference
            .money_back_costs_merchant(&merchant.id, &name, &merchant.payout_currency, undo_reason, &country.region)
            .await?;
        if pick_money_back_cost_merchant(&merchant_rows, &country.iso_code, days).is_none() {
            return Err(BillingError::RefundCostsRatesNotFound.into());
        }
        Ok(())
    }

    async fn resolve_settlement_parties(&self, order: &Order) -> Result<(Country, Merchant), Halt> {
        let iso = order.country().map(String::from).ok_or(BillingError::CountryNotFound)?;
        let country = self.reference.fetch_country(&iso).await?.ok_or(BillingError::CountryNotFound)?;
        let merchant = self
            .reference
            .fetch_merchant(&order.project.merchant_id)
            .await?
            .ok_or(BillingError::ProjectMerchantNotFound)?;
        Ok((country, merchant))
    }

    /// Pages the refunds of an order, newest first. `None` when the order does not exist.
    pub async fn list_refunds(
        &self,
        order_uuid: &OrderUuid,
        limit: i64,
        offset: i64,
    ) -> Result<Option<RefundListResponse>, ApiError> {
        let Some(order) = self.db.fetch_order_by_uuid(order_uuid).await? else {
            return Ok(None);
        };
        let count = self.db.count_refunds_for_order(&order.id).await?;
        let items = self.db.fetch_refunds_for_order(&order.id, limit, offset).await?;
        Ok(Some(RefundListResponse { count, items }))
    }

    /// A single refund, checked to belong to the order it was requested through.
    pub async fn get_refund(&self, order_uuid: &OrderUuid, refund_id: &str) -> Result<RefundResponse, ApiError> {
        let Some(order) = self.db.fetch_order_by_uuid(order_uuid).await? else {
            return Ok(RefundResponse::rejected(BillingError::RefundOrderNotFound));
        };
        match self.db.fetch_refund(refund_id).await? {
            Some(refund) if refund.order_ref.id == order.id => Ok(RefundResponse::ok(refund)),
            _ => Ok(RefundResponse::rejected(BillingError::RefundNotFound)),
        }
    }

    //------------------------------------  Refund callback  ---------------------------------------------------------

    /// Processes an asynchronous refund notification from the gateway.
    pub async fn refund_callback(&self, handler: &str, raw_body: &[u8], claimed_signature: &str) -> CallbackResponse {
        match self.process_refund_callback(handler, raw_body, claimed_signature).await {
            Ok(response) => response,
            Err(Halt::Domain(e)) => {
                warn!("📥️ Refund callback rejected: {} ({})", e, e.code());
                CallbackResponse::validation_error(format!("{}: {e}", e.code()))
            },
            Err(Halt::Infra(e)) => {
                error!("📥️ Refund callback processing failed: {e}");
                CallbackResponse::system_error(e.to_string())
            },
        }
    }

    async fn process_refund_callback(
        &self,
        handler: &str,
        raw_body: &[u8],
        claimed_signature: &str,
    ) -> Result<CallbackResponse, Halt> {
        let kind = GatewayKind::from_handler(handler).ok_or(BillingError::CallbackHandlerNotFound)?;
        let notification = kind.parse_refund_callback(raw_body)?;
        let refund = self
            .db
            .fetch_refund(&notification.merchant_order.id)
            .await?
            .ok_or(BillingError::RefundNotFound)?;
        let order = self
            .db
            .fetch_order_by_id(&refund.order_ref.id)
            .await?
            .ok_or(BillingError::RefundOrderNotFound)?;
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
                debug!("📥️ Refund [{}]: intermediate gateway status, leaving untouched", refund.id);
                Ok(CallbackResponse::temporary(TEMPORARY_SKIP))
            },
            CallbackOutcome::Success => self.complete_refund(order, refund, &notification).await,
            CallbackOutcome::Declined { canceled, .. } => self.decline_refund(refund, canceled).await,
        }
    }

    async fn complete_refund(
        &self,
        order: Order,
        mut refund: Refund,
        notification: &RefundNotification,
    ) -> Result<CallbackResponse, Halt> {
        if refund.status == RefundStatus::Completed && refund.created_order_id.is_some() {
            debug!("📥️ Refund [{}] already completed; replayed callback acknowledged", refund.id);
            return Ok(CallbackResponse::ok());
        }
        if refund.external_id.is_none() {
            refund.external_id = Some(notification.refund_data.id.clone());
        }
        let refund_order = self.spawn_refund_order(&order, &refund).await?;
        refund.status = RefundStatus::Completed;
        refund.created_order_id = Some(refund_order.id.clone());
        let refund = self.db.update_refund(&refund).await?;
        self.settle_refund_accounting(&order, &refund, &refund_order).await?;
        let order = self.flip_original_order(order, &refund).await?;
        if let Err(e) = self.effects.notify_refund(&order, &refund).await {
            warn!("📥️ Could not send the refund notice for [{}]: {e}", refund.id);
        }
        for producer in &self.producers.refund_completed_producer {
            producer.publish_event(RefundCompletedEvent::new(order.clone(), refund.clone())).await;
        }
        info!("📥️ Refund [{}] completed; ledger anchored at order [{}]", refund.id, refund_order.id);
        Ok(CallbackResponse::ok())
    }

    /// The immutable synthetic order anchoring the reversal ledger. Born terminal; the lifecycle
    /// gate never fires side effects for it.
    async fn spawn_refund_order(&self, order: &Order, refund: &Refund) -> Result<Order, Halt> {
        let now = Utc::now();
        let refund_order = Order {
            id: ids::new_id(),
            uuid: OrderUuid(ids::new_id()),
            order_type: OrderType::Refund,
            product_type: order.product_type,
            project: order.project.clone(),
            project_order_id: None,
            description: format!("Refund of order {}", order.id),
            order_amount: refund.amount,
            total_payment_amount: refund.amount,
            charge_amount: refund.amount,
            currency: refund.currency.clone(),
            tax: None,
            user: order.user.clone(),
            billing_address: order.billing_address.clone(),
            payment_method: order.payment_method.clone(),
            payment_requisites: order.payment_requisites.clone(),
            transaction: HashMap::new(),
            private_status: PrivateOrderStatus::Refunded,
            items: Vec::new(),
            platform_id: None,
            virtual_currency_amount: None,
            issuer: Default::default(),
            is_notifications_sent: HashMap::new(),
            receipt_id: Some(ids::new_id()),
            parent_order_id: Some(order.id.clone()),
            refund: Some(OrderRefundSummary {
                refund_id: refund.id.clone(),
                amount: refund.amount,
                currency: refund.currency.clone(),
                is_chargeback: refund.is_chargeback,
                reason: refund.reason.clone(),
            }),
            created_at: now,
            updated_at: now,
            expire_at: now,
            refunded_at: Some(now),
            canceled_at: None,
            version: 1,
        };
        self.db.insert_order(&refund_order).await?;
        Ok(refund_order)
    }

    async fn settle_refund_accounting(&self, order: &Order, refund: &Refund, refund_order: &Order) -> Result<(), Halt> {
        let (country, merchant) = self.resolve_settlement_parties(order).await?;
        let name = cost_channel_name(order);
        let undo_reason = if refund.is_chargeback { UndoReason::Chargeback } else { UndoReason::Reversal };
        let days = (Utc::now() - order.created_at).num_days();
        let original_entries = self.db.fetch_entries_for_source(&order.id, EntrySourceKind::Order).await?;
        let original_amount = |entry_type: AccountingEntryType| {
            original_entries
                .iter()
                .find(|e| e.entry_type == entry_type)
                .map(|e| e.amount)
                .unwrap_or_else(bpg_common::Money::zero)
        };
        let input = RefundSettlementInput {
            refund_order_id: refund_order.id.clone(),
            merchant_id: merchant.id.clone(),
            country: country.clone(),
            origin_currency: order.currency.clone(),
            royalty_currency: merchant.payout_currency.clone(),
            refund_amount: refund.amount,
            order_total: order.total_payment_amount,
            tax_rate: order.tax_rate(),
            is_chargeback: refund.is_chargeback,
            original_merchant_tax_fee: original_amount(AccountingEntryType::MerchantTaxFee),
            original_ps_gross_revenue_fx_tax_fee: original_amount(AccountingEntryType::PsGrossRevenueFxTaxFee),
            method_name: name.clone(),
            system_costs: self
                .reference
                .money_back_costs_system(&name, &merchant.payout_currency, undo_reason, &country.region)
                .await?,
            merchant_costs: self
                .reference
                .money_back_costs_merchant(&merchant.id, &name, &merchant.payout_currency, undo_reason, &country.region)
                .await?,
            days_since_payment: days,
        };
        let ledger = refund_settlement(&self.reference, &input).await.map_err(ApiError::from).map_err(Halt::Infra)?;
        let scope = LedgerScope {
            source_id: refund_order.id.clone(),
            source_kind: EntrySourceKind::Refund,
            merchant_id: merchant.id,
            royalty_currency: merchant.payout_currency.clone(),
            origin_currency: order.currency.clone(),
            local_currency: country.vat_currency.clone().unwrap_or(merchant.payout_currency),
            country: country.iso_code,
        };
        persist_entries(&self.db, &ledger.entries(&scope)).await?;
        Ok(())
    }

    /// Flips the original order once its amount is exhausted. Chargebacks always flip and pin the
    /// total to what actually went back.
    async fn flip_original_order(&self, mut order: Order, refund: &Refund) -> Result<Order, Halt> {
        let refunded_total = self.db.refunded_amount_for_order(&order.id).await?;
        if refund.is_chargeback {
            order.private_status = PrivateOrderStatus::Chargeback;
            order.total_payment_amount = refunded_total;
            order.refunded_at = Some(Utc::now());
        } else if refunded_total >= order.total_payment_amount {
            order.private_status = PrivateOrderStatus::Refunded;
            order.refunded_at = Some(Utc::now());
        } else {
            return Ok(order);
        }
        Ok(self.lifecycle.update_order(&order).await.map_err(Halt::Infra)?)
    }

    async fn decline_refund(&self, mut refund: Refund, canceled: bool) -> Result<CallbackResponse, Halt> {
        if !matches!(refund.status, RefundStatus::Created | RefundStatus::InProgress) {
            debug!("📥️ Refund [{}] already resolved; replayed decline acknowledged", refund.id);
            return Ok(CallbackResponse::ok());
        }
        refund.status =
            if canceled { RefundStatus::PaymentSystemCanceled } else { RefundStatus::PaymentSystemDeclined };
        let refund = self.db.update_refund(&refund).await?;
        info!("📥️ Refund [{}] declined by the gateway", refund.id);
        Ok(CallbackResponse::ok())
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::{
        db_types::PublicOrderStatus,
        errors::CallbackStatus,
        helpers::signature,
        test_utils::{
            fixtures::{self, RecordingSideEffects, TestDirectory, TestGateway},
            memory::MemoryDatabase,
        },
    };

    fn api(
        db: &MemoryDatabase,
        gateway: TestGateway,
        effects: &RecordingSideEffects,
    ) -> RefundApi<MemoryDatabase, TestDirectory, TestGateway, RecordingSideEffects> {
        RefundApi::new(db.clone(), TestDirectory::default(), gateway, effects.clone(), EventProducers::default())
    }

    fn settled_order() -> Order {
        let mut order = fixtures::new_order_fixture();
        order.private_status = PrivateOrderStatus::PaymentSystemComplete;
        order.payment_requisites.insert("card_brand".into(), "VISA".into());
        order.transaction.insert("payment_id".into(), "ext-tx-100".into());
        order
    }

    fn refund_request(amount: &str) -> CreateRefundRequest {
        CreateRefundRequest {
            amount: amount.parse().unwrap(),
            reason: "customer request".into(),
            creator_id: "merchant-1".into(),
            is_chargeback: false,
        }
    }

    fn refund_callback_body(refund_id: &str, amount: &str, status: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "merchant_order": {"id": refund_id},
            "payment_method": "BANKCARD",
            "refund_data": {
                "id": "ext-refund-900",
                "amount": amount,
                "currency": "RUB",
                "status": status
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn refund_is_accepted_and_left_in_progress() {
        let db = MemoryDatabase::new();
        let gateway = TestGateway::default();
        let effects = RecordingSideEffects::default();
        let api = api(&db, gateway.clone(), &effects);
        db.insert_order(&settled_order()).await.unwrap();

        let response = api.create_refund(&OrderUuid("uuid-order-1".into()), refund_request("50")).await.unwrap();
        let refund = response.refund.unwrap();
        assert_eq!(refund.status, RefundStatus::InProgress);
        assert_eq!(refund.external_id.as_deref(), Some("ext-refund-001"));
        assert_eq!(refund.amount, "50".parse().unwrap());
        let sent = gateway.refunds.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].gateway_payment_id.as_deref(), Some("ext-tx-100"));
    }

    #[tokio::test]
    async fn missing_payment_transaction_id_is_sent_as_absent() {
        let db = MemoryDatabase::new();
        let gateway = TestGateway::default();
        let effects = RecordingSideEffects::default();
        let api = api(&db, gateway.clone(), &effects);
        let mut order = settled_order();
        order.transaction.remove("payment_id");
        db.insert_order(&order).await.unwrap();

        let response = api.create_refund(&OrderUuid("uuid-order-1".into()), refund_request("50")).await.unwrap();
        assert!(response.refund.is_some());
        // The gateway must see the absence, not an empty id.
        assert_eq!(gateway.refunds.lock().unwrap()[0].gateway_payment_id, None);
    }

    #[tokio::test]
    async fn unsettled_orders_cannot_be_refunded() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let api = api(&db, TestGateway::default(), &effects);
        db.insert_order(&fixtures::new_order_fixture()).await.unwrap();

        let response = api.create_refund(&OrderUuid("uuid-order-1".into()), refund_request("50")).await.unwrap();
        assert_eq!(response.message.unwrap().code, "rf000001");
    }

    #[tokio::test]
    async fn refunded_orders_report_already_refunded() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let api = api(&db, TestGateway::default(), &effects);
        let mut order = settled_order();
        order.private_status = PrivateOrderStatus::Refunded;
        db.insert_order(&order).await.unwrap();

        let response = api.create_refund(&OrderUuid("uuid-order-1".into()), refund_request("50")).await.unwrap();
        assert_eq!(response.message.unwrap().code, "rf000002");
    }

    #[tokio::test]
    async fn cumulative_refunds_cannot_exceed_the_order_total() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let api = api(&db, TestGateway::default(), &effects);
        db.insert_order(&settled_order()).await.unwrap();
        let mut prior = fixtures::new_refund_fixture("refund-prior", "order-1", "100");
        prior.status = RefundStatus::Completed;
        db.insert_refund(&prior).await.unwrap();

        let response = api.create_refund(&OrderUuid("uuid-order-1".into()), refund_request("30")).await.unwrap();
        assert_eq!(response.message.unwrap().code, "rf000003");
        assert_eq!(db.count_refunds_for_order("order-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn chargebacks_force_the_full_amount() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let api = api(&db, TestGateway::default(), &effects);
        db.insert_order(&settled_order()).await.unwrap();

        let mut request = refund_request("5");
        request.is_chargeback = true;
        let response = api.create_refund(&OrderUuid("uuid-order-1".into()), request).await.unwrap();
        let refund = response.refund.unwrap();
        assert!(refund.is_chargeback);
        assert_eq!(refund.amount, "120".parse().unwrap());
    }

    #[tokio::test]
    async fn gateway_rejection_writes_no_refund_row() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let gateway = TestGateway { reject_refunds: true, ..Default::default() };
        let api = api(&db, gateway, &effects);
        db.insert_order(&settled_order()).await.unwrap();

        let response = api.create_refund(&OrderUuid("uuid-order-1".into()), refund_request("50")).await.unwrap();
        assert_eq!(response.message.unwrap().code, "rf000007");
        assert_eq!(db.count_refunds_for_order("order-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_money_back_rates_block_the_refund() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let gateway = TestGateway::default();
        let mut directory = TestDirectory::default();
        directory.money_back_merchant.clear();
        let api = RefundApi::new(db.clone(), directory, gateway.clone(), effects.clone(), EventProducers::default());
        db.insert_order(&settled_order()).await.unwrap();

        let response = api.create_refund(&OrderUuid("uuid-order-1".into()), refund_request("50")).await.unwrap();
        assert_eq!(response.message.unwrap().code, "rf000006");
        assert!(gateway.refunds.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn completed_callback_settles_and_flips_the_order() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let api = api(&db, TestGateway::default(), &effects);
        db.insert_order(&settled_order()).await.unwrap();
        db.insert_refund(&fixtures::new_refund_fixture("refund-1", "order-1", "120")).await.unwrap();

        let body = refund_callback_body("refund-1", "120", "COMPLETED");
        let sig = signature::sign(&body, "secret-callback-RUB");
        let response = api.refund_callback("cardpay", &body, &sig).await;
        assert_eq!(response.status, CallbackStatus::Ok);

        let refund = db.fetch_refund("refund-1").await.unwrap().unwrap();
        assert_eq!(refund.status, RefundStatus::Completed);
        let anchor_id = refund.created_order_id.unwrap();
        let anchor = db.fetch_order_by_id(&anchor_id).await.unwrap().unwrap();
        assert_eq!(anchor.order_type, OrderType::Refund);
        assert_eq!(anchor.parent_order_id.as_deref(), Some("order-1"));
        assert_eq!(anchor.private_status, PrivateOrderStatus::Refunded);
        assert_eq!(db.fetch_entries_for_source(&anchor_id, EntrySourceKind::Refund).await.unwrap().len(), 18);

        let original = db.fetch_order_by_id("order-1").await.unwrap().unwrap();
        assert_eq!(original.public_status(), PublicOrderStatus::Refunded);
        assert!(original.refunded_at.is_some());
        assert_eq!(effects.refund_notifications.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn partial_refunds_leave_the_order_settled() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let api = api(&db, TestGateway::default(), &effects);
        db.insert_order(&settled_order()).await.unwrap();
        db.insert_refund(&fixtures::new_refund_fixture("refund-1", "order-1", "50")).await.unwrap();

        let body = refund_callback_body("refund-1", "50", "COMPLETED");
        let sig = signature::sign(&body, "secret-callback-RUB");
        assert_eq!(api.refund_callback("cardpay", &body, &sig).await.status, CallbackStatus::Ok);

        let original = db.fetch_order_by_id("order-1").await.unwrap().unwrap();
        assert_eq!(original.private_status, PrivateOrderStatus::PaymentSystemComplete);
        let refund = db.fetch_refund("refund-1").await.unwrap().unwrap();
        assert_eq!(refund.status, RefundStatus::Completed);
    }

    #[tokio::test]
    async fn replayed_refund_callbacks_are_idempotent() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let api = api(&db, TestGateway::default(), &effects);
        db.insert_order(&settled_order()).await.unwrap();
        db.insert_refund(&fixtures::new_refund_fixture("refund-1", "order-1", "120")).await.unwrap();

        let body = refund_callback_body("refund-1", "120", "COMPLETED");
        let sig = signature::sign(&body, "secret-callback-RUB");
        assert_eq!(api.refund_callback("cardpay", &body, &sig).await.status, CallbackStatus::Ok);
        assert_eq!(api.refund_callback("cardpay", &body, &sig).await.status, CallbackStatus::Ok);

        // One synthetic order, one ledger, one notice.
        assert_eq!(db.order_count(), 2);
        assert_eq!(effects.refund_notifications.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn declined_refund_frees_the_amount_again() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let api = api(&db, TestGateway::default(), &effects);
        db.insert_order(&settled_order()).await.unwrap();
        db.insert_refund(&fixtures::new_refund_fixture("refund-1", "order-1", "120")).await.unwrap();

        let body = refund_callback_body("refund-1", "120", "DECLINED");
        let sig = signature::sign(&body, "secret-callback-RUB");
        assert_eq!(api.refund_callback("cardpay", &body, &sig).await.status, CallbackStatus::Ok);

        let refund = db.fetch_refund("refund-1").await.unwrap().unwrap();
        assert_eq!(refund.status, RefundStatus::PaymentSystemDeclined);
        assert_eq!(db.refunded_amount_for_order("order-1").await.unwrap(), bpg_common::Money::zero());
        // The full amount may be refunded again.
        let response = api.create_refund(&OrderUuid("uuid-order-1".into()), refund_request("120")).await.unwrap();
        assert!(response.refund.is_some());
    }

    #[tokio::test]
    async fn chargeback_callback_pins_the_order_total() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let api = api(&db, TestGateway::default(), &effects);
        db.insert_order(&settled_order()).await.unwrap();
        let mut chargeback = fixtures::new_refund_fixture("refund-1", "order-1", "120");
        chargeback.is_chargeback = true;
        db.insert_refund(&chargeback).await.unwrap();

        let body = refund_callback_body("refund-1", "120", "COMPLETED");
        let sig = signature::sign(&body, "secret-callback-RUB");
        assert_eq!(api.refund_callback("cardpay", &body, &sig).await.status, CallbackStatus::Ok);

        let original = db.fetch_order_by_id("order-1").await.unwrap().unwrap();
        assert_eq!(original.private_status, PrivateOrderStatus::Chargeback);
        assert_eq!(original.total_payment_amount, "120".parse().unwrap());
    }

    #[tokio::test]
    async fn refund_listing_pages_newest_first() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let api = api(&db, TestGateway::default(), &effects);
        db.insert_order(&settled_order()).await.unwrap();
        for (i, amount) in ["10", "20", "30"].iter().enumerate() {
            let mut r = fixtures::new_refund_fixture(&format!("refund-{i}"), "order-1", amount);
            r.created_at = r.created_at + chrono::Duration::seconds(i as i64);
            db.insert_refund(&r).await.unwrap();
        }

        let page = api.list_refunds(&OrderUuid("uuid-order-1".into()), 2, 0).await.unwrap().unwrap();
        assert_eq!(page.count, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, "refund-2");

        assert!(api.list_refunds(&OrderUuid("no-such-order".into()), 10, 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refunds_are_fetched_through_their_own_order_only() {
        let db = MemoryDatabase::new();
        let effects = RecordingSideEffects::default();
        let api = api(&db, TestGateway::default(), &effects);
        db.insert_order(&settled_order()).await.unwrap();
        let mut other = settled_order();
        other.id = "order-2".into();
        other.uuid = OrderUuid("uuid-order-2".into());
        other.project_order_id = Some("merchant-ref-2".into());
        db.insert_order(&other).await.unwrap();
        db.insert_refund(&fixtures::new_refund_fixture("refund-1", "order-1", "50")).await.unwrap();

        let owned = api.get_refund(&OrderUuid("uuid-order-1".into()), "refund-1").await.unwrap();
        assert!(owned.refund.is_some());
        let foreign = api.get_refund(&OrderUuid("uuid-order-2".into()), "refund-1").await.unwrap();
        assert_eq!(foreign.message.unwrap().code, "rf000004");
    }
}
