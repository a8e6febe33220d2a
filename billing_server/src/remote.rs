//! HTTP clients for the services the engine reads through its collaborator traits.
//!
//! The engine owns orders, refunds and accounting entries and nothing else; the catalog, tariff
//! tables, exchange rates, tax rates and geo data live in the reference service, and payments
//! are submitted to the gateway. Each client here binds one of those services to the matching
//! engine trait.

use std::sync::Arc;

use billing_engine::{
    db_types::{
        BinRecord,
        Country,
        Merchant,
        MoneyBackCostMerchant,
        MoneyBackCostSystem,
        Order,
        PaymentChannelCostMerchant,
        PaymentChannelCostSystem,
        PaymentMethod,
        PriceGroup,
        Product,
        Project,
        PublicOrderStatus,
        Refund,
        UndoReason,
    },
    traits::{
        CardVault,
        CardVaultError,
        CatalogLookup,
        CatalogError,
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
use bpg_common::{Money, Secret};
use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
    Method,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::{config::ServerConfig, errors::ServerError};

#[derive(Debug, Clone, Error)]
pub enum RemoteApiError {
    #[error("Could not initialize the remote client. {0}")]
    Initialization(String),
    #[error("The remote call failed. {0}")]
    ResponseError(String),
    #[error("Could not decode the remote response. {0}")]
    JsonError(String),
    #[error("The remote service answered {status}. {message}")]
    QueryError { status: u16, message: String },
}

impl RemoteApiError {
    fn is_not_found(&self) -> bool {
        matches!(self, Self::QueryError { status: 404, .. })
    }
}

/// A thin JSON-over-HTTP client with a fixed base URL and default headers. The service clients
/// below all delegate to this.
#[derive(Clone)]
pub struct RemoteApi {
    client: Arc<Client>,
    base_url: String,
}

impl RemoteApi {
    pub fn new(base_url: &str, token: Option<&Secret<String>>) -> Result<Self, RemoteApiError> {
        let mut headers = HeaderMap::with_capacity(2);
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        if let Some(token) = token {
            let val = HeaderValue::from_str(&format!("Bearer {}", token.reveal()))
                .map_err(|e| RemoteApiError::Initialization(e.to_string()))?;
            headers.insert("Authorization", val);
        }
        let client =
            Client::builder().default_headers(headers).build().map_err(|e| RemoteApiError::Initialization(e.to_string()))?;
        Ok(Self { client: Arc::new(client), base_url: base_url.trim_end_matches('/').to_string() })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn query<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        url: String,
        params: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<T, RemoteApiError> {
        trace!("Sending remote query: {url}");
        let mut req = self.client.request(method, url);
        if !params.is_empty() {
            req = req.query(params);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        let response = req.send().await.map_err(|e| RemoteApiError::ResponseError(e.to_string()))?;
        if response.status().is_success() {
            trace!("Remote query successful. {}", response.status());
            response.json::<T>().await.map_err(|e| RemoteApiError::JsonError(e.to_string()))
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| RemoteApiError::ResponseError(e.to_string()))?;
            Err(RemoteApiError::QueryError { status, message })
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> Result<T, RemoteApiError> {
        self.query::<T, ()>(Method::GET, self.url(path), params, None).await
    }

    /// As [`get`](Self::get), with a 404 folded into `None`.
    pub async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Option<T>, RemoteApiError> {
        match self.get(path, params).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, RemoteApiError> {
        self.query(Method::POST, self.url(path), &[], Some(body)).await
    }

    /// POST to an absolute URL outside the base, e.g. a merchant webhook.
    pub async fn post_url<B: Serialize>(&self, url: &str, body: &B) -> Result<(), RemoteApiError> {
        self.query::<serde_json::Value, B>(Method::POST, url.to_string(), &[], Some(body)).await.map(|_| ())
    }

    /// POST where the response body carries nothing of interest.
    pub async fn post_no_content<B: Serialize>(&self, path: &str, body: &B) -> Result<(), RemoteApiError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| RemoteApiError::ResponseError(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| RemoteApiError::ResponseError(e.to_string()))?;
            Err(RemoteApiError::QueryError { status, message })
        }
    }
}

fn undo_reason_param(undo_reason: UndoReason) -> &'static str {
    match undo_reason {
        UndoReason::Reversal => "reversal",
        UndoReason::Chargeback => "chargeback",
    }
}

//--------------------------------------   Reference service  --------------------------------------------------------

/// Client for the reference service: the catalog, the tariff tables, exchange rates, tax rates
/// and the geo database. Implements every read trait the engine's `R` parameter asks for.
#[derive(Clone)]
pub struct RemoteReference {
    api: RemoteApi,
    /// Sent along with tariff lookups; fixed-fee rows are expressed in this currency.
    accounting_currency: String,
}

impl RemoteReference {
    pub fn new(config: &ServerConfig) -> Result<Self, ServerError> {
        let api = RemoteApi::new(&config.reference_url, None).map_err(|e| ServerError::InitializeError(e.to_string()))?;
        Ok(Self { api, accounting_currency: config.accounting_currency.clone() })
    }
}

impl CatalogLookup for RemoteReference {
    async fn fetch_project(&self, id: &str) -> Result<Option<Project>, CatalogError> {
        self.api.get_optional(&format!("/projects/{id}"), &[]).await.map_err(|e| CatalogError::ServiceError(e.to_string()))
    }

    async fn fetch_merchant(&self, id: &str) -> Result<Option<Merchant>, CatalogError> {
        self.api.get_optional(&format!("/merchants/{id}"), &[]).await.map_err(|e| CatalogError::ServiceError(e.to_string()))
    }

    async fn fetch_payment_method(&self, id: &str) -> Result<Option<PaymentMethod>, CatalogError> {
        self.api
            .get_optional(&format!("/payment-methods/{id}"), &[])
            .await
            .map_err(|e| CatalogError::ServiceError(e.to_string()))
    }

    async fn fetch_payment_methods_for_currency(&self, currency: &str) -> Result<Vec<PaymentMethod>, CatalogError> {
        self.api
            .get("/payment-methods", &[("currency", currency)])
            .await
            .map_err(|e| CatalogError::ServiceError(e.to_string()))
    }

    async fn fetch_country(&self, iso_code: &str) -> Result<Option<Country>, CatalogError> {
        self.api
            .get_optional(&format!("/countries/{iso_code}"), &[])
            .await
            .map_err(|e| CatalogError::ServiceError(e.to_string()))
    }

    async fn fetch_price_group(&self, id: &str) -> Result<Option<PriceGroup>, CatalogError> {
        self.api
            .get_optional(&format!("/price-groups/{id}"), &[])
            .await
            .map_err(|e| CatalogError::ServiceError(e.to_string()))
    }

    async fn fetch_products(&self, merchant_id: &str, ids: &[String]) -> Result<Vec<Product>, CatalogError> {
        let ids = ids.join(",");
        self.api
            .get("/products", &[("merchant_id", merchant_id), ("ids", ids.as_str())])
            .await
            .map_err(|e| CatalogError::ServiceError(e.to_string()))
    }

    async fn fetch_bin(&self, bin: i64) -> Result<Option<BinRecord>, CatalogError> {
        self.api.get_optional(&format!("/bins/{bin}"), &[]).await.map_err(|e| CatalogError::ServiceError(e.to_string()))
    }
}

impl CostRates for RemoteReference {
    async fn channel_costs_system(
        &self,
        name: &str,
        region: &str,
    ) -> Result<Vec<PaymentChannelCostSystem>, CostRateError> {
        self.api
            .get("/tariffs/channel-costs/system", &[
                ("name", name),
                ("region", region),
                ("accounting_currency", self.accounting_currency.as_str()),
            ])
            .await
            .map_err(|e| CostRateError::ServiceError(e.to_string()))
    }

    async fn channel_costs_merchant(
        &self,
        merchant_id: &str,
        name: &str,
        payout_currency: &str,
        region: &str,
    ) -> Result<Vec<PaymentChannelCostMerchant>, CostRateError> {
        self.api
            .get("/tariffs/channel-costs/merchant", &[
                ("merchant_id", merchant_id),
                ("name", name),
                ("payout_currency", payout_currency),
                ("region", region),
                ("accounting_currency", self.accounting_currency.as_str()),
            ])
            .await
            .map_err(|e| CostRateError::ServiceError(e.to_string()))
    }

    async fn money_back_costs_system(
        &self,
        name: &str,
        payout_currency: &str,
        undo_reason: UndoReason,
        region: &str,
    ) -> Result<Vec<MoneyBackCostSystem>, CostRateError> {
        self.api
            .get("/tariffs/money-back-costs/system", &[
                ("name", name),
                ("payout_currency", payout_currency),
                ("undo_reason", undo_reason_param(undo_reason)),
                ("region", region),
                ("accounting_currency", self.accounting_currency.as_str()),
            ])
            .await
            .map_err(|e| CostRateError::ServiceError(e.to_string()))
    }

    async fn money_back_costs_merchant(
        &self,
        merchant_id: &str,
        name: &str,
        payout_currency: &str,
        undo_reason: UndoReason,
        region: &str,
    ) -> Result<Vec<MoneyBackCostMerchant>, CostRateError> {
        self.api
            .get("/tariffs/money-back-costs/merchant", &[
                ("merchant_id", merchant_id),
                ("name", name),
                ("payout_currency", payout_currency),
                ("undo_reason", undo_reason_param(undo_reason)),
                ("region", region),
                ("accounting_currency", self.accounting_currency.as_str()),
            ])
            .await
            .map_err(|e| CostRateError::ServiceError(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ConvertedAmount {
    amount: Money,
}

impl CurrencyExchange for RemoteReference {
    async fn convert(&self, from: &str, to: &str, amount: Money, source: RateSource) -> Result<Money, ExchangeError> {
        let source = match source {
            RateSource::Stock => "stock",
            RateSource::CentralBank => "central_bank",
        };
        let amount = amount.to_string();
        let converted: ConvertedAmount = self
            .api
            .get("/rates/convert", &[("from", from), ("to", to), ("amount", amount.as_str()), ("source", source)])
            .await
            .map_err(|e| match e {
                RemoteApiError::QueryError { status: 404, .. } => {
                    ExchangeError::RateNotAvailable(from.to_string(), to.to_string())
                },
                e => ExchangeError::ServiceError(e.to_string()),
            })?;
        Ok(converted.amount)
    }

    async fn convert_for_merchant(
        &self,
        from: &str,
        to: &str,
        amount: Money,
        side: ConversionSide,
    ) -> Result<Money, ExchangeError> {
        let side = match side {
            ConversionSide::Credit => "credit",
            ConversionSide::Debit => "debit",
        };
        let amount = amount.to_string();
        let converted: ConvertedAmount = self
            .api
            .get("/rates/convert-for-merchant", &[("from", from), ("to", to), ("amount", amount.as_str()), ("side", side)])
            .await
            .map_err(|e| match e {
                RemoteApiError::QueryError { status: 404, .. } => {
                    ExchangeError::RateNotAvailable(from.to_string(), to.to_string())
                },
                e => ExchangeError::ServiceError(e.to_string()),
            })?;
        Ok(converted.amount)
    }
}

impl TaxRates for RemoteReference {
    async fn rate_for(&self, country: &str, zip: Option<&str>) -> Result<ResolvedTax, TaxError> {
        let mut params = vec![("country", country)];
        if let Some(zip) = zip {
            params.push(("zip", zip));
        }
        self.api.get("/tax-rates", &params).await.map_err(|e| {
            if e.is_not_found() {
                TaxError::RateNotFound(country.to_string())
            } else {
                TaxError::ServiceError(e.to_string())
            }
        })
    }
}

impl GeoIp for RemoteReference {
    async fn locate(&self, ip: &str) -> Result<Option<GeoLocation>, GeoError> {
        self.api.get_optional(&format!("/geo/{ip}"), &[]).await.map_err(|e| GeoError::ServiceError(e.to_string()))
    }
}

//--------------------------------------   Payment gateway   ---------------------------------------------------------

/// Client for the payment gateway's submission API. Gateway 4xx answers are final rejections;
/// network failures and 5xx answers are reported as retryable.
#[derive(Clone)]
pub struct RemoteGateway {
    api: RemoteApi,
}

impl RemoteGateway {
    pub fn new(config: &ServerConfig) -> Result<Self, ServerError> {
        let api = RemoteApi::new(&config.gateway_url, Some(&config.gateway_token))
            .map_err(|e| ServerError::InitializeError(e.to_string()))?;
        Ok(Self { api })
    }
}

fn gateway_error(e: RemoteApiError) -> GatewayError {
    match e {
        RemoteApiError::QueryError { status, message } if status < 500 => GatewayError::Rejected(message),
        e => GatewayError::Unavailable(e.to_string()),
    }
}

impl PaymentGatewayClient for RemoteGateway {
    async fn create_payment(&self, request: GatewayPaymentRequest) -> Result<GatewayPaymentSession, GatewayError> {
        debug!("Submitting payment for order {} to the gateway", request.order_uuid);
        self.api.post("/payments", &request).await.map_err(gateway_error)
    }

    async fn create_refund(&self, request: GatewayRefundRequest) -> Result<GatewayRefundAccepted, GatewayError> {
        debug!("Submitting refund {} to the gateway", request.refund_id);
        self.api.post("/refunds", &request).await.map_err(gateway_error)
    }
}

//--------------------------------------   Side-effect services  -----------------------------------------------------

/// Client for the side-effect services: merchant webhooks, customer notifications, the key
/// inventory and the card vault.
#[derive(Clone)]
pub struct RemoteServices {
    api: RemoteApi,
}

impl RemoteServices {
    pub fn new(config: &ServerConfig) -> Result<Self, ServerError> {
        let api = RemoteApi::new(&config.services_url, None).map_err(|e| ServerError::InitializeError(e.to_string()))?;
        Ok(Self { api })
    }
}

impl Notifier for RemoteServices {
    async fn notify_merchant(&self, order: &Order, status: PublicOrderStatus) -> Result<(), NotifyError> {
        let Some(url) = order.project.notify_url.as_deref() else {
            debug!("Project {} has no notify URL; skipping merchant webhook for order {}", order.project.id, order.id);
            return Ok(());
        };
        let payload = serde_json::json!({
            "order_id": order.id,
            "order_uuid": order.uuid,
            "project_order_id": order.project_order_id,
            "status": status,
            "amount": order.total_payment_amount,
            "currency": order.currency,
        });
        self.api.post_url(url, &payload).await.map_err(|e| NotifyError::DeliveryFailed(e.to_string()))
    }

    async fn notify_customer(&self, order: &Order, status: PublicOrderStatus) -> Result<(), NotifyError> {
        let Some(email) = order.user.email.as_deref() else {
            debug!("Order {} has no payer email; skipping customer notification", order.id);
            return Ok(());
        };
        let payload = serde_json::json!({
            "email": email,
            "order_id": order.id,
            "status": status,
            "receipt_id": order.receipt_id,
        });
        self.api.post_no_content("/notifications/customer", &payload).await.map_err(|e| NotifyError::DeliveryFailed(e.to_string()))
    }

    async fn notify_refund(&self, order: &Order, refund: &Refund) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "order_id": order.id,
            "refund_id": refund.id,
            "amount": refund.amount,
            "currency": refund.currency,
            "is_chargeback": refund.is_chargeback,
        });
        self.api.post_no_content("/notifications/refund", &payload).await.map_err(|e| NotifyError::DeliveryFailed(e.to_string()))
    }
}

impl KeyInventory for RemoteServices {
    async fn reserve_key(&self, order_id: &str, product_id: &str, platform_id: &str) -> Result<(), KeyInventoryError> {
        let payload = serde_json::json!({
            "order_id": order_id,
            "product_id": product_id,
            "platform_id": platform_id,
        });
        self.api.post_no_content("/keys/reservations", &payload).await.map_err(|e| match e {
            // The inventory answers 409 when the platform has no keys left for the product.
            RemoteApiError::QueryError { status: 409, .. } => {
                KeyInventoryError::OutOfStock(product_id.to_string(), platform_id.to_string())
            },
            e => KeyInventoryError::ServiceError(e.to_string()),
        })
    }

    async fn finalize_reservations(&self, order_id: &str) -> Result<(), KeyInventoryError> {
        self.api
            .post_no_content(&format!("/keys/reservations/{order_id}/finalize"), &serde_json::json!({}))
            .await
            .map_err(|e| KeyInventoryError::ServiceError(e.to_string()))
    }

    async fn cancel_reservations(&self, order_id: &str) -> Result<(), KeyInventoryError> {
        self.api
            .post_no_content(&format!("/keys/reservations/{order_id}/cancel"), &serde_json::json!({}))
            .await
            .map_err(|e| KeyInventoryError::ServiceError(e.to_string()))
    }
}

impl CardVault for RemoteServices {
    async fn store_card(
        &self,
        user_id: &str,
        masked_pan: &str,
        expiry_month: &str,
        expiry_year: &str,
        fingerprint: &str,
    ) -> Result<(), CardVaultError> {
        let payload = serde_json::json!({
            "user_id": user_id,
            "masked_pan": masked_pan,
            "expiry_month": expiry_month,
            "expiry_year": expiry_year,
            "fingerprint": fingerprint,
        });
        self.api.post_no_content("/cards", &payload).await.map_err(|e| CardVaultError::ServiceError(e.to_string()))
    }
}
