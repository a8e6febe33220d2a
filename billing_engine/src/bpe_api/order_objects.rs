//! Request and response objects of the billing API.
//!
//! Responses follow one envelope convention: a [`ResponseStatus`], an optional
//! [`DomainMessage`] when the status is not `Ok`, and the payload. Business rejections are
//! transport successes; the message carries the stable error code for the merchant integration.

use bpg_common::Money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{
        Address,
        Merchant,
        Order,
        OrderItem,
        OrderUser,
        PaymentMethod,
        PaymentMethodKind,
        Product,
        ProductType,
        Project,
        Refund,
    },
    errors::{BillingError, CallbackStatus, DomainMessage, ResponseStatus},
};

//--------------------------------------   Order creation    ---------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestUser {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub project_id: String,
    /// Merchant-side order identifier. Unique per project when supplied.
    #[serde(default)]
    pub project_order_id: Option<String>,
    #[serde(default)]
    pub product_type: Option<ProductType>,
    #[serde(default)]
    pub amount: Option<Money>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Catalog product ids for `product` and `key` orders.
    #[serde(default)]
    pub products: Vec<String>,
    /// Requested key platform, e.g. `steam`.
    #[serde(default)]
    pub platform_id: Option<String>,
    #[serde(default)]
    pub payment_method_id: Option<String>,
    #[serde(default)]
    pub user: Option<RequestUser>,
    #[serde(default)]
    pub notify_url: Option<String>,
    #[serde(default)]
    pub redirect_success_url: Option<String>,
    #[serde(default)]
    pub redirect_fail_url: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

impl CreateOrderRequest {
    /// The effective product type: the explicit one, else inferred from the request shape.
    pub fn effective_product_type(&self) -> ProductType {
        self.product_type.unwrap_or(if self.products.is_empty() { ProductType::Simple } else { ProductType::Product })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<DomainMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
}

impl OrderResponse {
    pub fn ok(order: Order) -> Self {
        Self { status: ResponseStatus::Ok, message: None, order: Some(order) }
    }

    pub fn rejected(error: BillingError) -> Self {
        Self { status: error.response_status(), message: Some(error.message()), order: None }
    }
}

/// Validated intermediate state of the checkout pipeline. Lives for the duration of one request
/// and is never persisted; the persisted [`Order`] is assembled from it in the final step.
#[derive(Debug, Clone)]
pub struct OrderCreateChecked {
    pub project: Project,
    pub merchant: Merchant,
    pub product_type: ProductType,
    pub currency: String,
    /// Net amount before tax, in `currency`.
    pub amount: Money,
    pub items: Vec<OrderItem>,
    pub platform_id: Option<String>,
    pub virtual_currency_amount: Option<Money>,
    pub user: OrderUser,
    pub payment_method: Option<PaymentMethod>,
    pub products: Vec<Product>,
}

//--------------------------------------  Payment form data  ---------------------------------------------------------

/// Context the hosted payment form reports when it loads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormDataRequest {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub referer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormPaymentMethod {
    pub id: String,
    pub name: String,
    pub kind: PaymentMethodKind,
    /// The order total expressed in this method's charge currency.
    pub amount: Money,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_regexp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormDataResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<DomainMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_uuid: Option<String>,
    #[serde(default)]
    pub amount: Option<Money>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub methods: Vec<FormPaymentMethod>,
    #[serde(default)]
    pub user_country: Option<String>,
    #[serde(default)]
    pub user_locale: Option<String>,
    /// The form must ask the payer to confirm their billing address before payment.
    #[serde(default)]
    pub user_address_data_required: bool,
}

impl FormDataResponse {
    pub fn rejected(error: BillingError) -> Self {
        Self {
            status: error.response_status(),
            message: Some(error.message()),
            order_uuid: None,
            amount: None,
            currency: None,
            methods: Vec::new(),
            user_country: None,
            user_locale: None,
            user_address_data_required: false,
        }
    }
}

//--------------------------------------   Form mutations    ---------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingAddressRequest {
    pub country: String,
    #[serde(default)]
    pub zip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAmounts {
    pub order_amount: Money,
    pub tax_amount: Money,
    pub total_payment_amount: Money,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingAddressResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<DomainMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amounts: Option<OrderAmounts>,
}

impl BillingAddressResponse {
    pub fn ok(amounts: OrderAmounts) -> Self {
        Self { status: ResponseStatus::Ok, message: None, amounts: Some(amounts) }
    }

    pub fn rejected(error: BillingError) -> Self {
        Self { status: error.response_status(), message: Some(error.message()), amounts: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageRequest {
    pub lang: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAccountRequest {
    pub method_id: String,
    pub account: String,
}

/// Envelope for operations with no payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<DomainMessage>,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self { status: ResponseStatus::Ok, message: None }
    }

    pub fn rejected(error: BillingError) -> Self {
        Self { status: error.response_status(), message: Some(error.message()) }
    }
}

//--------------------------------------   Payment create    ---------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentCreateRequest {
    /// Required when the order was created without a pre-selected method.
    #[serde(default)]
    pub method_id: Option<String>,
    /// Card PAN, e-wallet account or crypto address, depending on the method kind.
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub card_holder: Option<String>,
    #[serde(default)]
    pub expiry_month: Option<String>,
    #[serde(default)]
    pub expiry_year: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// The payer asked for the card to be kept for recurring payments.
    #[serde(default)]
    pub store_card: bool,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCreateResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<DomainMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub need_redirect: bool,
}

impl PaymentCreateResponse {
    pub fn ok(redirect_url: String, need_redirect: bool) -> Self {
        Self { status: ResponseStatus::Ok, message: None, redirect_url: Some(redirect_url), need_redirect }
    }

    pub fn rejected(error: BillingError) -> Self {
        Self { status: error.response_status(), message: Some(error.message()), redirect_url: None, need_redirect: false }
    }
}

/// Validated intermediate state of payment creation. Request-scoped, never persisted.
#[derive(Debug, Clone)]
pub struct PaymentCreateChecked {
    pub order: Order,
    pub project: Project,
    pub merchant: Merchant,
    pub method: PaymentMethod,
    pub terminal_id: String,
    pub account: Option<String>,
    pub tax_rate: Decimal,
    pub billing_address: Option<Address>,
}

//--------------------------------------       Refunds       ---------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRefundRequest {
    pub amount: Money,
    #[serde(default)]
    pub reason: String,
    pub creator_id: String,
    #[serde(default)]
    pub is_chargeback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<DomainMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund: Option<Refund>,
}

impl RefundResponse {
    pub fn ok(refund: Refund) -> Self {
        Self { status: ResponseStatus::Ok, message: None, refund: Some(refund) }
    }

    pub fn rejected(error: BillingError) -> Self {
        Self { status: error.response_status(), message: Some(error.message()), refund: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundListResponse {
    pub count: i64,
    pub items: Vec<Refund>,
}

//--------------------------------------      Callbacks      ---------------------------------------------------------

/// The body answered to a gateway callback. `Temporary` is a transport success with an advisory
/// error string so the gateway stops retrying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackResponse {
    pub status: CallbackStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallbackResponse {
    pub fn ok() -> Self {
        Self { status: CallbackStatus::Ok, error: None }
    }

    pub fn validation_error(error: impl Into<String>) -> Self {
        Self { status: CallbackStatus::ErrorValidation, error: Some(error.into()) }
    }

    pub fn system_error(error: impl Into<String>) -> Self {
        Self { status: CallbackStatus::ErrorSystem, error: Some(error.into()) }
    }

    pub fn temporary(error: impl Into<String>) -> Self {
        Self { status: CallbackStatus::Temporary, error: Some(error.into()) }
    }
}
