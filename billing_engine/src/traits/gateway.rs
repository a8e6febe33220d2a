use bpg_common::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::OrderUuid;

/// The payment request handed to the gateway once an order has passed payment-create validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPaymentRequest {
    pub order_uuid: OrderUuid,
    pub amount: Money,
    pub currency: String,
    /// Identifier of the payment method on the gateway side, e.g. `BANKCARD`.
    pub method_external_id: String,
    /// The merchant terminal configured for the order currency.
    pub terminal_id: String,
    pub description: String,
    /// E-wallet account or crypto address, when the method requires one up front.
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub return_url: Option<String>,
}

/// What the gateway answers to a successful payment submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPaymentSession {
    pub redirect_url: String,
    pub need_redirect: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRefundRequest {
    pub refund_id: String,
    pub order_uuid: OrderUuid,
    /// The gateway's transaction id of the original payment, when known.
    #[serde(default)]
    pub gateway_payment_id: Option<String>,
    pub amount: Money,
    pub currency: String,
    pub terminal_id: String,
    pub is_chargeback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRefundAccepted {
    /// The refund's identifier on the gateway side.
    pub external_id: String,
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The gateway understood and rejected the request. Not retryable.
    #[error("The payment system rejected the request: {0}")]
    Rejected(String),
    /// The gateway could not be reached or answered garbage. Retryable by the caller.
    #[error("The payment system is unavailable: {0}")]
    Unavailable(String),
}

/// Outbound calls to the payment gateway. Inbound notifications arrive over the callback routes
/// and are decoded by the adapters in [`crate::gateways`]; they never go through this trait.
#[allow(async_fn_in_trait)]
pub trait PaymentGatewayClient {
    async fn create_payment(&self, request: GatewayPaymentRequest) -> Result<GatewayPaymentSession, GatewayError>;

    async fn create_refund(&self, request: GatewayRefundRequest) -> Result<GatewayRefundAccepted, GatewayError>;
}
