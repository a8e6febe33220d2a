//! Payment gateway adapters.
//!
//! Each supported gateway gets a [`GatewayKind`] member that knows how to authenticate and parse
//! that gateway's asynchronous notifications. The rest of the engine only ever sees the normalised
//! [`PaymentNotification`] / [`RefundNotification`] shapes and the [`CallbackOutcome`] extracted
//! from them; gateway-specific field names and decline codes stop here.

use bpg_common::Money;
use serde::{Deserialize, Serialize};

use crate::{
    errors::{BillingError, DeclineCode},
    helpers::signature,
};

/// The closed set of gateway integrations. Callback routes carry the handler name in the path and
/// resolve it through [`GatewayKind::from_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayKind {
    CardPay,
}

impl GatewayKind {
    pub fn from_handler(handler: &str) -> Option<Self> {
        match handler {
            "cardpay" => Some(Self::CardPay),
            _ => None,
        }
    }

    pub fn handler(&self) -> &'static str {
        match self {
            Self::CardPay => "cardpay",
        }
    }

    /// Authenticates a raw callback body against the project's callback secret.
    pub fn verify_signature(&self, body: &[u8], secret: &str, claimed: &str) -> Result<(), BillingError> {
        match self {
            Self::CardPay => signature::verify(body, secret, claimed),
        }
    }

    /// Parses a payment notification body. The signature must be checked first; this only deals
    /// with the payload shape.
    pub fn parse_payment_callback(&self, body: &[u8]) -> Result<PaymentNotification, BillingError> {
        match self {
            Self::CardPay => {
                serde_json::from_slice(body).map_err(|_| BillingError::CallbackRequestIncorrect)
            },
        }
    }

    pub fn parse_refund_callback(&self, body: &[u8]) -> Result<RefundNotification, BillingError> {
        match self {
            Self::CardPay => {
                serde_json::from_slice(body).map_err(|_| BillingError::CallbackRequestIncorrect)
            },
        }
    }
}

/// Transaction statuses a gateway can report. `Authorized` is a hold without capture and does not
/// settle the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Authorized,
    Completed,
    Declined,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantOrderRef {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationCustomer {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclineDetails {
    pub code: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// The transaction block of a payment notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentData {
    pub id: String,
    pub amount: Money,
    pub currency: String,
    pub status: TransactionStatus,
    #[serde(default)]
    pub auth_code: Option<String>,
    #[serde(default)]
    pub is_3d: bool,
    #[serde(default)]
    pub rrn: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub decline: Option<DeclineDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub merchant_order: MerchantOrderRef,
    pub payment_method: String,
    pub payment_data: PaymentData,
    #[serde(default)]
    pub callback_time: Option<String>,
    #[serde(default)]
    pub customer: Option<NotificationCustomer>,
}

/// The transaction block of a refund notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundData {
    pub id: String,
    pub amount: Money,
    pub currency: String,
    pub status: TransactionStatus,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub decline: Option<DeclineDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundNotification {
    pub merchant_order: MerchantOrderRef,
    pub payment_method: String,
    pub refund_data: RefundData,
    #[serde(default)]
    pub callback_time: Option<String>,
}

/// The normalised result of a gateway notification after gateway-specific codes are mapped onto
/// the platform catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The transaction settled.
    Success,
    /// The transaction was declined. `canceled` distinguishes a customer cancellation from a
    /// bank decline.
    Declined { code: DeclineCode, canceled: bool },
    /// An intermediate status. Acknowledged so the gateway stops retrying, but the order state
    /// must not change.
    Temporary,
}

impl PaymentNotification {
    pub fn outcome(&self) -> CallbackOutcome {
        outcome_of(self.payment_data.status, self.payment_data.decline.as_ref())
    }
}

impl RefundNotification {
    pub fn outcome(&self) -> CallbackOutcome {
        outcome_of(self.refund_data.status, self.refund_data.decline.as_ref())
    }
}

fn outcome_of(status: TransactionStatus, decline: Option<&DeclineDetails>) -> CallbackOutcome {
    match status {
        TransactionStatus::Completed => CallbackOutcome::Success,
        TransactionStatus::Authorized => CallbackOutcome::Temporary,
        TransactionStatus::Declined => CallbackOutcome::Declined {
            code: decline.map(|d| map_decline_code(&d.code)).unwrap_or(DeclineCode::DeclinedByBankWithoutReason),
            canceled: false,
        },
        TransactionStatus::Cancelled => {
            CallbackOutcome::Declined { code: DeclineCode::CancelledByCustomer, canceled: true }
        },
    }
}

/// CardPay decline codes mapped onto the platform catalog. Unknown codes fall back to the generic
/// bank decline.
fn map_decline_code(code: &str) -> DeclineCode {
    use DeclineCode::*;
    match code {
        "01" => SystemMalfunction,
        "02" => CancelledByCustomer,
        "03" => DeclinedByAntiFraud,
        "04" => DeclinedBy3DSecure,
        "05" => Only3DSecureTransactionsAllowed,
        "06" => ThreeDSecureAvailabilityUnknown,
        "07" => LimitReached,
        "08" => OperationNotSupported,
        "10" => DeclinedByBankWithoutReason,
        "11" => CommonDeclineByBank,
        "13" => InsufficientFunds,
        "14" => CardLimitReached,
        "15" => IncorrectCardData,
        "16" => DeclinedByBankAntiFraud,
        "17" => BanksMalfunction,
        "18" => ConnectionProblem,
        "21" => NoPaymentWasReceived,
        "22" => WrongPaymentWasReceived,
        "23" => ConfirmationsPaymentTimeout,
        _ => DeclinedByBankWithoutReason,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const PAYMENT_OK: &str = r#"{
        "merchant_order": {"id": "254e1736-a7b9-4c43-975d-cbde9f55ce02"},
        "payment_method": "BANKCARD",
        "payment_data": {
            "id": "ext-tx-001",
            "amount": "12",
            "currency": "USD",
            "status": "COMPLETED",
            "auth_code": "025682",
            "is_3d": true,
            "rrn": "918374539809",
            "created": "2026-08-29T10:00:00Z"
        },
        "callback_time": "2026-08-29T10:00:01Z",
        "customer": {"email": "payer@example.com", "id": "ext-customer-1"}
    }"#;

    #[test]
    fn unknown_handler_is_rejected() {
        assert_eq!(GatewayKind::from_handler("cardpay"), Some(GatewayKind::CardPay));
        assert!(GatewayKind::from_handler("wirecard").is_none());
    }

    #[test]
    fn completed_payment_parses_to_success() {
        let n = GatewayKind::CardPay.parse_payment_callback(PAYMENT_OK.as_bytes()).unwrap();
        assert_eq!(n.merchant_order.id, "254e1736-a7b9-4c43-975d-cbde9f55ce02");
        assert_eq!(n.payment_data.status, TransactionStatus::Completed);
        assert_eq!(n.payment_data.auth_code.as_deref(), Some("025682"));
        assert_eq!(n.outcome(), CallbackOutcome::Success);
    }

    #[test]
    fn authorized_status_is_temporary() {
        let body = PAYMENT_OK.replace("COMPLETED", "AUTHORIZED");
        let n = GatewayKind::CardPay.parse_payment_callback(body.as_bytes()).unwrap();
        assert_eq!(n.outcome(), CallbackOutcome::Temporary);
    }

    #[test]
    fn decline_codes_map_to_catalog() {
        let body = r#"{
            "merchant_order": {"id": "o-1"},
            "payment_method": "BANKCARD",
            "payment_data": {
                "id": "ext-tx-002",
                "amount": "12",
                "currency": "USD",
                "status": "DECLINED",
                "decline": {"code": "13", "reason": "Insufficient funds"}
            }
        }"#;
        let n = GatewayKind::CardPay.parse_payment_callback(body.as_bytes()).unwrap();
        assert_eq!(n.outcome(), CallbackOutcome::Declined { code: DeclineCode::InsufficientFunds, canceled: false });
    }

    #[test]
    fn cancellation_sets_canceled_flag() {
        let body = PAYMENT_OK.replace("COMPLETED", "CANCELLED");
        let n = GatewayKind::CardPay.parse_payment_callback(body.as_bytes()).unwrap();
        assert_eq!(n.outcome(), CallbackOutcome::Declined { code: DeclineCode::CancelledByCustomer, canceled: true });
    }

    #[test]
    fn refund_notification_parses() {
        let body = r#"{
            "merchant_order": {"id": "o-1"},
            "payment_method": "BANKCARD",
            "refund_data": {
                "id": "ext-refund-001",
                "amount": "10",
                "currency": "USD",
                "status": "COMPLETED"
            }
        }"#;
        let n = GatewayKind::CardPay.parse_refund_callback(body.as_bytes()).unwrap();
        assert_eq!(n.refund_data.id, "ext-refund-001");
        assert_eq!(n.outcome(), CallbackOutcome::Success);
    }

    #[test]
    fn malformed_body_is_a_callback_error() {
        let err = GatewayKind::CardPay.parse_payment_callback(b"not json").unwrap_err();
        assert_eq!(err, BillingError::CallbackRequestIncorrect);
    }
}
