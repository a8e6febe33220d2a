//! The domain error registry.
//!
//! Business-rule violations are not transport failures. Every expected failure of the checkout,
//! payment or refund flows maps onto a member of [`BillingError`], a closed catalog in which each
//! member carries a stable `(code, message)` pair. The codes are part of the public contract:
//! merchant integrations match on them, so they never change and are never reused.
//!
//! Transport-level failures (store unavailable, collaborator down) are carried by the per-trait
//! error enums in [`crate::traits`] and surface as 5xx responses instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed set of outcome statuses a domain operation can resolve to. Reported inside a
/// successful transport response, alongside a [`DomainMessage`] when not `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Ok = 200,
    BadData = 400,
    Forbidden = 403,
    NotFound = 404,
    Gone = 410,
    SystemError = 500,
}

impl ResponseStatus {
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }
}

/// Outcome codes for gateway callback processing. `Temporary` reports transport success so the
/// gateway stops retrying, while the order state is deliberately left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallbackStatus {
    Ok = 0,
    ErrorValidation = 1,
    ErrorSystem = 2,
    Temporary = 4,
}

/// The stable `(code, message)` pair reported to callers for a domain error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainMessage {
    pub code: String,
    pub message: String,
}

/// The catalog of domain errors. Constructed once, never mutated; each variant's code is frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BillingError {
    #[error("project identifier is incorrect")]
    ProjectIdIncorrect,
    #[error("project with specified identifier not found")]
    ProjectNotFound,
    #[error("project with specified identifier is inactive")]
    ProjectInactive,
    #[error("merchant for project with specified identifier is inactive")]
    ProjectMerchantInactive,
    #[error("payment method not available for project")]
    PaymentMethodNotAllowed,
    #[error("payment method with specified identifier not found")]
    PaymentMethodNotFound,
    #[error("payment method with specified identifier is inactive")]
    PaymentMethodInactive,
    #[error("currency conversion error")]
    CurrencyConversion,
    #[error("payment method setting for project is empty")]
    PaymentMethodEmptySettings,
    #[error("payment system for specified payment method is inactive")]
    PaymentSystemInactive,
    #[error("payer region can't be found")]
    PayerRegionUnknown,
    #[error("request with specified project order identifier processed early")]
    ProjectOrderIdDuplicate,
    #[error("dynamic notify url not allowed for project")]
    DynamicNotifyUrlsNotAllowed,
    #[error("dynamic payer redirect urls not allowed for project")]
    DynamicRedirectUrlsNotAllowed,
    #[error("currency received from request not found")]
    CurrencyNotFound,
    #[error("order amount is lower than min allowed payment amount for project")]
    AmountLowerThanMinAllowed,
    #[error("order amount is greater than max allowed payment amount for project")]
    AmountGreaterThanMaxAllowed,
    #[error("order amount is lower than min allowed payment amount for payment method")]
    AmountLowerThanMinAllowedMethod,
    #[error("order amount is greater than max allowed payment amount for payment method")]
    AmountGreaterThanMaxAllowedMethod,
    #[error("order can't create. try request later")]
    OrderCanNotCreate,
    #[error("order with specified identifier not found")]
    OrderNotFound,
    #[error("order created for another project")]
    OrderCreatedAnotherProject,
    #[error("time to enter data on payment form expired")]
    FormInputTimeExpired,
    #[error("parameter currency in create order request is required")]
    CurrencyIsRequired,
    #[error("unknown error. try request later")]
    Unknown,
    #[error("payments from your country are not allowed")]
    CountryPaymentsRestricted,
    #[error("information about user country can't be found")]
    CountryNotFound,
    #[error("account in payment system is incorrect")]
    PaymentAccountIncorrect,
    #[error("products set is empty")]
    ProductsEmpty,
    #[error("some products in set are invalid or inactive")]
    ProductsInvalid,
    #[error("no common prices neither in requested currency nor in default currency")]
    NoProductsCommonCurrency,
    #[error("merchant for project with specified identifier not found")]
    ProjectMerchantNotFound,
    #[error("email is required")]
    EmailRequired,
    #[error("required field with order identifier not found")]
    PaymentFieldOrderIdNotFound,
    #[error("required field with payment method identifier not found")]
    PaymentFieldMethodNotFound,
    #[error("user country is required")]
    PaymentFieldUserCountryNotFound,
    #[error("user zip is required")]
    PaymentFieldUserZipNotFound,
    #[error("order with specified identifier payed early")]
    OrderAlreadyComplete,
    #[error("request signature is invalid")]
    SignatureInvalid,
    #[error("can't get product price")]
    ProductsPrice,
    #[error("order products not specified")]
    CheckoutWithoutProducts,
    #[error("order amount not specified")]
    CheckoutWithoutAmount,
    #[error("request to process simple payment can't contain products list")]
    CheckoutWithProducts,
    #[error("unknown type of order")]
    UnknownOrderType,
    #[error("merchant doesn't have tariffs")]
    MerchantBadTariffs,
    #[error("no available platforms")]
    NoPlatforms,
    #[error("settings to calculate commissions not found")]
    CostsRatesNotFound,
    #[error("billing address country can't be changed for this order")]
    BillingAddressChangeRestricted,
    #[error("virtual currency is not filled")]
    VirtualCurrencyNotFilled,
    #[error("fractional numbers are not supported for this virtual currency")]
    VirtualCurrencyFracNotSupported,
    #[error("amount of order is more than max amount or less than minimal amount for virtual currency")]
    VirtualCurrencyLimits,
    #[error("request for create payment by project virtual currency must contain user data with required field country")]
    VirtualCurrencyUserCountryRequired,
    #[error("virtual currency doesn't have price in order currency")]
    VirtualCurrencyNoPrice,
    #[error("refund is not allowed for this order")]
    RefundNotAllowed,
    #[error("order already fully refunded")]
    RefundAlreadyRefunded,
    #[error("refund amount exceeds the remaining refundable amount of the order")]
    RefundAmountExceedsRemaining,
    #[error("refund with specified identifier not found")]
    RefundNotFound,
    #[error("order for refund not found")]
    RefundOrderNotFound,
    #[error("settings to calculate refund commissions not found")]
    RefundCostsRatesNotFound,
    #[error("refund was rejected by the payment system")]
    RefundRejectedByGateway,
    #[error("callback handler not found")]
    CallbackHandlerNotFound,
    #[error("callback request body is incorrect")]
    CallbackRequestIncorrect,
}

impl BillingError {
    /// The stable registry code for this error. Frozen; codes are never reused.
    pub fn code(&self) -> &'static str {
        use BillingError::*;
        match self {
            ProjectIdIncorrect => "fm000001",
            ProjectNotFound => "fm000002",
            ProjectInactive => "fm000003",
            ProjectMerchantInactive => "fm000004",
            PaymentMethodNotAllowed => "fm000005",
            PaymentMethodNotFound => "fm000006",
            PaymentMethodInactive => "fm000007",
            CurrencyConversion => "fm000008",
            PaymentMethodEmptySettings => "fm000009",
            PaymentSystemInactive => "fm000010",
            PayerRegionUnknown => "fm000011",
            ProjectOrderIdDuplicate => "fm000012",
            DynamicNotifyUrlsNotAllowed => "fm000013",
            DynamicRedirectUrlsNotAllowed => "fm000014",
            CurrencyNotFound => "fm000015",
            AmountLowerThanMinAllowed => "fm000016",
            AmountGreaterThanMaxAllowed => "fm000017",
            AmountLowerThanMinAllowedMethod => "fm000018",
            AmountGreaterThanMaxAllowedMethod => "fm000019",
            OrderCanNotCreate => "fm000020",
            OrderNotFound => "fm000021",
            OrderCreatedAnotherProject => "fm000022",
            FormInputTimeExpired => "fm000023",
            CurrencyIsRequired => "fm000024",
            Unknown => "fm000025",
            CountryPaymentsRestricted => "fm000027",
            CountryNotFound => "fm000029",
            PaymentAccountIncorrect => "fm000030",
            ProductsEmpty => "fm000031",
            ProductsInvalid => "fm000032",
            NoProductsCommonCurrency => "fm000033",
            ProjectMerchantNotFound => "fm000038",
            EmailRequired => "fm000041",
            PaymentFieldOrderIdNotFound => "fm000042",
            PaymentFieldMethodNotFound => "fm000043",
            PaymentFieldUserCountryNotFound => "fm000045",
            PaymentFieldUserZipNotFound => "fm000046",
            OrderAlreadyComplete => "fm000047",
            SignatureInvalid => "fm000048",
            ProductsPrice => "fm000051",
            CheckoutWithoutProducts => "fm000052",
            CheckoutWithoutAmount => "fm000053",
            UnknownOrderType => "fm000055",
            MerchantBadTariffs => "fm000056",
            NoPlatforms => "fm000062",
            CostsRatesNotFound => "fm000064",
            BillingAddressChangeRestricted => "fm000070",
            VirtualCurrencyNotFilled => "fm000065",
            VirtualCurrencyFracNotSupported => "fm000066",
            VirtualCurrencyLimits => "fm000067",
            VirtualCurrencyUserCountryRequired => "fm000068",
            CheckoutWithProducts => "fm000069",
            VirtualCurrencyNoPrice => "vc000001",
            RefundNotAllowed => "rf000001",
            RefundAlreadyRefunded => "rf000002",
            RefundAmountExceedsRemaining => "rf000003",
            RefundNotFound => "rf000004",
            RefundOrderNotFound => "rf000005",
            RefundCostsRatesNotFound => "rf000006",
            RefundRejectedByGateway => "rf000007",
            CallbackHandlerNotFound => "cb000001",
            CallbackRequestIncorrect => "cb000002",
        }
    }

    /// The `(code, message)` pair reported in RPC responses.
    pub fn message(&self) -> DomainMessage {
        DomainMessage { code: self.code().to_string(), message: self.to_string() }
    }

    /// The envelope status this rejection is reported under.
    pub fn response_status(&self) -> ResponseStatus {
        use BillingError::*;
        match self {
            ProjectNotFound | PaymentMethodNotFound | CurrencyNotFound | OrderNotFound | CountryNotFound |
            RefundNotFound | RefundOrderNotFound | CallbackHandlerNotFound => ResponseStatus::NotFound,
            CountryPaymentsRestricted | SignatureInvalid | OrderCreatedAnotherProject |
            BillingAddressChangeRestricted => ResponseStatus::Forbidden,
            FormInputTimeExpired => ResponseStatus::Gone,
            OrderCanNotCreate | Unknown => ResponseStatus::SystemError,
            _ => ResponseStatus::BadData,
        }
    }
}

/// Platform decline codes. Gateway-specific decline reasons are normalised onto this catalog
/// before being stored on the order's transaction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclineCode {
    SystemMalfunction,
    CancelledByCustomer,
    DeclinedByAntiFraud,
    DeclinedBy3DSecure,
    Only3DSecureTransactionsAllowed,
    ThreeDSecureAvailabilityUnknown,
    LimitReached,
    OperationNotSupported,
    DeclinedByBankWithoutReason,
    CommonDeclineByBank,
    InsufficientFunds,
    CardLimitReached,
    IncorrectCardData,
    DeclinedByBankAntiFraud,
    BanksMalfunction,
    ConnectionProblem,
    NoPaymentWasReceived,
    WrongPaymentWasReceived,
    ConfirmationsPaymentTimeout,
}

impl DeclineCode {
    pub fn code(&self) -> &'static str {
        use DeclineCode::*;
        match self {
            SystemMalfunction => "ps000001",
            CancelledByCustomer => "ps000002",
            DeclinedByAntiFraud => "ps000003",
            DeclinedBy3DSecure => "ps000004",
            Only3DSecureTransactionsAllowed => "ps000005",
            ThreeDSecureAvailabilityUnknown => "ps000006",
            LimitReached => "ps000007",
            OperationNotSupported => "ps000008",
            DeclinedByBankWithoutReason => "ps000009",
            CommonDeclineByBank => "ps000010",
            InsufficientFunds => "ps000011",
            CardLimitReached => "ps000012",
            IncorrectCardData => "ps000013",
            DeclinedByBankAntiFraud => "ps000014",
            BanksMalfunction => "ps000015",
            ConnectionProblem => "ps000016",
            NoPaymentWasReceived => "ps000017",
            WrongPaymentWasReceived => "ps000018",
            ConfirmationsPaymentTimeout => "ps000019",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(BillingError::ProjectIdIncorrect.code(), "fm000001");
        assert_eq!(BillingError::SignatureInvalid.code(), "fm000048");
        assert_eq!(BillingError::RefundAmountExceedsRemaining.code(), "rf000003");
        assert_eq!(DeclineCode::InsufficientFunds.code(), "ps000011");
    }

    #[test]
    fn message_carries_code_and_text() {
        let msg = BillingError::ProjectOrderIdDuplicate.message();
        assert_eq!(msg.code, "fm000012");
        assert_eq!(msg.message, "request with specified project order identifier processed early");
    }

    #[test]
    fn response_status_numeric_values() {
        assert_eq!(ResponseStatus::Ok.as_u16(), 200);
        assert_eq!(ResponseStatus::NotFound.as_u16(), 404);
        assert_eq!(CallbackStatus::Temporary as i32, 4);
    }
}
