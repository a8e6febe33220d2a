//! # Billing engine public API
//!
//! The `bpe_api` module exposes the programmatic API of the billing engine. The API is modular:
//! each flow is its own type with its own generic bounds, so a deployment (or a test) only has to
//! supply the collaborators that flow actually touches.
//!
//! * [`order_pipeline`] is the checkout pipeline: validation, pricing, tax and order creation,
//!   plus the payment-form support operations.
//! * [`payment_flow`] submits payments to the gateway and processes payment callbacks.
//! * [`refund_flow`] creates refunds and chargebacks and processes refund callbacks.
//! * [`lifecycle`] is the single order-mutation gate with its side-effect dispatch.
//! * [`accounting`] is the settlement calculator producing the accounting-entry waterfall.
//!
//! The other submodules carry the request/response objects shared by the flows.
//!
//! # API usage
//!
//! The pattern is the same for every API: construct it with a database backend implementing the
//! store traits and the reference/side-effect collaborators it needs.
//!
//! ```rust,ignore
//! use billing_engine::{CheckoutApi, SqliteDatabase};
//! let db = SqliteDatabase::new_with_url(&url, 5).await?;
//! let api = CheckoutApi::new(db, reference_client, 1800);
//! let response = api.create_order(request, None).await?;
//! ```

pub mod accounting;
pub mod lifecycle;
pub mod order_objects;
pub mod order_pipeline;
pub mod payment_flow;
pub mod refund_flow;

use thiserror::Error;

use crate::{
    errors::BillingError,
    traits::{CatalogError, CostRateError, ExchangeError, GeoError, KeyInventoryError, StoreError, TaxError},
};

/// Infrastructure failures of an API operation. Business-rule rejections never surface here; they
/// travel inside the response envelope as a [`crate::errors::DomainMessage`]. Anything of this
/// type reaching the server layer becomes a 5xx.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Store failure: {0}")]
    Store(#[from] StoreError),
    #[error("Catalog failure: {0}")]
    Catalog(#[from] CatalogError),
    #[error("Cost rate failure: {0}")]
    CostRate(#[from] CostRateError),
    #[error("Currency exchange failure: {0}")]
    Exchange(#[from] ExchangeError),
    #[error("Tax service failure: {0}")]
    Tax(#[from] TaxError),
    #[error("GeoIP failure: {0}")]
    Geo(#[from] GeoError),
    #[error("Key inventory failure: {0}")]
    KeyInventory(#[from] KeyInventoryError),
    #[error("Accounting failure: {0}")]
    Accounting(#[from] accounting::AccountingError),
}

/// Internal short-circuit type of the flow pipelines. A step either rejects the request with a
/// registry error (reported inside the response envelope) or aborts it with an infrastructure
/// failure (reported as a transport error). The `From` impls let pipeline steps use `?` for both.
#[derive(Debug)]
pub(crate) enum Halt {
    Domain(BillingError),
    Infra(ApiError),
}

impl From<BillingError> for Halt {
    fn from(e: BillingError) -> Self {
        Halt::Domain(e)
    }
}

macro_rules! halt_from {
    ($($err:ty),+ $(,)?) => {
        $(impl From<$err> for Halt {
            fn from(e: $err) -> Self {
                Halt::Infra(ApiError::from(e))
            }
        })+
    };
}

halt_from!(
    StoreError,
    CatalogError,
    CostRateError,
    ExchangeError,
    TaxError,
    GeoError,
    KeyInventoryError,
    accounting::AccountingError,
);
