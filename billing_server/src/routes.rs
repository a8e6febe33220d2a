//! Request handler definitions
//!
//! Define each route and its handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests:
//! ```nocompile
//!     fn my_handler() -> impl Responder {
//!         std::thread::sleep(Duration::from_secs(5)); // <-- Bad practice! Will cause the current worker thread to
//! hang!
//!     }
//! ```
//! For this reason, any long, non-cpu-bound operation (e.g. I/O, database operations, etc.) should be expressed as
//! futures or asynchronous functions. Async handlers get executed concurrently by worker threads and thus don’t block
//! execution.

use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use billing_engine::{
    db_types::OrderUuid,
    order_objects::{
        BillingAddressRequest,
        CallbackResponse,
        CreateOrderRequest,
        CreateRefundRequest,
        FormDataRequest,
        LanguageRequest,
        PaymentAccountRequest,
        PaymentCreateRequest,
    },
    traits::{
        CardVault,
        CatalogLookup,
        CostRates,
        CurrencyExchange,
        EntryStore,
        GeoIp,
        KeyInventory,
        Notifier,
        OrderStore,
        PaymentGatewayClient,
        RefundStore,
        TaxRates,
    },
    CallbackStatus,
    CheckoutApi,
    PaymentFlowApi,
    RefundApi,
};
use log::*;

use crate::{
    config::ProxyConfig,
    data_objects::RefundListQuery,
    errors::ServerError,
    helpers::{get_remote_ip, get_signature_header},
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal) => {
        paste::paste! { pub struct [<$name:camel Route>];}
        paste::paste! {
            impl [<$name:camel Route>] {
                #[allow(clippy::new_without_default)]
                pub fn new() -> Self { Self }
            }
        }
        paste::paste! {
            impl actix_web::dev::HttpServiceFactory for [<$name:camel Route>] {
                fn register(self, config: &mut actix_web::dev::AppService) {
                    let res = actix_web::Resource::new($path)
                        .name(stringify!($name))
                        .guard(actix_web::guard::$method())
                        .to($name);
                    actix_web::dev::HttpServiceFactory::register(res, config);
                }
            }
        }
    };

    ($name:ident => $method:ident $path:literal impl < $($g:ident),+ > where $($bounds:tt)+) => {
        paste::paste! { pub struct [<$name:camel Route>]<$($g),+>($(core::marker::PhantomData<fn() -> $g>),+);}
        paste::paste! { impl<$($g),+> [<$name:camel Route>]<$($g),+> {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($(core::marker::PhantomData::<fn() -> $g>),+)
            }
        }}
        paste::paste! { impl<$($g),+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$($g),+>
        where
            $($bounds)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::<$($g),+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Checkout  ----------------------------------------------------

route!(create_order => Post "/order" impl <B, R> where
    B: OrderStore + 'static,
    R: CatalogLookup + CurrencyExchange + TaxRates + GeoIp + 'static);
/// Route handler for the order creation endpoint.
///
/// The handler takes the raw body rather than a `web::Json` extractor: when the project requires
/// signed requests, the signature covers the body bytes exactly as the merchant sent them.
pub async fn create_order<B, R>(
    api: web::Data<CheckoutApi<B, R>>,
    body: web::Bytes,
) -> Result<HttpResponse, ServerError>
where
    B: OrderStore,
    R: CatalogLookup + CurrencyExchange + TaxRates + GeoIp,
{
    trace!("💻️ Received order creation request");
    let request: CreateOrderRequest =
        serde_json::from_slice(&body).map_err(|e| ServerError::InvalidRequestBody(e.to_string()))?;
    let response = api.create_order(request, Some(&body)).await?;
    Ok(HttpResponse::Ok().json(response))
}

//----------------------------------------------   Payment form  ------------------------------------------------

route!(payment_form_data => Post "/order/{uuid}/form-data" impl <B, R> where
    B: OrderStore + 'static,
    R: CatalogLookup + CurrencyExchange + TaxRates + GeoIp + 'static);
/// The hosted payment form calls this when it loads. The payer IP is resolved from the
/// connection when the form did not report one itself.
pub async fn payment_form_data<B, R>(
    req: HttpRequest,
    proxy: web::Data<ProxyConfig>,
    path: web::Path<OrderUuid>,
    api: web::Data<CheckoutApi<B, R>>,
    body: web::Json<FormDataRequest>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderStore,
    R: CatalogLookup + CurrencyExchange + TaxRates + GeoIp,
{
    let uuid = path.into_inner();
    let mut ctx = body.into_inner();
    if ctx.ip.is_none() {
        ctx.ip = get_remote_ip(&req, proxy.use_x_forwarded_for, proxy.use_forwarded).map(|ip| ip.to_string());
    }
    debug!("💻️ POST form data for order {uuid}");
    let response = api.payment_form_data(&uuid, ctx).await?;
    Ok(HttpResponse::Ok().json(response))
}

route!(billing_address => Post "/order/{uuid}/billing-address" impl <B, R> where
    B: OrderStore + 'static,
    R: CatalogLookup + CurrencyExchange + TaxRates + GeoIp + 'static);
/// Recomputes tax after the payer chose a billing country on the payment form.
pub async fn billing_address<B, R>(
    path: web::Path<OrderUuid>,
    api: web::Data<CheckoutApi<B, R>>,
    body: web::Json<BillingAddressRequest>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderStore,
    R: CatalogLookup + CurrencyExchange + TaxRates + GeoIp,
{
    let uuid = path.into_inner();
    debug!("💻️ POST billing address for order {uuid}");
    let response = api.process_billing_address(&uuid, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

route!(form_language => Put "/order/{uuid}/language" impl <B, R> where
    B: OrderStore + 'static,
    R: CatalogLookup + CurrencyExchange + TaxRates + GeoIp + 'static);
pub async fn form_language<B, R>(
    path: web::Path<OrderUuid>,
    api: web::Data<CheckoutApi<B, R>>,
    body: web::Json<LanguageRequest>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderStore,
    R: CatalogLookup + CurrencyExchange + TaxRates + GeoIp,
{
    let uuid = path.into_inner();
    debug!("💻️ PUT form language for order {uuid}");
    let response = api.payment_form_language_changed(&uuid, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

route!(form_payment_account => Put "/order/{uuid}/payment-account" impl <B, R> where
    B: OrderStore + 'static,
    R: CatalogLookup + CurrencyExchange + TaxRates + GeoIp + 'static);
/// Validates the account the payer typed into the form and, for cards, enriches the order with
/// the BIN's brand and issuer country.
pub async fn form_payment_account<B, R>(
    path: web::Path<OrderUuid>,
    api: web::Data<CheckoutApi<B, R>>,
    body: web::Json<PaymentAccountRequest>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderStore,
    R: CatalogLookup + CurrencyExchange + TaxRates + GeoIp,
{
    let uuid = path.into_inner();
    debug!("💻️ PUT payment account for order {uuid}");
    let response = api.payment_form_payment_account_changed(&uuid, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

//----------------------------------------------   Payments  ----------------------------------------------------

route!(payment_create => Post "/order/{uuid}/payment" impl <B, R, G, N> where
    B: OrderStore + EntryStore + 'static,
    R: CatalogLookup + CostRates + CurrencyExchange + TaxRates + 'static,
    G: PaymentGatewayClient + 'static,
    N: Notifier + KeyInventory + CardVault + Clone + 'static);
/// Submits the order to the payment gateway and answers with the redirect URL the payer must be
/// sent to. Business rejections come back in the envelope with a stable error code.
pub async fn payment_create<B, R, G, N>(
    path: web::Path<OrderUuid>,
    api: web::Data<PaymentFlowApi<B, R, G, N>>,
    body: web::Json<PaymentCreateRequest>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderStore + EntryStore,
    R: CatalogLookup + CostRates + CurrencyExchange + TaxRates,
    G: PaymentGatewayClient,
    N: Notifier + KeyInventory + CardVault + Clone,
{
    let uuid = path.into_inner();
    debug!("💻️ POST payment create for order {uuid}");
    let response = api.payment_create(&uuid, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

route!(payment_callback => Post "/callback/payment/{handler}" impl <B, R, G, N> where
    B: OrderStore + EntryStore + 'static,
    R: CatalogLookup + CostRates + CurrencyExchange + TaxRates + 'static,
    G: PaymentGatewayClient + 'static,
    N: Notifier + KeyInventory + CardVault + Clone + 'static);
/// The payment system reports a payment outcome here. The body is passed on raw; the engine
/// verifies the signature over the exact bytes before it touches any state.
pub async fn payment_callback<B, R, G, N>(
    req: HttpRequest,
    path: web::Path<String>,
    api: web::Data<PaymentFlowApi<B, R, G, N>>,
    body: web::Bytes,
) -> HttpResponse
where
    B: OrderStore + EntryStore,
    R: CatalogLookup + CostRates + CurrencyExchange + TaxRates,
    G: PaymentGatewayClient,
    N: Notifier + KeyInventory + CardVault + Clone,
{
    let handler = path.into_inner();
    trace!("💻️ Received payment callback for handler {handler}");
    let Some(signature) = get_signature_header(&req) else {
        warn!("💻️ Payment callback for {handler} arrived without a signature header");
        return callback_reply(CallbackResponse::validation_error("signature header missing"));
    };
    callback_reply(api.payment_callback(&handler, &body, &signature).await)
}

//----------------------------------------------   Refunds  -----------------------------------------------------

route!(create_refund => Post "/order/{uuid}/refund" impl <B, R, G, N> where
    B: OrderStore + RefundStore + EntryStore + 'static,
    R: CatalogLookup + CostRates + CurrencyExchange + 'static,
    G: PaymentGatewayClient + 'static,
    N: Notifier + KeyInventory + Clone + 'static);
/// Creates a refund or chargeback against a settled order and submits it to the gateway.
pub async fn create_refund<B, R, G, N>(
    path: web::Path<OrderUuid>,
    api: web::Data<RefundApi<B, R, G, N>>,
    body: web::Json<CreateRefundRequest>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderStore + RefundStore + EntryStore,
    R: CatalogLookup + CostRates + CurrencyExchange,
    G: PaymentGatewayClient,
    N: Notifier + KeyInventory + Clone,
{
    let uuid = path.into_inner();
    info!("💻️ POST refund for order {uuid}");
    let response = api.create_refund(&uuid, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

route!(list_refunds => Get "/order/{uuid}/refunds" impl <B, R, G, N> where
    B: OrderStore + RefundStore + EntryStore + 'static,
    R: CatalogLookup + CostRates + CurrencyExchange + 'static,
    G: PaymentGatewayClient + 'static,
    N: Notifier + KeyInventory + Clone + 'static);
pub async fn list_refunds<B, R, G, N>(
    path: web::Path<OrderUuid>,
    query: web::Query<RefundListQuery>,
    api: web::Data<RefundApi<B, R, G, N>>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderStore + RefundStore + EntryStore,
    R: CatalogLookup + CostRates + CurrencyExchange,
    G: PaymentGatewayClient,
    N: Notifier + KeyInventory + Clone,
{
    let uuid = path.into_inner();
    debug!("💻️ GET refunds for order {uuid}");
    let page = api
        .list_refunds(&uuid, query.limit, query.offset)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("Order {uuid} does not exist")))?;
    Ok(HttpResponse::Ok().json(page))
}

route!(get_refund => Get "/order/{uuid}/refund/{refund_id}" impl <B, R, G, N> where
    B: OrderStore + RefundStore + EntryStore + 'static,
    R: CatalogLookup + CostRates + CurrencyExchange + 'static,
    G: PaymentGatewayClient + 'static,
    N: Notifier + KeyInventory + Clone + 'static);
pub async fn get_refund<B, R, G, N>(
    path: web::Path<(OrderUuid, String)>,
    api: web::Data<RefundApi<B, R, G, N>>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderStore + RefundStore + EntryStore,
    R: CatalogLookup + CostRates + CurrencyExchange,
    G: PaymentGatewayClient,
    N: Notifier + KeyInventory + Clone,
{
    let (uuid, refund_id) = path.into_inner();
    debug!("💻️ GET refund {refund_id} of order {uuid}");
    let response = api.get_refund(&uuid, &refund_id).await?;
    Ok(HttpResponse::Ok().json(response))
}

route!(refund_callback => Post "/callback/refund/{handler}" impl <B, R, G, N> where
    B: OrderStore + RefundStore + EntryStore + 'static,
    R: CatalogLookup + CostRates + CurrencyExchange + 'static,
    G: PaymentGatewayClient + 'static,
    N: Notifier + KeyInventory + Clone + 'static);
/// The payment system reports a refund outcome here. Same raw-body discipline as the payment
/// callback route.
pub async fn refund_callback<B, R, G, N>(
    req: HttpRequest,
    path: web::Path<String>,
    api: web::Data<RefundApi<B, R, G, N>>,
    body: web::Bytes,
) -> HttpResponse
where
    B: OrderStore + RefundStore + EntryStore,
    R: CatalogLookup + CostRates + CurrencyExchange,
    G: PaymentGatewayClient,
    N: Notifier + KeyInventory + Clone,
{
    let handler = path.into_inner();
    trace!("💻️ Received refund callback for handler {handler}");
    let Some(signature) = get_signature_header(&req) else {
        warn!("💻️ Refund callback for {handler} arrived without a signature header");
        return callback_reply(CallbackResponse::validation_error("signature header missing"));
    };
    callback_reply(api.refund_callback(&handler, &body, &signature).await)
}

/// Maps a callback outcome onto the HTTP reply. Validation failures get a 400 so a misconfigured
/// payment system notices; system errors get a 500 so it retries; everything else is a 200 and
/// the body carries the advisory detail.
fn callback_reply(response: CallbackResponse) -> HttpResponse {
    match response.status {
        CallbackStatus::Ok | CallbackStatus::Temporary => HttpResponse::Ok().json(response),
        CallbackStatus::ErrorValidation => HttpResponse::BadRequest().json(response),
        CallbackStatus::ErrorSystem => HttpResponse::InternalServerError().json(response),
    }
}
