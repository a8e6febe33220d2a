use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use billing_engine::{
    events::{EventHandlers, EventHooks, EventProducers},
    CheckoutApi,
    PaymentFlowApi,
    RefundApi,
    SqliteDatabase,
};
use log::*;

use crate::{
    config::{ProxyConfig, ServerConfig},
    errors::ServerError,
    remote::{RemoteGateway, RemoteReference, RemoteServices},
    routes::{
        health,
        BillingAddressRoute,
        CreateOrderRoute,
        CreateRefundRoute,
        FormLanguageRoute,
        FormPaymentAccountRoute,
        GetRefundRoute,
        ListRefundsRoute,
        PaymentCallbackRoute,
        PaymentCreateRoute,
        PaymentFormDataRoute,
        RefundCallbackRoute,
    },
};

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let reference = RemoteReference::new(&config)?;
    let gateway = RemoteGateway::new(&config)?;
    let services = RemoteServices::new(&config)?;
    let handlers = EventHandlers::new(128, logging_hooks());
    let producers = handlers.producers();
    handlers.start_handlers().await;
    let srv = create_server_instance(config, db, reference, gateway, services, producers)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

/// The default event subscribers of the standalone server: an audit trail in the log. Deployments
/// embedding the engine hang their own hooks here instead.
fn logging_hooks() -> EventHooks {
    let mut hooks = EventHooks::default();
    hooks.on_order_settled(|event| {
        Box::pin(async move {
            info!("🧾️ Order {} settled for {} {}", event.order.id, event.order.total_payment_amount, event.order.currency);
        })
    });
    hooks.on_order_annulled(|event| {
        Box::pin(async move {
            info!("🧾️ Order {} annulled with status {}", event.order.id, event.status);
        })
    });
    hooks.on_refund_completed(|event| {
        Box::pin(async move {
            info!(
                "🧾️ Refund {} completed against order {} for {} {}",
                event.refund.id, event.order.id, event.refund.amount, event.refund.currency
            );
        })
    });
    hooks
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    reference: RemoteReference,
    gateway: RemoteGateway,
    services: RemoteServices,
    producers: EventProducers,
) -> Result<Server, ServerError> {
    let proxy = ProxyConfig::from(&config);
    let order_lifetime_secs = config.order_lifetime_secs;
    let srv = HttpServer::new(move || {
        let checkout_api = CheckoutApi::new(db.clone(), reference.clone(), order_lifetime_secs);
        let payment_api =
            PaymentFlowApi::new(db.clone(), reference.clone(), gateway.clone(), services.clone(), producers.clone());
        let refund_api =
            RefundApi::new(db.clone(), reference.clone(), gateway.clone(), services.clone(), producers.clone());
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("bpg::access_log"))
            .app_data(web::Data::new(checkout_api))
            .app_data(web::Data::new(payment_api))
            .app_data(web::Data::new(refund_api))
            .app_data(web::Data::new(proxy))
            .service(health)
            .service(CreateOrderRoute::<SqliteDatabase, RemoteReference>::new())
            .service(PaymentFormDataRoute::<SqliteDatabase, RemoteReference>::new())
            .service(BillingAddressRoute::<SqliteDatabase, RemoteReference>::new())
            .service(FormLanguageRoute::<SqliteDatabase, RemoteReference>::new())
            .service(FormPaymentAccountRoute::<SqliteDatabase, RemoteReference>::new())
            .service(PaymentCreateRoute::<SqliteDatabase, RemoteReference, RemoteGateway, RemoteServices>::new())
            .service(PaymentCallbackRoute::<SqliteDatabase, RemoteReference, RemoteGateway, RemoteServices>::new())
            .service(CreateRefundRoute::<SqliteDatabase, RemoteReference, RemoteGateway, RemoteServices>::new())
            .service(ListRefundsRoute::<SqliteDatabase, RemoteReference, RemoteGateway, RemoteServices>::new())
            .service(GetRefundRoute::<SqliteDatabase, RemoteReference, RemoteGateway, RemoteServices>::new())
            .service(RefundCallbackRoute::<SqliteDatabase, RemoteReference, RemoteGateway, RemoteServices>::new())
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}
