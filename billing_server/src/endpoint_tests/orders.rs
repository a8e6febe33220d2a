use actix_web::{http::StatusCode, web, web::ServiceConfig};
use billing_engine::{
    db_types::PrivateOrderStatus,
    events::EventProducers,
    helpers::signature,
    test_utils::{
        fixtures::{new_order_fixture, RecordingSideEffects, TestDirectory, TestGateway},
        memory::MemoryDatabase,
    },
    traits::OrderStore,
    CheckoutApi,
    PaymentFlowApi,
};
use serde_json::json;

use super::{
    helpers::{get_request, json_body, post_raw, post_request},
    mocks::MockReference,
};
use crate::routes::{health, CreateOrderRoute, PaymentCallbackRoute, PaymentCreateRoute};

fn checkout_app(db: MemoryDatabase) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg: &mut ServiceConfig| {
        let api = CheckoutApi::new(db, TestDirectory::default(), 1800);
        cfg.service(CreateOrderRoute::<MemoryDatabase, TestDirectory>::new()).app_data(web::Data::new(api));
    }
}

fn payment_app(
    db: MemoryDatabase,
    gateway: TestGateway,
    effects: RecordingSideEffects,
) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg: &mut ServiceConfig| {
        let api = PaymentFlowApi::new(db, TestDirectory::default(), gateway, effects, EventProducers::default());
        cfg.service(PaymentCreateRoute::<MemoryDatabase, TestDirectory, TestGateway, RecordingSideEffects>::new())
            .service(PaymentCallbackRoute::<MemoryDatabase, TestDirectory, TestGateway, RecordingSideEffects>::new())
            .app_data(web::Data::new(api));
    }
}

#[actix_web::test]
async fn health_check() {
    let _ = env_logger::try_init().ok();
    let (status, body) = get_request("/health", |cfg| {
        cfg.service(health);
    })
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "👍️\n");
}

#[actix_web::test]
async fn create_order_prices_the_checkout() {
    let _ = env_logger::try_init().ok();
    let db = MemoryDatabase::new();
    let body = json!({
        "project_id": "project-1",
        "amount": "100",
        "currency": "RUB",
        "description": "Test purchase",
        "user": {"id": "user-1", "email": "payer@example.com", "ip": "127.0.0.1", "country": "RU"}
    });
    let (status, body) = post_request("/order", body, checkout_app(db.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["status"], "Ok");
    assert_eq!(body["order"]["order_amount"], "100.00");
    assert_eq!(body["order"]["total_payment_amount"], "120.00");
    assert_eq!(body["order"]["currency"], "RUB");
    assert_eq!(db.order_count(), 1);
}

#[actix_web::test]
async fn unknown_project_is_rejected_in_the_envelope() {
    let _ = env_logger::try_init().ok();
    let body = json!({"project_id": "no-such-project", "amount": "100", "currency": "RUB"});
    let (status, body) = post_request("/order", body, checkout_app(MemoryDatabase::new())).await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["status"], "NotFound");
    assert_eq!(body["message"]["code"], "fm000002");
}

#[actix_web::test]
async fn malformed_order_body_is_a_400() {
    let _ = env_logger::try_init().ok();
    let (status, body) = post_raw("/order", b"not json".to_vec(), None, checkout_app(MemoryDatabase::new())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json_body(&body)["error"].as_str().unwrap().contains("Could not read request body"));
}

#[actix_web::test]
async fn reference_outage_maps_onto_a_500() {
    use billing_engine::traits::CatalogError;
    let _ = env_logger::try_init().ok();
    let body = json!({"project_id": "project-1", "amount": "100", "currency": "RUB"});
    let (status, body) = post_request("/order", body, |cfg| {
        let mut reference = MockReference::new();
        reference
            .expect_fetch_project()
            .returning(|_| Err(CatalogError::ServiceError("catalog is down".to_string())));
        let api = CheckoutApi::new(MemoryDatabase::new(), reference, 1800);
        cfg.service(CreateOrderRoute::<MemoryDatabase, MockReference>::new()).app_data(web::Data::new(api));
    })
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json_body(&body)["error"].as_str().unwrap().contains("catalog is down"));
}

#[actix_web::test]
async fn payment_create_returns_the_gateway_redirect() {
    let _ = env_logger::try_init().ok();
    let db = MemoryDatabase::new();
    db.insert_order(&new_order_fixture()).await.unwrap();
    let body = json!({
        "account": "4000000000000002",
        "card_holder": "CARD HOLDER",
        "expiry_month": "12",
        "expiry_year": "2030",
        "email": "payer@example.com"
    });
    let (status, body) = post_request(
        "/order/uuid-order-1/payment",
        body,
        payment_app(db, TestGateway::default(), RecordingSideEffects::default()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["status"], "Ok");
    assert!(body["redirect_url"].as_str().unwrap().contains("uuid-order-1"));
    assert_eq!(body["need_redirect"], true);
}

#[actix_web::test]
async fn settled_callback_drives_the_order_to_paid() {
    let _ = env_logger::try_init().ok();
    let db = MemoryDatabase::new();
    let mut order = new_order_fixture();
    order.payment_requisites.insert("card_brand".into(), "VISA".into());
    db.insert_order(&order).await.unwrap();
    let callback = serde_json::to_vec(&json!({
        "merchant_order": {"id": "uuid-order-1"},
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
    .unwrap();
    let sig = signature::sign(&callback, "secret-callback-RUB");
    let (status, body) = post_raw(
        "/callback/payment/cardpay",
        callback,
        Some(&sig),
        payment_app(db.clone(), TestGateway::default(), RecordingSideEffects::default()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["status"], "Ok");
    let order = db.fetch_order_by_uuid(&"uuid-order-1".parse().unwrap()).await.unwrap().unwrap();
    assert_eq!(order.private_status, PrivateOrderStatus::PaymentSystemComplete);
}

#[actix_web::test]
async fn callback_without_a_signature_header_is_a_400() {
    let _ = env_logger::try_init().ok();
    let db = MemoryDatabase::new();
    db.insert_order(&new_order_fixture()).await.unwrap();
    let callback = br#"{"merchant_order": {"id": "uuid-order-1"}}"#.to_vec();
    let (status, body) = post_raw(
        "/callback/payment/cardpay",
        callback,
        None,
        payment_app(db.clone(), TestGateway::default(), RecordingSideEffects::default()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["status"], "ErrorValidation");
    // The order is untouched.
    let order = db.fetch_order_by_uuid(&"uuid-order-1".parse().unwrap()).await.unwrap().unwrap();
    assert_eq!(order.private_status, PrivateOrderStatus::Pending);
}
