use actix_web::{http::StatusCode, web, web::ServiceConfig};
use billing_engine::{
    db_types::{Order, PrivateOrderStatus, RefundStatus},
    events::EventProducers,
    helpers::signature,
    test_utils::{
        fixtures::{new_order_fixture, new_refund_fixture, RecordingSideEffects, TestDirectory, TestGateway},
        memory::MemoryDatabase,
    },
    traits::{OrderStore, RefundStore},
    RefundApi,
};
use serde_json::json;

use super::helpers::{get_request, json_body, post_raw, post_request};
use crate::routes::{CreateRefundRoute, GetRefundRoute, ListRefundsRoute, RefundCallbackRoute};

fn refund_app(db: MemoryDatabase) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg: &mut ServiceConfig| {
        let api = RefundApi::new(
            db,
            TestDirectory::default(),
            TestGateway::default(),
            RecordingSideEffects::default(),
            EventProducers::default(),
        );
        cfg.service(CreateRefundRoute::<MemoryDatabase, TestDirectory, TestGateway, RecordingSideEffects>::new())
            .service(ListRefundsRoute::<MemoryDatabase, TestDirectory, TestGateway, RecordingSideEffects>::new())
            .service(GetRefundRoute::<MemoryDatabase, TestDirectory, TestGateway, RecordingSideEffects>::new())
            .service(RefundCallbackRoute::<MemoryDatabase, TestDirectory, TestGateway, RecordingSideEffects>::new())
            .app_data(web::Data::new(api));
    }
}

fn settled_order() -> Order {
    let mut order = new_order_fixture();
    order.private_status = PrivateOrderStatus::PaymentSystemComplete;
    order.payment_requisites.insert("card_brand".into(), "VISA".into());
    order.transaction.insert("payment_id".into(), "ext-tx-100".into());
    order
}

fn refund_request(amount: &str) -> serde_json::Value {
    json!({"amount": amount, "reason": "customer request", "creator_id": "merchant-1"})
}

#[actix_web::test]
async fn refund_is_created_through_the_route() {
    let _ = env_logger::try_init().ok();
    let db = MemoryDatabase::new();
    db.insert_order(&settled_order()).await.unwrap();
    let (status, body) = post_request("/order/uuid-order-1/refund", refund_request("50"), refund_app(db)).await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["status"], "Ok");
    assert_eq!(body["refund"]["amount"], "50");
    assert_eq!(body["refund"]["status"], "in_progress");
}

#[actix_web::test]
async fn over_refund_is_rejected_with_the_stable_code() {
    let _ = env_logger::try_init().ok();
    let db = MemoryDatabase::new();
    db.insert_order(&settled_order()).await.unwrap();
    let (status, body) = post_request("/order/uuid-order-1/refund", refund_request("500"), refund_app(db)).await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["status"], "BadData");
    assert_eq!(body["message"]["code"], "rf000003");
}

#[actix_web::test]
async fn refund_listing_is_404_for_an_unknown_order() {
    let _ = env_logger::try_init().ok();
    let (status, body) = get_request("/order/no-such-order/refunds", refund_app(MemoryDatabase::new())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json_body(&body)["error"].as_str().unwrap().contains("no-such-order"));
}

#[actix_web::test]
async fn refunds_are_listed_with_paging() {
    let _ = env_logger::try_init().ok();
    let db = MemoryDatabase::new();
    db.insert_order(&settled_order()).await.unwrap();
    db.insert_refund(&new_refund_fixture("refund-1", "order-1", "30")).await.unwrap();
    db.insert_refund(&new_refund_fixture("refund-2", "order-1", "40")).await.unwrap();
    let (status, body) = get_request("/order/uuid-order-1/refunds?limit=1", refund_app(db)).await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["count"], 2);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn a_single_refund_can_be_fetched() {
    let _ = env_logger::try_init().ok();
    let db = MemoryDatabase::new();
    db.insert_order(&settled_order()).await.unwrap();
    db.insert_refund(&new_refund_fixture("refund-1", "order-1", "30")).await.unwrap();
    let (status, body) = get_request("/order/uuid-order-1/refund/refund-1", refund_app(db)).await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["status"], "Ok");
    assert_eq!(body["refund"]["id"], "refund-1");
    assert_eq!(body["refund"]["amount"], "30");
}

#[actix_web::test]
async fn completed_refund_callback_settles_through_the_route() {
    let _ = env_logger::try_init().ok();
    let db = MemoryDatabase::new();
    db.insert_order(&settled_order()).await.unwrap();
    db.insert_refund(&new_refund_fixture("refund-1", "order-1", "120")).await.unwrap();
    let callback = serde_json::to_vec(&json!({
        "merchant_order": {"id": "refund-1"},
        "payment_method": "BANKCARD",
        "refund_data": {"id": "ext-refund-900", "amount": "120", "currency": "RUB", "status": "COMPLETED"}
    }))
    .unwrap();
    let sig = signature::sign(&callback, "secret-callback-RUB");
    let (status, body) = post_raw("/callback/refund/cardpay", callback, Some(&sig), refund_app(db.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["status"], "Ok");
    let refund = db.fetch_refund("refund-1").await.unwrap().unwrap();
    assert_eq!(refund.status, RefundStatus::Completed);
    let original = db.fetch_order_by_id("order-1").await.unwrap().unwrap();
    assert_eq!(original.private_status, PrivateOrderStatus::Refunded);
}

#[actix_web::test]
async fn refund_callback_without_a_signature_header_is_a_400() {
    let _ = env_logger::try_init().ok();
    let db = MemoryDatabase::new();
    db.insert_order(&settled_order()).await.unwrap();
    let callback = br#"{"merchant_order": {"id": "refund-1"}}"#.to_vec();
    let (status, body) = post_raw("/callback/refund/cardpay", callback, None, refund_app(db)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["status"], "ErrorValidation");
}
