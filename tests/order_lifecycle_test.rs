mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

/// Checks out one unit for a fresh customer and returns (user, token, order id).
async fn place_order(app: &TestApp) -> (Uuid, String, String) {
    let user = Uuid::new_v4();
    let token = app.customer_token(user);
    let product = app.seed_product("Candle", dec!(8.00), "INR", 5).await;
    let address = app.seed_address(user).await;
    app.add_to_cart(&token, product.id, 1).await;
    let (status, body) = app
        .checkout(&token, json!({ "addressId": address.id }))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let order_id = body["orderId"].as_str().unwrap().to_string();
    (user, token, order_id)
}

async fn set_status(app: &TestApp, token: &str, order_id: &str, status: &str) -> (StatusCode, Value) {
    app.request_json(
        Method::PUT,
        &format!("/api/v1/orders/{order_id}/status"),
        Some(json!({ "status": status })),
        Some(token),
    )
    .await
}

#[tokio::test]
async fn pending_order_can_be_marked_paid_once() {
    let app = TestApp::new().await;
    let (_, _, order_id) = place_order(&app).await;
    let admin = app.admin_token();

    let (status, body) = set_status(&app, &admin, &order_id, "PAID").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "PAID");

    // Same status again is accepted without change.
    let (status, _) = set_status(&app, &admin, &order_id, "PAID").await;
    assert_eq!(status, StatusCode::OK);

    for next in ["PENDING", "CANCELLED", "FAILED"] {
        let (status, _) = set_status(&app, &admin, &order_id, next).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "PAID -> {next}");
    }
}

#[tokio::test]
async fn cancelled_order_stays_cancelled() {
    let app = TestApp::new().await;
    let (_, _, order_id) = place_order(&app).await;
    let admin = app.admin_token();

    let (status, _) = set_status(&app, &admin, &order_id, "CANCELLED").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = set_status(&app, &admin, &order_id, "PAID").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_changes_need_admin_and_an_existing_order() {
    let app = TestApp::new().await;
    let (_, token, order_id) = place_order(&app).await;

    let (status, _) = set_status(&app, &token, &order_id, "PAID").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = app.admin_token();
    let (status, _) = set_status(&app, &admin, &Uuid::new_v4().to_string(), "PAID").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn orders_are_visible_to_owner_and_admin_only() {
    let app = TestApp::new().await;
    let (_, token, order_id) = place_order(&app).await;
    let uri = format!("/api/v1/orders/{order_id}");

    let (status, order) = app.request_json(Method::GET, &uri, None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "PENDING");
    assert_eq!(order["items"].as_array().unwrap().len(), 1);

    let stranger = app.customer_token(Uuid::new_v4());
    let (status, body) = app
        .request_json(Method::GET, &uri, None, Some(&stranger))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Access denied");

    let admin = app.admin_token();
    let (status, _) = app.request_json(Method::GET, &uri, None, Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request_json(
            Method::GET,
            &format!("/api/v1/orders/{}", Uuid::new_v4()),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn order_listings_are_scoped() {
    let app = TestApp::new().await;
    let (_, token, order_id) = place_order(&app).await;
    place_order(&app).await;

    let (status, mine) = app
        .request_json(Method::GET, "/api/v1/orders/me", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    let mine = mine.as_array().unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["id"], order_id.as_str());

    let (status, _) = app
        .request_json(Method::GET, "/api/v1/orders", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = app.admin_token();
    let (status, all) = app
        .request_json(Method::GET, "/api/v1/orders", None, Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn payment_can_only_be_attached_by_owner_to_pending_orders() {
    let app = TestApp::new().await;
    let (_, token, order_id) = place_order(&app).await;
    let uri = format!("/api/v1/orders/{order_id}/payment");

    let stranger = app.customer_token(Uuid::new_v4());
    let (status, _) = app
        .request_json(Method::POST, &uri, None, Some(&stranger))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Switching gateways after a Razorpay order exists is refused.
    let (status, _) = app
        .request_json(
            Method::POST,
            &uri,
            Some(json!({ "preferredGateway": "stripe" })),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let admin = app.admin_token();
    let (status, _) = set_status(&app, &admin, &order_id, "PAID").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.request_json(Method::POST, &uri, None, Some(&token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reports_database_up() {
    let app = TestApp::new().await;
    let (status, body) = app.request_json(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "up");
    assert_eq!(body["database"], "up");
}

#[tokio::test]
async fn responses_carry_request_id() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/api/v1/orders/me", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let header = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("request id header");
    let body = common::response_json(response).await;
    assert_eq!(body["request_id"], header.as_str());
}
