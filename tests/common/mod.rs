#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use treasure_house_api::{
    auth::{Claims, ROLE_ADMIN, ROLE_CUSTOMER},
    build_router,
    config::AppConfig,
    db,
    entities::{address, cart_item, coupon, order, order_item, product},
    events::{self, EventSender},
    services::payments::{
        GatewayError, GatewayKind, PaymentGateway, PaymentGatewayRouter, PaymentRequest,
        PaymentSession,
    },
    AppState,
};

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// In-process stand-in for a payment gateway. Records every request and can be
/// switched into a failing mode.
pub struct FakeGateway {
    kind: GatewayKind,
    calls: Mutex<Vec<PaymentRequest>>,
    fail: AtomicBool,
}

impl FakeGateway {
    pub fn new(kind: GatewayKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<PaymentRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn kind(&self) -> GatewayKind {
        self.kind
    }

    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentSession, GatewayError> {
        self.calls.lock().unwrap().push(request.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Status {
                status: 500,
                body: "gateway down".to_string(),
            });
        }
        Ok(match self.kind {
            GatewayKind::Razorpay => PaymentSession::Razorpay {
                gateway_order_id: format!("order_fake_{}", request.order_id.simple()),
            },
            GatewayKind::Stripe => PaymentSession::Stripe {
                payment_intent_id: format!("pi_fake_{}", request.order_id.simple()),
                client_secret: format!("pi_fake_{}_secret", request.order_id.simple()),
            },
        })
    }

    fn resume(&self, order: &order::Model) -> Option<PaymentSession> {
        match self.kind {
            GatewayKind::Razorpay => order
                .razorpay_order_id
                .clone()
                .map(|gateway_order_id| PaymentSession::Razorpay { gateway_order_id }),
            GatewayKind::Stripe => None,
        }
    }
}

/// Helper harness for spinning up the application backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: Arc<AppState>,
    pub razorpay: Arc<FakeGateway>,
    pub stripe: Arc<FakeGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // One connection keeps every query on the same in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_sender, event_rx) = EventSender::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let razorpay = FakeGateway::new(GatewayKind::Razorpay);
        let stripe = FakeGateway::new(GatewayKind::Stripe);
        let gateways = PaymentGatewayRouter::new(
            Some(razorpay.clone() as Arc<dyn PaymentGateway>),
            Some(stripe.clone() as Arc<dyn PaymentGateway>),
        );

        let state = Arc::new(AppState::new(
            Arc::new(pool),
            cfg,
            Arc::new(event_sender),
            Arc::new(gateways),
        ));
        let router = build_router(state.clone());

        Self {
            router,
            state,
            razorpay,
            stripe,
            _event_task: event_task,
        }
    }

    /// Bearer token for `user_id` holding `roles`.
    pub fn token_with_roles(&self, user_id: Uuid, roles: &[&str]) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            iat: now,
            exp: now + 3600,
            iss: self.state.config.jwt_issuer.clone(),
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
        )
        .expect("encode access token")
    }

    pub fn customer_token(&self, user_id: Uuid) -> String {
        self.token_with_roles(user_id, &[ROLE_CUSTOMER])
    }

    pub fn admin_token(&self) -> String {
        self.token_with_roles(Uuid::new_v4(), &[ROLE_ADMIN])
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Like [`TestApp::request`] but returns the status and the decoded JSON body.
    pub async fn request_json(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let response = self.request(method, uri, body, token).await;
        let status = response.status();
        (status, response_json(response).await)
    }

    pub async fn seed_product(
        &self,
        name: &str,
        price: Decimal,
        currency: &str,
        stock: i32,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            currency: Set(currency.to_string()),
            stock: Set(stock),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product for tests")
    }

    pub async fn seed_address(&self, user_id: Uuid) -> address::Model {
        address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            line1: Set("221B Baker Street".to_string()),
            line2: Set(None),
            city: Set("Mumbai".to_string()),
            state: Set("MH".to_string()),
            postal_code: Set("400001".to_string()),
            country: Set("IN".to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed address for tests")
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        discount: Decimal,
        min_amount: Decimal,
        max_discount: Decimal,
        valid_till: DateTime<Utc>,
    ) -> coupon::Model {
        let now = Utc::now();
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            discount: Set(discount),
            valid_till: Set(valid_till),
            min_amount: Set(min_amount),
            max_discount: Set(max_discount),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed coupon for tests")
    }

    pub async fn product(&self, id: Uuid) -> product::Model {
        product::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("query product")
            .expect("product exists")
    }

    pub async fn orders(&self) -> Vec<order::Model> {
        order::Entity::find()
            .all(&*self.state.db)
            .await
            .expect("query orders")
    }

    pub async fn order_item_count(&self) -> u64 {
        order_item::Entity::find()
            .count(&*self.state.db)
            .await
            .expect("count order items")
    }

    pub async fn cart_items(&self) -> Vec<cart_item::Model> {
        cart_item::Entity::find()
            .all(&*self.state.db)
            .await
            .expect("query cart items")
    }

    pub async fn set_stock(&self, product_id: Uuid, stock: i32) {
        let mut active: product::ActiveModel = self.product(product_id).await.into();
        active.stock = Set(stock);
        active
            .update(&*self.state.db)
            .await
            .expect("update stock for tests");
    }

    /// Adds a product to the caller's cart through the API.
    pub async fn add_to_cart(&self, token: &str, product_id: Uuid, quantity: i32) {
        let (status, body) = self
            .request_json(
                Method::POST,
                "/api/v1/cart/items",
                Some(serde_json::json!({ "productId": product_id, "quantity": quantity })),
                Some(token),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "add to cart failed: {body}");
    }

    pub async fn checkout(&self, token: &str, body: Value) -> (StatusCode, Value) {
        self.request_json(Method::POST, "/api/v1/checkout", Some(body), Some(token))
            .await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    }
}

/// Reads a money field whether it was serialized as a string or a number.
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("expected a decimal, got {other}"),
    }
}
