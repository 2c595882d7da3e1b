use crate::{
    errors::ServiceError,
    services::{
        commerce::{
            coupon_service::{compute_discount, CouponService},
            AddressService, CartService,
        },
        inventory,
        orders::{NewOrder, OrderService},
        payments::{GatewayKind, PaymentInstructions, PaymentService},
    },
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Body of `POST /api/v1/checkout`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub address_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub coupon_code: Option<String>,
    pub preferred_gateway: Option<GatewayKind>,
}

/// Runs the checkout pipeline from cart to payment instructions.
///
/// Stages run strictly in order and a failing stage stops the pipeline:
/// cart read, address ownership, stock, currency, coupon, gateway selection,
/// order creation, payment initiation. Nothing is written until gateway
/// selection has succeeded.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    carts: Arc<CartService>,
    addresses: Arc<AddressService>,
    orders: Arc<OrderService>,
    payments: Arc<PaymentService>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        carts: Arc<CartService>,
        addresses: Arc<AddressService>,
        orders: Arc<OrderService>,
        payments: Arc<PaymentService>,
    ) -> Self {
        Self {
            db,
            carts,
            addresses,
            orders,
            payments,
        }
    }

    #[instrument(skip(self, request), fields(address_id = %request.address_id))]
    pub async fn checkout(
        &self,
        user_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<PaymentInstructions, ServiceError> {
        let result = self.run(user_id, request).await;
        match &result {
            Ok(instructions) => {
                info!(order_id = %instructions.order_id(), "Checkout completed");
                counter!("treasure_house.checkout.completed", 1);
            }
            Err(err) => {
                warn!(error = %err, "Checkout failed");
                counter!("treasure_house.checkout.failed", 1, "status" => err.status_code().as_str().to_string());
            }
        }
        result
    }

    async fn run(
        &self,
        user_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<PaymentInstructions, ServiceError> {
        let snapshot = self.carts.load_snapshot(user_id).await?;
        self.addresses
            .find_owned(user_id, request.address_id)
            .await?;
        inventory::validate_stock(&snapshot)?;
        let currency = snapshot.currency()?;

        let subtotal = snapshot.subtotal();
        let (discount, coupon_code) = match request.coupon_code.as_deref() {
            Some(code) => {
                let coupon = CouponService::find_by_code(&*self.db, code)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound("Invalid coupon code".to_string()))?;
                let discount = compute_discount(&coupon, subtotal, Utc::now())?;
                (discount, Some(coupon.code))
            }
            None => (Decimal::ZERO, None),
        };
        let total = subtotal - discount;
        // Gateways refuse zero amounts; an order created here could never be paid.
        if total <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Order total must be greater than zero".to_string(),
            ));
        }

        let gateway = self
            .payments
            .select_gateway(&currency, request.preferred_gateway)?;

        let order = self
            .orders
            .create_from_cart(NewOrder {
                user_id,
                address_id: request.address_id,
                snapshot,
                subtotal,
                discount,
                total,
                currency,
                coupon_code,
            })
            .await?;

        self.payments.initiate(&order, gateway).await
    }
}
