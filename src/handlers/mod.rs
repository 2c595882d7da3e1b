pub mod commerce;
pub mod common;
pub mod orders;

use crate::events::EventSender;
use crate::services::{
    commerce::{AddressService, CartService, CheckoutService, CouponService},
    order_status::OrderStatusService,
    orders::OrderService,
    payments::{PaymentGatewayRouter, PaymentService},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub coupon: Arc<CouponService>,
    pub order: Arc<OrderService>,
    pub order_status: Arc<OrderStatusService>,
    pub payments: Arc<PaymentService>,
    pub checkout: Arc<CheckoutService>,
}

impl AppServices {
    /// Wires every service over one connection pool, event channel and
    /// gateway router.
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateways: Arc<PaymentGatewayRouter>,
    ) -> Self {
        let cart = Arc::new(CartService::new(db.clone()));
        let address = Arc::new(AddressService::new(db.clone()));
        let coupon = Arc::new(CouponService::new(db.clone()));
        let order = Arc::new(OrderService::new(db.clone(), event_sender.clone()));
        let order_status = Arc::new(OrderStatusService::new(db.clone(), event_sender.clone()));
        let payments = Arc::new(PaymentService::new(
            db.clone(),
            gateways,
            event_sender,
        ));
        let checkout = Arc::new(CheckoutService::new(
            db,
            cart.clone(),
            address,
            order.clone(),
            payments.clone(),
        ));

        Self {
            cart,
            coupon,
            order,
            order_status,
            payments,
            checkout,
        }
    }
}
