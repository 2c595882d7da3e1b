//! Payment initiation.
//!
//! An order is always persisted before its gateway is called, so a gateway
//! failure leaves a `PENDING` order without a reference. Such orders are
//! reported as [`ServiceError::PaymentInitiationFailed`] and can be resumed
//! through [`PaymentService::attach_payment`].

pub mod razorpay;
pub mod router;
pub mod stripe;

use crate::{
    entities::order::{self, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};
use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use thiserror::Error;
use tracing::{error, info, instrument};
use uuid::Uuid;

pub use razorpay::RazorpayGateway;
pub use router::PaymentGatewayRouter;
pub use stripe::StripeGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    Razorpay,
    Stripe,
}

impl GatewayKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GatewayKind::Razorpay => "razorpay",
            GatewayKind::Stripe => "stripe",
        }
    }
}

impl fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a gateway is asked to collect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub order_id: Uuid,
    pub user_id: Uuid,
    /// Amount in the currency's smallest unit
    pub amount_minor: i64,
    pub currency: String,
}

/// Gateway-side handle for a payment in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentSession {
    Razorpay {
        gateway_order_id: String,
    },
    Stripe {
        payment_intent_id: String,
        client_secret: String,
    },
}

impl PaymentSession {
    pub fn kind(&self) -> GatewayKind {
        match self {
            PaymentSession::Razorpay { .. } => GatewayKind::Razorpay,
            PaymentSession::Stripe { .. } => GatewayKind::Stripe,
        }
    }

    /// The id stored on the order.
    pub fn reference(&self) -> &str {
        match self {
            PaymentSession::Razorpay { gateway_order_id } => gateway_order_id,
            PaymentSession::Stripe {
                payment_intent_id, ..
            } => payment_intent_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn kind(&self) -> GatewayKind;

    async fn create_payment(&self, request: &PaymentRequest)
        -> Result<PaymentSession, GatewayError>;

    /// Rebuilds a session from references already stored on the order, if the
    /// gateway can hand the same session back without a remote call.
    fn resume(&self, _order: &order::Model) -> Option<PaymentSession> {
        None
    }
}

/// Response body telling the client how to complete payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "paymentGateway", rename_all = "lowercase")]
pub enum PaymentInstructions {
    #[serde(rename_all = "camelCase")]
    Razorpay {
        order_id: Uuid,
        razorpay_order_id: String,
        amount: i64,
        currency: String,
    },
    #[serde(rename_all = "camelCase")]
    Stripe {
        order_id: Uuid,
        client_secret: String,
        amount: i64,
        currency: String,
    },
}

impl PaymentInstructions {
    fn new(order_id: Uuid, amount: i64, currency: &str, session: PaymentSession) -> Self {
        match session {
            PaymentSession::Razorpay { gateway_order_id } => PaymentInstructions::Razorpay {
                order_id,
                razorpay_order_id: gateway_order_id,
                amount,
                currency: currency.to_string(),
            },
            PaymentSession::Stripe { client_secret, .. } => PaymentInstructions::Stripe {
                order_id,
                client_secret,
                amount,
                currency: currency.to_string(),
            },
        }
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            PaymentInstructions::Razorpay { order_id, .. }
            | PaymentInstructions::Stripe { order_id, .. } => *order_id,
        }
    }
}

/// `round(total × 100)`, half away from zero.
pub fn to_minor_units(total: Decimal) -> Result<i64, ServiceError> {
    (total * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| {
            ServiceError::InternalError(format!("amount {} does not fit in minor units", total))
        })
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    router: Arc<PaymentGatewayRouter>,
    event_sender: Arc<EventSender>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        router: Arc<PaymentGatewayRouter>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            router,
            event_sender,
        }
    }

    /// Picks the gateway for `currency`. Called before any order is written.
    pub fn select_gateway(
        &self,
        currency: &str,
        preferred: Option<GatewayKind>,
    ) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
        self.router.route(currency, preferred)
    }

    /// Opens a payment for a freshly created `PENDING` order and records the
    /// gateway reference on it.
    #[instrument(skip(self, order, gateway), fields(order_id = %order.id, gateway = %gateway.kind()))]
    pub async fn initiate(
        &self,
        order: &order::Model,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Result<PaymentInstructions, ServiceError> {
        let amount = to_minor_units(order.total)?;
        let request = PaymentRequest {
            order_id: order.id,
            user_id: order.user_id,
            amount_minor: amount,
            currency: order.currency.clone(),
        };
        let kind = gateway.kind();

        let session = match gateway.create_payment(&request).await {
            Ok(session) => session,
            Err(err) => return Err(self.initiation_failed(order.id, kind, err.to_string()).await),
        };

        if let Err(err) = self.record_reference(order.id, &session).await {
            return Err(self
                .initiation_failed(
                    order.id,
                    kind,
                    format!("gateway reference {} not recorded: {}", session.reference(), err),
                )
                .await);
        }

        info!(reference = %session.reference(), amount, "Payment initiated");
        counter!("treasure_house.payments.initiated", 1, "gateway" => kind.as_str());
        self.event_sender
            .send_or_log(Event::PaymentInitiated {
                order_id: order.id,
                gateway: kind.to_string(),
                reference: session.reference().to_string(),
            })
            .await;

        Ok(PaymentInstructions::new(
            order.id,
            amount,
            &order.currency,
            session,
        ))
    }

    /// Retries payment initiation for a caller's pending order.
    ///
    /// A stored Razorpay order is handed back without a remote call; Stripe
    /// replays are deduplicated by the idempotency key derived from the order id.
    #[instrument(skip(self))]
    pub async fn attach_payment(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        preferred: Option<GatewayKind>,
    ) -> Result<PaymentInstructions, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        if order.user_id != user_id {
            return Err(ServiceError::Forbidden("Access denied".to_string()));
        }
        if order.status != OrderStatus::Pending {
            return Err(ServiceError::InvalidStatus(format!(
                "Order {} is {} and cannot accept a payment",
                order.id, order.status
            )));
        }

        let gateway = self.router.route(&order.currency, preferred)?;
        let kind = gateway.kind();

        let other_reference = match kind {
            GatewayKind::Razorpay => order.stripe_payment_id.is_some(),
            GatewayKind::Stripe => order.razorpay_order_id.is_some(),
        };
        if other_reference {
            return Err(ServiceError::Conflict(format!(
                "Payment for order {} was already started with another gateway",
                order.id
            )));
        }

        if let Some(session) = gateway.resume(&order) {
            info!(reference = %session.reference(), "Resuming existing payment");
            let amount = to_minor_units(order.total)?;
            return Ok(PaymentInstructions::new(
                order.id,
                amount,
                &order.currency,
                session,
            ));
        }

        self.initiate(&order, gateway).await
    }

    async fn record_reference(
        &self,
        order_id: Uuid,
        session: &PaymentSession,
    ) -> Result<(), ServiceError> {
        let column = match session {
            PaymentSession::Razorpay { .. } => order::Column::RazorpayOrderId,
            PaymentSession::Stripe { .. } => order::Column::StripePaymentId,
        };

        let result = order::Entity::update_many()
            .col_expr(column, Expr::value(session.reference().to_string()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "Order {} is no longer pending",
                order_id
            )));
        }
        Ok(())
    }

    async fn initiation_failed(
        &self,
        order_id: Uuid,
        kind: GatewayKind,
        reason: String,
    ) -> ServiceError {
        error!(
            %order_id,
            gateway = %kind,
            %reason,
            reconciliation_required = true,
            "Payment initiation failed; order left PENDING without a gateway reference"
        );
        counter!("treasure_house.payments.initiation_failed", 1, "gateway" => kind.as_str());
        self.event_sender
            .send_or_log(Event::PaymentInitiationFailed {
                order_id,
                gateway: kind.to_string(),
                reason: reason.clone(),
            })
            .await;
        ServiceError::PaymentInitiationFailed { order_id, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn minor_units_round_half_away_from_zero() {
        assert_eq!(to_minor_units(dec!(20.00)).unwrap(), 2000);
        assert_eq!(to_minor_units(dec!(10.005)).unwrap(), 1001);
        assert_eq!(to_minor_units(dec!(0.994)).unwrap(), 99);
        assert_eq!(to_minor_units(dec!(1900)).unwrap(), 190000);
    }

    #[test]
    fn instructions_serialize_with_gateway_tag() {
        let order_id = Uuid::new_v4();
        let razorpay = PaymentInstructions::new(
            order_id,
            2000,
            "INR",
            PaymentSession::Razorpay {
                gateway_order_id: "order_Rz1".into(),
            },
        );
        let json = serde_json::to_value(&razorpay).unwrap();
        assert_eq!(json["paymentGateway"], "razorpay");
        assert_eq!(json["razorpayOrderId"], "order_Rz1");
        assert_eq!(json["orderId"], order_id.to_string());
        assert_eq!(json["amount"], 2000);

        let stripe = PaymentInstructions::new(
            order_id,
            1500,
            "USD",
            PaymentSession::Stripe {
                payment_intent_id: "pi_1".into(),
                client_secret: "pi_1_secret".into(),
            },
        );
        let json = serde_json::to_value(&stripe).unwrap();
        assert_eq!(json["paymentGateway"], "stripe");
        assert_eq!(json["clientSecret"], "pi_1_secret");
        assert!(json.get("razorpayOrderId").is_none());
    }

    #[test]
    fn session_reference_is_gateway_id() {
        let session = PaymentSession::Stripe {
            payment_intent_id: "pi_9".into(),
            client_secret: "secret".into(),
        };
        assert_eq!(session.reference(), "pi_9");
        assert_eq!(session.kind(), GatewayKind::Stripe);
    }
}
