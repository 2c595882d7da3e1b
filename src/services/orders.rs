use crate::{
    entities::{
        cart, cart_item,
        order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus},
        order_item::{self, Model as OrderItemModel},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        commerce::cart_service::{load_lines, CartLine, CartSnapshot, EMPTY_CART_MESSAGE},
        inventory,
    },
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Everything the checkout has settled before the order is written.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub address_id: Uuid,
    pub snapshot: CartSnapshot,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemView {
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub address_id: Uuid,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub coupon_code: Option<String>,
    pub razorpay_order_id: Option<String>,
    pub stripe_payment_id: Option<String>,
    pub items: Vec<OrderItemView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderView {
    pub fn new(order: OrderModel, items: Vec<OrderItemModel>) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            address_id: order.address_id,
            status: order.status,
            subtotal: order.subtotal,
            discount: order.discount,
            total: order.total,
            currency: order.currency,
            coupon_code: order.coupon_code,
            razorpay_order_id: order.razorpay_order_id,
            stripe_payment_id: order.stripe_payment_id,
            items: items
                .into_iter()
                .map(|item| OrderItemView {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price: item.price,
                })
                .collect(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// Sorted (product, quantity) pairs, used to detect a cart edited mid-checkout.
fn line_signature(lines: &[CartLine]) -> Vec<(Uuid, i32)> {
    let mut signature: Vec<(Uuid, i32)> = lines
        .iter()
        .map(|line| (line.product_id, line.quantity))
        .collect();
    signature.sort_unstable();
    signature
}

/// Service for creating and reading orders
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Turns a validated cart snapshot into a `PENDING` order.
    ///
    /// One transaction covers the order row, its items, the stock decrements
    /// and emptying the cart. Any failure drops the transaction, which rolls
    /// every write back.
    #[instrument(skip(self, new_order), fields(user_id = %new_order.user_id, cart_id = %new_order.snapshot.cart_id))]
    pub async fn create_from_cart(&self, new_order: NewOrder) -> Result<OrderModel, ServiceError> {
        let snapshot = &new_order.snapshot;

        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        // Row lock on the cart serializes concurrent checkouts of the same cart.
        cart::Entity::find_by_id(snapshot.cart_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::BadRequest(EMPTY_CART_MESSAGE.to_string()))?;

        let current = load_lines(&txn, snapshot.cart_id).await?;
        if current.is_empty() {
            return Err(ServiceError::BadRequest(EMPTY_CART_MESSAGE.to_string()));
        }
        if line_signature(&current) != line_signature(&snapshot.lines) {
            warn!("cart changed between validation and order creation");
            return Err(ServiceError::Conflict(
                "Cart changed during checkout; review it and try again".to_string(),
            ));
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(new_order.user_id),
            address_id: Set(new_order.address_id),
            subtotal: Set(new_order.subtotal),
            discount: Set(new_order.discount),
            total: Set(new_order.total),
            currency: Set(new_order.currency.clone()),
            status: Set(OrderStatus::Pending),
            coupon_code: Set(new_order.coupon_code.clone()),
            razorpay_order_id: Set(None),
            stripe_payment_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let order = order.insert(&txn).await?;

        // Line prices are captured from the snapshot, not re-read from products.
        let items = snapshot.lines.iter().map(|line| order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(line.product_id),
            quantity: Set(line.quantity),
            price: Set(line.unit_price),
        });
        order_item::Entity::insert_many(items)
            .exec_without_returning(&txn)
            .await?;

        // Fixed product order keeps concurrent decrements from deadlocking.
        let mut reservations: Vec<&CartLine> = snapshot.lines.iter().collect();
        reservations.sort_by_key(|line| line.product_id);
        for line in reservations {
            inventory::reserve_stock(&txn, line.product_id, &line.product_name, line.quantity)
                .await?;
        }

        let cleared = cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(snapshot.cart_id))
            .exec(&txn)
            .await?;
        if cleared.rows_affected != snapshot.lines.len() as u64 {
            warn!(
                expected = snapshot.lines.len(),
                removed = cleared.rows_affected,
                "cart item count changed while clearing"
            );
            return Err(ServiceError::Conflict(
                "Cart changed during checkout; review it and try again".to_string(),
            ));
        }

        txn.commit().await.map_err(|e| {
            error!("Failed to commit order {}: {}", order_id, e);
            ServiceError::DatabaseError(e)
        })?;

        info!(%order_id, total = %order.total, currency = %order.currency, "Order created from cart");
        counter!("treasure_house.orders.created", 1);

        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id,
                user_id: order.user_id,
                total: order.total,
                currency: order.currency.clone(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::CartCleared {
                cart_id: snapshot.cart_id,
                user_id: new_order.user_id,
            })
            .await;

        Ok(order)
    }

    /// The caller's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<OrderView>, ServiceError> {
        let rows = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .find_with_related(order_item::Entity)
            .all(&*self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(order, items)| OrderView::new(order, items))
            .collect())
    }

    /// Every order, newest first.
    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<OrderView>, ServiceError> {
        let rows = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .find_with_related(order_item::Entity)
            .all(&*self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(order, items)| OrderView::new(order, items))
            .collect())
    }

    /// Fetches one order. Only its owner or an admin may see it.
    #[instrument(skip(self))]
    pub async fn find_for_user(
        &self,
        user_id: Uuid,
        is_admin: bool,
        order_id: Uuid,
    ) -> Result<OrderView, ServiceError> {
        let mut rows = OrderEntity::find_by_id(order_id)
            .find_with_related(order_item::Entity)
            .all(&*self.db)
            .await?;
        let (order, items) = rows
            .pop()
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        if order.user_id != user_id && !is_admin {
            return Err(ServiceError::Forbidden("Access denied".to_string()));
        }
        Ok(OrderView::new(order, items))
    }
}
