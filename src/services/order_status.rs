use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QuerySelect, TransactionTrait,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Writes `to` only while the stored status still equals `from`.
///
/// A concurrent writer that got there first leaves zero rows matched, which is
/// reported as a conflict instead of silently overwriting its status.
pub(crate) async fn transition<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    from: OrderStatus,
    to: OrderStatus,
) -> Result<(), ServiceError> {
    let result = OrderEntity::update_many()
        .col_expr(order::Column::Status, Expr::value(to))
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::Status.eq(from))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        warn!(%order_id, %from, %to, "order status changed concurrently");
        return Err(ServiceError::Conflict(format!(
            "Order {} is no longer {}",
            order_id, from
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Moves an order to `new_status` if the transition table allows it.
    ///
    /// Setting the current status again succeeds without writing.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        let order = OrderEntity::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = order.status;

        if old_status == new_status {
            txn.commit().await?;
            return Ok(order);
        }

        if !old_status.can_transition_to(new_status) {
            error!("Invalid status transition from {} to {}", old_status, new_status);
            let reason = if old_status.is_terminal() {
                format!("Order is already '{}' and cannot change", old_status)
            } else {
                format!(
                    "Cannot transition from status '{}' to '{}'",
                    old_status, new_status
                )
            };
            return Err(ServiceError::InvalidStatus(reason));
        }

        transition(&txn, order_id, old_status, new_status).await?;
        let updated = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        txn.commit().await.map_err(|e| {
            error!("Failed to commit status change for order {}: {}", order_id, e);
            ServiceError::DatabaseError(e)
        })?;

        info!(%old_status, "Order status updated");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{establish_connection_with_config, run_migrations, DbConfig},
        entities::address,
    };
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use sea_orm::{ActiveModelTrait, Set};

    async fn pending_order() -> (DatabaseConnection, Uuid) {
        let db = establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .expect("connect");
        run_migrations(&db).await.expect("migrate");

        let user_id = Uuid::new_v4();
        let address = address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            line1: Set("12 Marine Drive".to_string()),
            line2: Set(None),
            city: Set("Mumbai".to_string()),
            state: Set("MH".to_string()),
            postal_code: Set("400020".to_string()),
            country: Set("IN".to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(&db)
        .await
        .expect("address");

        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            address_id: Set(address.id),
            subtotal: Set(dec!(20)),
            discount: Set(dec!(0)),
            total: Set(dec!(20)),
            currency: Set("INR".to_string()),
            status: Set(OrderStatus::Pending),
            coupon_code: Set(None),
            razorpay_order_id: Set(None),
            stripe_payment_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&db)
        .await
        .expect("order");
        (db, order.id)
    }

    async fn status_of(db: &DatabaseConnection, order_id: Uuid) -> OrderStatus {
        OrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .expect("query")
            .expect("order row")
            .status
    }

    #[tokio::test]
    async fn transition_applies_when_status_matches() {
        let (db, order_id) = pending_order().await;
        transition(&db, order_id, OrderStatus::Pending, OrderStatus::Paid)
            .await
            .expect("transition");
        assert_eq!(status_of(&db, order_id).await, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn stale_transition_does_not_overwrite_a_terminal_status() {
        let (db, order_id) = pending_order().await;
        transition(&db, order_id, OrderStatus::Pending, OrderStatus::Paid)
            .await
            .expect("first writer");

        // Second writer still believes the order is PENDING.
        let err = transition(&db, order_id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::Conflict(_));
        assert_eq!(status_of(&db, order_id).await, OrderStatus::Paid);
    }
}
