use crate::{
    entities::product,
    errors::ServiceError,
    services::commerce::cart_service::CartSnapshot,
};
use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{debug, warn};
use uuid::Uuid;

fn insufficient_stock(product_name: &str) -> ServiceError {
    ServiceError::InsufficientStock(format!(
        "Insufficient stock for product: {}",
        product_name
    ))
}

/// Checks every line against the stock read with the snapshot.
///
/// Stops at the first line whose quantity exceeds stock. Advisory only:
/// [`reserve_stock`] inside the order transaction is the real guard.
pub fn validate_stock(snapshot: &CartSnapshot) -> Result<(), ServiceError> {
    match snapshot.lines.iter().find(|line| line.quantity > line.stock) {
        Some(line) => {
            debug!(
                product_id = %line.product_id,
                requested = line.quantity,
                available = line.stock,
                "stock check failed"
            );
            Err(insufficient_stock(&line.product_name))
        }
        None => Ok(()),
    }
}

/// Decrements stock only if enough remains, in a single statement.
///
/// `UPDATE products SET stock = stock - q WHERE id = ? AND stock >= q`.
/// Zero affected rows means a concurrent checkout got there first.
pub async fn reserve_stock<C>(
    conn: &C,
    product_id: Uuid,
    product_name: &str,
    quantity: i32,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let result = product::Entity::update_many()
        .col_expr(
            product::Column::Stock,
            Expr::col(product::Column::Stock).sub(quantity),
        )
        .col_expr(
            product::Column::UpdatedAt,
            Expr::value(chrono::Utc::now()),
        )
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::Stock.gte(quantity))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        warn!(%product_id, quantity, "conditional stock decrement matched no rows");
        return Err(insufficient_stock(product_name));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::commerce::cart_service::CartLine;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn line(name: &str, quantity: i32, stock: i32) -> CartLine {
        CartLine {
            cart_item_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            product_name: name.to_string(),
            unit_price: dec!(10.00),
            currency: "INR".to_string(),
            quantity,
            stock,
        }
    }

    fn snapshot(lines: Vec<CartLine>) -> CartSnapshot {
        CartSnapshot {
            cart_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            lines,
        }
    }

    #[test]
    fn quantity_equal_to_stock_passes() {
        assert!(validate_stock(&snapshot(vec![line("A", 5, 5)])).is_ok());
    }

    #[test]
    fn first_short_line_is_reported() {
        let snap = snapshot(vec![line("A", 1, 5), line("B", 2, 1), line("C", 9, 0)]);
        assert_matches!(
            validate_stock(&snap),
            Err(ServiceError::InsufficientStock(msg)) if msg == "Insufficient stock for product: B"
        );
    }
}
