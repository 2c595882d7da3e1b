use crate::{
    entities::{cart, cart_item, product},
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const EMPTY_CART_MESSAGE: &str = "Your cart is empty.";

/// One cart line joined with the product it refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub cart_item_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: Decimal,
    pub currency: String,
    pub quantity: i32,
    /// Stock level at read time
    pub stock: i32,
}

impl CartLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Point-in-time view of a non-empty cart, taken before any checkout write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartSnapshot {
    pub cart_id: Uuid,
    pub user_id: Uuid,
    pub lines: Vec<CartLine>,
}

impl CartSnapshot {
    /// Sum of price × quantity over all lines.
    pub fn subtotal(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    /// The single currency shared by every line.
    pub fn currency(&self) -> Result<String, ServiceError> {
        let first = self
            .lines
            .first()
            .ok_or_else(|| ServiceError::BadRequest(EMPTY_CART_MESSAGE.to_string()))?;

        if let Some(other) = self
            .lines
            .iter()
            .find(|line| !line.currency.eq_ignore_ascii_case(&first.currency))
        {
            return Err(ServiceError::ValidationError(format!(
                "Cart mixes currencies ({} and {}); check out items of one currency at a time",
                first.currency, other.currency
            )));
        }

        Ok(first.currency.to_ascii_uppercase())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineView {
    pub product_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub currency: String,
    pub quantity: i32,
    pub line_total: Decimal,
}

/// Cart as returned to the customer. An absent cart is shown as empty.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub cart_id: Option<Uuid>,
    pub items: Vec<CartLineView>,
    pub subtotal: Decimal,
}

impl CartView {
    fn empty() -> Self {
        Self {
            cart_id: None,
            items: Vec::new(),
            subtotal: Decimal::ZERO,
        }
    }

    fn from_lines(cart_id: Uuid, lines: &[CartLine]) -> Self {
        let items = lines
            .iter()
            .map(|line| CartLineView {
                product_id: line.product_id,
                name: line.product_name.clone(),
                price: line.unit_price,
                currency: line.currency.clone(),
                quantity: line.quantity,
                line_total: line.line_total(),
            })
            .collect();
        Self {
            cart_id: Some(cart_id),
            items,
            subtotal: lines.iter().map(CartLine::line_total).sum(),
        }
    }
}

/// Reads a cart's lines and their products in a single joined query.
pub(crate) async fn load_lines<C>(conn: &C, cart_id: Uuid) -> Result<Vec<CartLine>, ServiceError>
where
    C: ConnectionTrait,
{
    let rows = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .find_also_related(product::Entity)
        .order_by_asc(cart_item::Column::CreatedAt)
        .order_by_asc(cart_item::Column::Id)
        .all(conn)
        .await?;

    rows.into_iter()
        .map(|(item, product)| {
            let product = product.ok_or_else(|| {
                warn!(cart_item_id = %item.id, product_id = %item.product_id, "cart line points at a missing product");
                ServiceError::NotFound(format!("Product {} not found", item.product_id))
            })?;
            Ok(CartLine {
                cart_item_id: item.id,
                product_id: product.id,
                product_name: product.name,
                unit_price: product.price,
                currency: product.currency,
                quantity: item.quantity,
                stock: product.stock,
            })
        })
        .collect()
}

/// Shopping cart service. Each user has at most one cart.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn find_cart(&self, user_id: Uuid) -> Result<Option<cart::Model>, ServiceError> {
        Ok(cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?)
    }

    /// Returns the user's cart, creating it on first use.
    async fn find_or_create_cart(&self, user_id: Uuid) -> Result<cart::Model, ServiceError> {
        if let Some(existing) = self.find_cart(user_id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let created = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await;

        match created {
            Ok(cart) => {
                info!(cart_id = %cart.id, %user_id, "Created cart");
                Ok(cart)
            }
            // Lost a race on the unique user_id; the winner's row is the cart.
            Err(err) => self.find_cart(user_id).await?.ok_or(ServiceError::from(err)),
        }
    }

    /// Loads the caller's cart for checkout.
    ///
    /// A missing cart and a cart with no lines are the same failure, so an
    /// empty-cart checkout looks identical however the cart got that way.
    #[instrument(skip(self))]
    pub async fn load_snapshot(&self, user_id: Uuid) -> Result<CartSnapshot, ServiceError> {
        let cart = self
            .find_cart(user_id)
            .await?
            .ok_or_else(|| ServiceError::BadRequest(EMPTY_CART_MESSAGE.to_string()))?;

        let lines = load_lines(&*self.db, cart.id).await?;
        if lines.is_empty() {
            return Err(ServiceError::BadRequest(EMPTY_CART_MESSAGE.to_string()));
        }

        Ok(CartSnapshot {
            cart_id: cart.id,
            user_id,
            lines,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        match self.find_cart(user_id).await? {
            Some(cart) => {
                let lines = load_lines(&*self.db, cart.id).await?;
                Ok(CartView::from_lines(cart.id, &lines))
            }
            None => Ok(CartView::empty()),
        }
    }

    /// Adds `quantity` of a product, merging into an existing line.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }

        product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let cart = self.find_or_create_cart(user_id).await?;

        let existing = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?;

        match existing {
            Some(item) => {
                let merged = item.quantity.checked_add(quantity).ok_or_else(|| {
                    ServiceError::ValidationError("quantity is too large".to_string())
                })?;
                let mut active: cart_item::ActiveModel = item.into();
                active.quantity = Set(merged);
                active.update(&*self.db).await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product_id),
                    quantity: Set(quantity),
                    created_at: Set(Utc::now()),
                }
                .insert(&*self.db)
                .await?;
            }
        }

        info!(cart_id = %cart.id, %product_id, quantity, "Added item to cart");
        self.get_cart(user_id).await
    }

    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let not_in_cart = || ServiceError::NotFound("Item not found in cart".to_string());
        let cart = self.find_cart(user_id).await?.ok_or_else(not_in_cart)?;

        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(not_in_cart());
        }

        self.get_cart(user_id).await
    }

    /// Removes every line; the cart row itself is kept.
    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        if let Some(cart) = self.find_cart(user_id).await? {
            let result = cart_item::Entity::delete_many()
                .filter(cart_item::Column::CartId.eq(cart.id))
                .exec(&*self.db)
                .await?;
            info!(cart_id = %cart.id, removed = result.rows_affected, "Cleared cart");
            return Ok(CartView::from_lines(cart.id, &[]));
        }
        Ok(CartView::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn line(name: &str, price: Decimal, currency: &str, quantity: i32) -> CartLine {
        CartLine {
            cart_item_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            product_name: name.to_string(),
            unit_price: price,
            currency: currency.to_string(),
            quantity,
            stock: 10,
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
    fn subtotal_sums_price_times_quantity() {
        let snap = snapshot(vec![
            line("A", dec!(10.00), "INR", 2),
            line("B", dec!(4.25), "INR", 3),
        ]);
        assert_eq!(snap.subtotal(), dec!(32.75));
    }

    #[test]
    fn currency_comes_from_lines() {
        let snap = snapshot(vec![line("A", dec!(1), "inr", 1), line("B", dec!(1), "INR", 1)]);
        assert_eq!(snap.currency().unwrap(), "INR");
    }

    #[test]
    fn mixed_currencies_are_rejected() {
        let snap = snapshot(vec![line("A", dec!(1), "INR", 1), line("B", dec!(1), "USD", 1)]);
        assert_matches!(snap.currency(), Err(ServiceError::ValidationError(msg)) if msg.contains("USD"));
    }
}
