//! Cart repository. Each user owns at most one cart, created lazily.

use rust_decimal::Decimal;
use sqlx::PgPool;

use apothecary_core::{CartId, CartItemId, ProductId, UserId};

use super::{RepositoryError, count_column, price_column};
use crate::models::CartLine;

#[derive(Debug, sqlx::FromRow)]
struct CartLineRow {
    item_id: i32,
    product_id: i32,
    name: String,
    unit_price: Decimal,
    quantity: i32,
    stock: i32,
    requires_prescription: bool,
    is_active: bool,
}

impl TryFrom<CartLineRow> for CartLine {
    type Error = RepositoryError;

    fn try_from(row: CartLineRow) -> Result<Self, Self::Error> {
        let unit_price = price_column(row.unit_price, "price")?;
        let quantity = count_column(row.quantity, "quantity")?;
        let line_total = unit_price
            .checked_times(quantity)
            .map_err(|e| RepositoryError::OutOfRange(format!("{}: {e}", row.name)))?;
        Ok(Self {
            item_id: CartItemId::new(row.item_id),
            product_id: ProductId::new(row.product_id),
            name: row.name,
            unit_price,
            quantity,
            line_total,
            available_stock: count_column(row.stock, "stock")?,
            requires_prescription: row.requires_prescription,
            is_active: row.is_active,
        })
    }
}

fn quantity_param(quantity: u32) -> Result<i32, RepositoryError> {
    i32::try_from(quantity)
        .map_err(|_| RepositoryError::Conflict("quantity is too large".to_owned()))
}

/// Repository for cart database operations.
pub struct CartRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> CartRepository<'a> {
    /// Create a new cart repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Get the user's cart id, creating the cart on first use.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_or_create(&self, user_id: UserId) -> Result<CartId, RepositoryError> {
        let id = sqlx::query_scalar::<_, CartId>(
            r"
            INSERT INTO storefront.cart (user_id)
            VALUES ($1)
            ON CONFLICT (user_id) DO UPDATE SET updated_at = NOW()
            RETURNING id
            ",
        )
        .bind(user_id)
        .fetch_one(self.pool)
        .await?;

        Ok(id)
    }

    /// All lines of the user's cart, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::OutOfRange` if a line total leaves the price range.
    pub async fn lines(&self, user_id: UserId) -> Result<Vec<CartLine>, RepositoryError> {
        let rows = sqlx::query_as::<_, CartLineRow>(
            r"
            SELECT ci.id AS item_id, p.id AS product_id, p.name, p.price AS unit_price,
                   ci.quantity, p.stock, p.requires_prescription, p.is_active
            FROM storefront.cart c
            JOIN storefront.cart_item ci ON ci.cart_id = c.id
            JOIN storefront.product p ON p.id = ci.product_id
            WHERE c.user_id = $1
            ORDER BY ci.added_at, ci.id
            ",
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(CartLine::try_from).collect()
    }

    /// Add units of a product, merging with an existing line.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn add(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartItemId, RepositoryError> {
        let id = sqlx::query_scalar::<_, CartItemId>(
            r"
            INSERT INTO storefront.cart_item (cart_id, product_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (cart_id, product_id)
            DO UPDATE SET quantity = storefront.cart_item.quantity + EXCLUDED.quantity
            RETURNING id
            ",
        )
        .bind(cart_id)
        .bind(product_id)
        .bind(quantity_param(quantity)?)
        .fetch_one(self.pool)
        .await?;

        Ok(id)
    }

    /// Set a line's quantity.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the line is not in the user's cart.
    pub async fn set_quantity(
        &self,
        user_id: UserId,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE storefront.cart_item ci
            SET quantity = $3
            FROM storefront.cart c
            WHERE ci.cart_id = c.id AND c.user_id = $1 AND ci.id = $2
            ",
        )
        .bind(user_id)
        .bind(item_id)
        .bind(quantity_param(quantity)?)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    /// Remove a line.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the line is not in the user's cart.
    pub async fn remove(&self, user_id: UserId, item_id: CartItemId) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            DELETE FROM storefront.cart_item ci
            USING storefront.cart c
            WHERE ci.cart_id = c.id AND c.user_id = $1 AND ci.id = $2
            ",
        )
        .bind(user_id)
        .bind(item_id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    /// Remove every line from the user's cart.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn clear(&self, user_id: UserId) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            DELETE FROM storefront.cart_item ci
            USING storefront.cart c
            WHERE ci.cart_id = c.id AND c.user_id = $1
            ",
        )
        .bind(user_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }
}
