//! Cart service.
//!
//! Stock is checked when lines change so the cart never asks for more than
//! is on hand; checkout checks again under row locks.

use sqlx::PgPool;
use thiserror::Error;
use tracing::instrument;

use apothecary_core::{CartItemId, Price, ProductId, UserId};

use crate::db::{CartRepository, ProductRepository, RepositoryError};
use crate::models::{CartLine, CartView};

/// Largest quantity a single line may hold.
pub const MAX_LINE_QUANTITY: u32 = 999;

/// Errors from cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// Quantity outside the accepted range.
    #[error("quantity must be between {min} and {MAX_LINE_QUANTITY}")]
    InvalidQuantity { min: u32 },

    /// The product does not exist.
    #[error("product not found")]
    ProductNotFound,

    /// The product exists but is not sold.
    #[error("{0} is not available")]
    ProductUnavailable(String),

    /// Not enough units on hand.
    #[error("only {available} of {product_name} in stock (requested {requested})")]
    InsufficientStock {
        product_name: String,
        requested: u32,
        available: u32,
    },

    /// The line is not in the caller's cart.
    #[error("cart item not found")]
    ItemNotFound,

    /// The cart subtotal would exceed the largest order amount.
    #[error("cart total exceeds the maximum order amount")]
    TotalTooLarge,

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Convert a requested quantity, enforcing `min..=MAX_LINE_QUANTITY`.
fn checked_quantity(quantity: i64, min: u32) -> Result<u32, CartError> {
    u32::try_from(quantity)
        .ok()
        .filter(|q| (min..=MAX_LINE_QUANTITY).contains(q))
        .ok_or(CartError::InvalidQuantity { min })
}

fn ensure_stock(product_name: &str, requested: u32, available: u32) -> Result<(), CartError> {
    if requested > available {
        return Err(CartError::InsufficientStock {
            product_name: product_name.to_owned(),
            requested,
            available,
        });
    }
    Ok(())
}

/// Check the subtotal once `product_id`'s line holds `quantity` units.
fn ensure_total_fits(
    lines: &[CartLine],
    product_id: ProductId,
    unit_price: Price,
    quantity: u32,
) -> Result<(), CartError> {
    let others = lines
        .iter()
        .filter(|line| line.product_id != product_id)
        .map(|line| line.line_total);
    unit_price
        .checked_times(quantity)
        .and_then(|line_total| Price::checked_sum(others)?.checked_add(line_total))
        .map(|_| ())
        .map_err(|_| CartError::TotalTooLarge)
}

/// Cart service.
pub struct CartService<'a> {
    carts: CartRepository<'a>,
    products: ProductRepository<'a>,
}

impl<'a> CartService<'a> {
    /// Create a new cart service.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self {
            carts: CartRepository::new(pool),
            products: ProductRepository::new(pool),
        }
    }

    /// The user's cart. Users without a cart see an empty one.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if the query fails.
    pub async fn view(&self, user_id: UserId) -> Result<CartView, CartError> {
        let lines = self.carts.lines(user_id).await.map_err(total_error)?;
        CartView::from_lines(lines).map_err(|_| CartError::TotalTooLarge)
    }

    /// Add units of a product, merging with an existing line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::InvalidQuantity` if `quantity < 1`.
    /// Returns `CartError::ProductUnavailable` if the product is inactive.
    /// Returns `CartError::InsufficientStock` if the line would exceed stock.
    /// Returns `CartError::TotalTooLarge` if the subtotal would leave the price range.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<CartView, CartError> {
        let quantity = checked_quantity(quantity, 1)?;

        let product = self
            .products
            .get(product_id)
            .await?
            .ok_or(CartError::ProductNotFound)?;
        if !product.is_active {
            return Err(CartError::ProductUnavailable(product.name));
        }

        let cart_id = self.carts.get_or_create(user_id).await?;
        let lines = self.carts.lines(user_id).await.map_err(total_error)?;
        let in_cart = lines
            .iter()
            .find(|line| line.product_id == product_id)
            .map_or(0, |line| line.quantity);
        let total = in_cart.saturating_add(quantity);
        if total > MAX_LINE_QUANTITY {
            return Err(CartError::InvalidQuantity { min: 1 });
        }
        ensure_stock(&product.name, total, product.stock)?;
        ensure_total_fits(&lines, product_id, product.price, total)?;

        self.carts.add(cart_id, product_id, quantity).await?;
        self.view(user_id).await
    }

    /// Set a line's quantity; 0 removes it.
    ///
    /// # Errors
    ///
    /// Returns `CartError::ItemNotFound` if the line is not in the user's cart.
    /// Returns `CartError::InsufficientStock` if the quantity exceeds stock.
    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        user_id: UserId,
        item_id: CartItemId,
        quantity: i64,
    ) -> Result<CartView, CartError> {
        let quantity = checked_quantity(quantity, 0)?;
        if quantity == 0 {
            return self.remove_item(user_id, item_id).await;
        }

        let lines = self.carts.lines(user_id).await.map_err(total_error)?;
        let line = lines
            .iter()
            .find(|line| line.item_id == item_id)
            .ok_or(CartError::ItemNotFound)?;
        if !line.is_active {
            return Err(CartError::ProductUnavailable(line.name.clone()));
        }
        ensure_stock(&line.name, quantity, line.available_stock)?;
        ensure_total_fits(&lines, line.product_id, line.unit_price, quantity)?;

        self.carts
            .set_quantity(user_id, item_id, quantity)
            .await
            .map_err(item_error)?;
        self.view(user_id).await
    }

    /// Remove a line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::ItemNotFound` if the line is not in the user's cart.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        user_id: UserId,
        item_id: CartItemId,
    ) -> Result<CartView, CartError> {
        self.carts
            .remove(user_id, item_id)
            .await
            .map_err(item_error)?;
        self.view(user_id).await
    }

    /// Empty the cart.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if the query fails.
    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: UserId) -> Result<(), CartError> {
        self.carts.clear(user_id).await?;
        Ok(())
    }
}

fn total_error(err: RepositoryError) -> CartError {
    match err {
        RepositoryError::OutOfRange(_) => CartError::TotalTooLarge,
        other => CartError::Repository(other),
    }
}

fn item_error(err: RepositoryError) -> CartError {
    match err {
        RepositoryError::NotFound => CartError::ItemNotFound,
        other => CartError::Repository(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_quantity_bounds() {
        assert_eq!(checked_quantity(1, 1).ok(), Some(1));
        assert_eq!(checked_quantity(999, 1).ok(), Some(999));
        assert_eq!(checked_quantity(0, 0).ok(), Some(0));
        assert!(matches!(
            checked_quantity(0, 1),
            Err(CartError::InvalidQuantity { min: 1 })
        ));
        assert!(checked_quantity(-3, 0).is_err());
        assert!(checked_quantity(1000, 1).is_err());
        assert!(checked_quantity(i64::MAX, 1).is_err());
    }

    #[test]
    fn test_ensure_stock() {
        assert!(ensure_stock("Aspirin", 3, 3).is_ok());
        let err = ensure_stock("Aspirin", 4, 3).expect_err("over stock");
        assert_eq!(err.to_string(), "only 3 of Aspirin in stock (requested 4)");
    }

    fn cart_line(id: i32, product_id: i32, cents: u32, quantity: u32) -> CartLine {
        let unit_price = Price::from_cents(cents);
        CartLine {
            item_id: CartItemId::new(id),
            product_id: ProductId::new(product_id),
            name: format!("Product {product_id}"),
            unit_price,
            quantity,
            line_total: unit_price.checked_times(quantity).expect("fits"),
            available_stock: 1_000,
            requires_prescription: false,
            is_active: true,
        }
    }

    #[test]
    fn test_ensure_total_fits_replaces_the_changed_line() {
        let lines = vec![cart_line(1, 10, 1_000, 2), cart_line(2, 20, 250, 4)];
        assert!(ensure_total_fits(&lines, ProductId::new(10), Price::from_cents(1_000), 5).is_ok());

        let pricey = Price::new("60000000.00".parse().expect("decimal")).expect("valid");
        assert!(ensure_total_fits(&[], ProductId::new(30), pricey, 1).is_ok());
        assert!(matches!(
            ensure_total_fits(&[], ProductId::new(30), pricey, 2),
            Err(CartError::TotalTooLarge)
        ));

        // The existing line for the same product is replaced, not added to.
        let held = vec![CartLine {
            line_total: pricey,
            unit_price: pricey,
            ..cart_line(3, 30, 1, 1)
        }];
        assert!(ensure_total_fits(&held, ProductId::new(30), pricey, 1).is_ok());
        assert!(matches!(
            ensure_total_fits(&held, ProductId::new(40), pricey, 1),
            Err(CartError::TotalTooLarge)
        ));
    }

    #[test]
    fn test_total_error_mapping() {
        assert!(matches!(
            total_error(RepositoryError::OutOfRange("x".to_string())),
            CartError::TotalTooLarge
        ));
        assert!(matches!(
            total_error(RepositoryError::NotFound),
            CartError::Repository(_)
        ));
    }

    #[test]
    fn test_item_error_mapping() {
        assert!(matches!(
            item_error(RepositoryError::NotFound),
            CartError::ItemNotFound
        ));
        assert!(matches!(
            item_error(RepositoryError::DataCorruption("x".to_string())),
            CartError::Repository(_)
        ));
    }
}
