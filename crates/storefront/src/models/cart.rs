//! Cart view types.

use serde::Serialize;

use apothecary_core::{CartItemId, Price, PriceError, ProductId};

/// One line of a cart, joined with current product data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartLine {
    pub item_id: CartItemId,
    pub product_id: ProductId,
    pub name: String,
    /// Current catalog price; the order snapshots it at checkout.
    pub unit_price: Price,
    pub quantity: u32,
    pub line_total: Price,
    pub available_stock: u32,
    pub requires_prescription: bool,
    pub is_active: bool,
}

/// The caller's cart with derived totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartView {
    pub items: Vec<CartLine>,
    pub subtotal: Price,
    /// Total units across all lines.
    pub item_count: u32,
}

impl CartView {
    /// Create an empty cart.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            items: Vec::new(),
            subtotal: Price::ZERO,
            item_count: 0,
        }
    }

    /// Build a view from lines, summing subtotal and unit count.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError::TooLarge`] if the subtotal leaves the price range.
    pub fn from_lines(items: Vec<CartLine>) -> Result<Self, PriceError> {
        let subtotal = Price::checked_sum(items.iter().map(|line| line.line_total))?;
        let item_count = items.iter().map(|line| line.quantity).sum();
        Ok(Self {
            items,
            subtotal,
            item_count,
        })
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
