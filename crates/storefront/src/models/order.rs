//! Order domain types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use apothecary_core::{OrderId, OrderItemId, OrderStatus, Price, PriceError, ProductId, UserId};

use crate::config::DeliveryConfig;

/// A placed order with its lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub subtotal: Price,
    pub delivery_fee: Price,
    pub total: Price,
    pub shipping_address: String,
    pub phone: String,
    pub note: Option<String>,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A line of an order.
///
/// Name and price are copied at checkout, so the line still reads correctly
/// after the product changes or is deleted (`product_id` becomes `None`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub product_id: Option<ProductId>,
    pub product_name: String,
    pub unit_price: Price,
    pub quantity: u32,
    pub line_total: Price,
}

/// Money breakdown of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrderTotals {
    pub subtotal: Price,
    pub delivery_fee: Price,
    pub total: Price,
}

impl OrderTotals {
    /// Price a subtotal: delivery is free at or above the threshold, flat otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError::TooLarge`] if the total leaves the price range.
    pub fn quote(subtotal: Price, delivery: &DeliveryConfig) -> Result<Self, PriceError> {
        let delivery_fee = if subtotal >= delivery.free_threshold {
            Price::ZERO
        } else {
            delivery.fee
        };
        Ok(Self {
            subtotal,
            delivery_fee,
            total: subtotal.checked_add(delivery_fee)?,
        })
    }

    /// Price a set of `(unit_price, quantity)` lines.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError::TooLarge`] if a line, the subtotal or the total
    /// leaves the price range.
    pub fn for_lines(
        lines: impl IntoIterator<Item = (Price, u32)>,
        delivery: &DeliveryConfig,
    ) -> Result<Self, PriceError> {
        let subtotal = lines
            .into_iter()
            .try_fold(Price::ZERO, |acc, (unit_price, quantity)| {
                acc.checked_add(unit_price.checked_times(quantity)?)
            })?;
        Self::quote(subtotal, delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery() -> DeliveryConfig {
        DeliveryConfig {
            fee: Price::from_cents(500),
            free_threshold: Price::from_cents(5_000),
        }
    }

    #[test]
    fn test_fee_below_threshold() {
        let totals = OrderTotals::quote(Price::from_cents(4_999), &delivery()).expect("fits");
        assert_eq!(totals.delivery_fee, Price::from_cents(500));
        assert_eq!(totals.total.to_string(), "54.99");
    }

    #[test]
    fn test_free_at_threshold() {
        let totals = OrderTotals::quote(Price::from_cents(5_000), &delivery()).expect("fits");
        assert!(totals.delivery_fee.is_zero());
        assert_eq!(totals.total, Price::from_cents(5_000));
    }

    #[test]
    fn test_for_lines_multiplies_quantities() {
        let totals = OrderTotals::for_lines(
            [(Price::from_cents(1_299), 2), (Price::from_cents(350), 3)],
            &delivery(),
        )
        .expect("fits");
        assert_eq!(totals.subtotal.to_string(), "36.48");
        assert_eq!(totals.delivery_fee.to_string(), "5.00");
        assert_eq!(totals.total.to_string(), "41.48");
    }

    #[test]
    fn test_zero_fee_configuration() {
        let free = DeliveryConfig {
            fee: Price::ZERO,
            free_threshold: Price::from_cents(5_000),
        };
        let totals = OrderTotals::quote(Price::from_cents(100), &free).expect("fits");
        assert_eq!(totals.total, Price::from_cents(100));
    }

    #[test]
    fn test_totals_beyond_price_range() {
        let top = Price::new("99999999.99".parse().expect("decimal")).expect("valid");

        assert!(OrderTotals::for_lines([(top, 2)], &delivery()).is_err());
        assert!(OrderTotals::for_lines([(top, 1), (Price::from_cents(1), 1)], &delivery()).is_err());

        // Below the free-delivery threshold the fee alone can push it over.
        let steep = DeliveryConfig {
            fee: Price::from_cents(500),
            free_threshold: Price::new("99999999.99".parse().expect("decimal")).expect("valid"),
        };
        let near = Price::new("99999998.00".parse().expect("decimal")).expect("valid");
        assert!(OrderTotals::quote(near, &steep).is_err());
    }
}
