//! Order repository.
//!
//! Checkout and cancellation run in one transaction each. Product rows are
//! locked with `SELECT ... FOR UPDATE` in id order, so concurrent checkouts
//! serialize per product and stock never goes negative.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use apothecary_core::{OrderId, OrderItemId, OrderStatus, ProductId, UserId};

use super::{RepositoryError, count_column, price_column};
use crate::config::DeliveryConfig;
use crate::models::{Order, OrderItem, OrderTotals};

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: i32,
    user_id: i32,
    status: OrderStatus,
    subtotal: Decimal,
    delivery_fee: Decimal,
    total: Decimal,
    shipping_address: String,
    phone: String,
    note: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order, RepositoryError> {
        Ok(Order {
            id: OrderId::new(self.id),
            user_id: UserId::new(self.user_id),
            status: self.status,
            subtotal: price_column(self.subtotal, "subtotal")?,
            delivery_fee: price_column(self.delivery_fee, "delivery_fee")?,
            total: price_column(self.total, "total")?,
            shipping_address: self.shipping_address,
            phone: self.phone,
            note: self.note,
            items,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow {
    id: i32,
    order_id: i32,
    product_id: Option<i32>,
    product_name: String,
    unit_price: Decimal,
    quantity: i32,
    line_total: Decimal,
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = RepositoryError;

    fn try_from(row: OrderItemRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: OrderItemId::new(row.id),
            product_id: row.product_id.map(ProductId::new),
            product_name: row.product_name,
            unit_price: price_column(row.unit_price, "unit_price")?,
            quantity: count_column(row.quantity, "quantity")?,
            line_total: price_column(row.line_total, "line_total")?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CheckoutLineRow {
    product_id: i32,
    quantity: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct LockedProductRow {
    id: i32,
    name: String,
    price: Decimal,
    stock: i32,
    is_active: bool,
}

const SELECT_ORDER: &str = r"
    SELECT id, user_id, status, subtotal, delivery_fee, total, shipping_address,
           phone, note, created_at, updated_at
    FROM storefront.order
";

// =============================================================================
// Inputs and Outcomes
// =============================================================================

/// Delivery details captured at checkout.
#[derive(Debug, Clone)]
pub struct NewOrder<'a> {
    pub shipping_address: &'a str,
    pub phone: &'a str,
    pub note: Option<&'a str>,
}

/// Result of attempting to place an order.
#[derive(Debug)]
pub enum PlaceOutcome {
    /// Order created, stock decremented, cart emptied.
    Placed(Order),
    /// Nothing to order.
    EmptyCart,
    /// A product is no longer sold.
    Unavailable { product_name: String },
    /// Not enough units on hand.
    InsufficientStock {
        product_name: String,
        requested: u32,
        available: u32,
    },
    /// The total does not fit the money columns.
    TotalTooLarge,
}

/// Result of a status change.
#[derive(Debug)]
pub enum TransitionOutcome {
    Changed(Order),
    NotFound,
    /// The transition table does not allow `from -> to`.
    Rejected { from: OrderStatus, to: OrderStatus },
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for order database operations.
pub struct OrderRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> OrderRepository<'a> {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Turn the user's cart into an order.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails; the transaction
    /// is rolled back and nothing changes.
    pub async fn place(
        &self,
        user_id: UserId,
        details: &NewOrder<'_>,
        delivery: &DeliveryConfig,
    ) -> Result<PlaceOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let lines = sqlx::query_as::<_, CheckoutLineRow>(
            r"
            SELECT ci.product_id, ci.quantity
            FROM storefront.cart_item ci
            JOIN storefront.cart c ON c.id = ci.cart_id
            WHERE c.user_id = $1
            ORDER BY ci.product_id
            ",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        if lines.is_empty() {
            return Ok(PlaceOutcome::EmptyCart);
        }

        let product_ids: Vec<i32> = lines.iter().map(|l| l.product_id).collect();
        let locked = sqlx::query_as::<_, LockedProductRow>(
            r"
            SELECT id, name, price, stock, is_active
            FROM storefront.product
            WHERE id = ANY($1)
            ORDER BY id
            FOR UPDATE
            ",
        )
        .bind(&product_ids)
        .fetch_all(&mut *tx)
        .await?;
        let locked: HashMap<i32, LockedProductRow> =
            locked.into_iter().map(|p| (p.id, p)).collect();

        let mut snapshot = Vec::with_capacity(lines.len());
        for line in &lines {
            let requested = count_column(line.quantity, "quantity")?;
            let Some(product) = locked.get(&line.product_id) else {
                return Err(RepositoryError::DataCorruption(format!(
                    "cart references missing product {}",
                    line.product_id
                )));
            };
            if !product.is_active {
                return Ok(PlaceOutcome::Unavailable {
                    product_name: product.name.clone(),
                });
            }
            let available = count_column(product.stock, "stock")?;
            if available < requested {
                return Ok(PlaceOutcome::InsufficientStock {
                    product_name: product.name.clone(),
                    requested,
                    available,
                });
            }
            let unit_price = price_column(product.price, "price")?;
            let Ok(line_total) = unit_price.checked_times(requested) else {
                return Ok(PlaceOutcome::TotalTooLarge);
            };
            snapshot.push((product, unit_price, requested, line_total));
        }

        let Ok(totals) = OrderTotals::for_lines(
            snapshot.iter().map(|(_, price, quantity, _)| (*price, *quantity)),
            delivery,
        ) else {
            return Ok(PlaceOutcome::TotalTooLarge);
        };

        let order_id = sqlx::query_scalar::<_, OrderId>(
            r"
            INSERT INTO storefront.order
                (user_id, status, subtotal, delivery_fee, total, shipping_address, phone, note)
            VALUES ($1, 'pending', $2, $3, $4, $5, $6, $7)
            RETURNING id
            ",
        )
        .bind(user_id)
        .bind(totals.subtotal)
        .bind(totals.delivery_fee)
        .bind(totals.total)
        .bind(details.shipping_address)
        .bind(details.phone)
        .bind(details.note)
        .fetch_one(&mut *tx)
        .await?;

        for (product, unit_price, quantity, line_total) in &snapshot {
            let quantity_param = i32::try_from(*quantity).unwrap_or(i32::MAX);
            sqlx::query(
                r"
                INSERT INTO storefront.order_item
                    (order_id, product_id, product_name, unit_price, quantity, line_total)
                VALUES ($1, $2, $3, $4, $5, $6)
                ",
            )
            .bind(order_id)
            .bind(product.id)
            .bind(&product.name)
            .bind(*unit_price)
            .bind(quantity_param)
            .bind(*line_total)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r"
                UPDATE storefront.product
                SET stock = stock - $2, updated_at = NOW()
                WHERE id = $1
                ",
            )
            .bind(product.id)
            .bind(quantity_param)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r"
            DELETE FROM storefront.cart_item ci
            USING storefront.cart c
            WHERE ci.cart_id = c.id AND c.user_id = $1
            ",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let order = fetch_order(&mut tx, order_id).await?.ok_or(RepositoryError::NotFound)?;
        tx.commit().await?;

        Ok(PlaceOutcome::Placed(order))
    }

    /// Get an order with its items.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("{SELECT_ORDER} WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.attach_items(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    /// A user's orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "{SELECT_ORDER} WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        self.attach_items(rows).await
    }

    /// Every order, newest first, optionally in one status.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn list_all(
        &self,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "{SELECT_ORDER} WHERE ($1::storefront.order_status IS NULL OR status = $1) \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(status)
        .fetch_all(self.pool)
        .await?;

        self.attach_items(rows).await
    }

    /// Move an order to a new status, restoring stock when it is cancelled.
    ///
    /// With `owner` set, only that user's order is considered.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn transition(
        &self,
        id: OrderId,
        owner: Option<UserId>,
        to: OrderStatus,
    ) -> Result<TransitionOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, (OrderStatus, i32)>(
            "SELECT status, user_id FROM storefront.order WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((from, user_id)) = current else {
            return Ok(TransitionOutcome::NotFound);
        };
        if owner.is_some_and(|owner| owner.as_i32() != user_id) {
            return Ok(TransitionOutcome::NotFound);
        }
        if !from.can_transition_to(to) {
            return Ok(TransitionOutcome::Rejected { from, to });
        }

        if to == OrderStatus::Cancelled {
            sqlx::query(
                r"
                UPDATE storefront.product p
                SET stock = p.stock + oi.quantity, updated_at = NOW()
                FROM storefront.order_item oi
                WHERE oi.order_id = $1 AND oi.product_id = p.id
                ",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE storefront.order SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(to)
            .execute(&mut *tx)
            .await?;

        let order = fetch_order(&mut tx, id).await?.ok_or(RepositoryError::NotFound)?;
        tx.commit().await?;

        Ok(TransitionOutcome::Changed(order))
    }

    async fn attach_items(&self, rows: Vec<OrderRow>) -> Result<Vec<Order>, RepositoryError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i32> = rows.iter().map(|r| r.id).collect();
        let item_rows = sqlx::query_as::<_, OrderItemRow>(
            r"
            SELECT id, order_id, product_id, product_name, unit_price, quantity, line_total
            FROM storefront.order_item
            WHERE order_id = ANY($1)
            ORDER BY id
            ",
        )
        .bind(&ids)
        .fetch_all(self.pool)
        .await?;

        let mut items: HashMap<i32, Vec<OrderItem>> = HashMap::new();
        for row in item_rows {
            let order_id = row.order_id;
            items.entry(order_id).or_default().push(OrderItem::try_from(row)?);
        }

        rows.into_iter()
            .map(|row| {
                let lines = items.remove(&row.id).unwrap_or_default();
                row.into_order(lines)
            })
            .collect()
    }
}

/// Read one order and its items inside an open transaction.
async fn fetch_order(
    tx: &mut Transaction<'_, Postgres>,
    id: OrderId,
) -> Result<Option<Order>, RepositoryError> {
    let Some(row) = sqlx::query_as::<_, OrderRow>(&format!("{SELECT_ORDER} WHERE id = $1"))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
    else {
        return Ok(None);
    };

    let items = sqlx::query_as::<_, OrderItemRow>(
        r"
        SELECT id, order_id, product_id, product_name, unit_price, quantity, line_total
        FROM storefront.order_item
        WHERE order_id = $1
        ORDER BY id
        ",
    )
    .bind(id)
    .fetch_all(&mut **tx)
    .await?
    .into_iter()
    .map(OrderItem::try_from)
    .collect::<Result<Vec<_>, _>>()?;

    row.into_order(items).map(Some)
}

