//! Order service: checkout, history, and status changes.

use sqlx::PgPool;
use thiserror::Error;
use tracing::instrument;

use apothecary_core::{OrderId, OrderStatus, UserId};

use crate::config::DeliveryConfig;
use crate::db::{NewOrder, OrderRepository, PlaceOutcome, RepositoryError, TransitionOutcome};
use crate::models::{CurrentUser, Order};
use crate::services::cache::{ProductCache, prefix};

const MAX_ADDRESS_LENGTH: usize = 500;
const MAX_NOTE_LENGTH: usize = 1000;
const MIN_PHONE_DIGITS: usize = 7;
const MAX_PHONE_LENGTH: usize = 20;

/// Errors from order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Checkout with nothing in the cart.
    #[error("cart is empty")]
    EmptyCart,

    /// Delivery details failed validation.
    #[error("{0}")]
    Invalid(String),

    /// A product in the cart is no longer sold.
    #[error("{0} is no longer available")]
    ProductUnavailable(String),

    /// Not enough units on hand.
    #[error("insufficient stock for {product_name}: requested {requested}, available {available}")]
    InsufficientStock {
        product_name: String,
        requested: u32,
        available: u32,
    },

    /// No such order visible to the caller.
    #[error("order not found")]
    NotFound,

    /// The status change is not allowed.
    #[error("cannot change order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Unvalidated checkout fields.
#[derive(Debug, Clone, Default)]
pub struct CheckoutDraft {
    pub shipping_address: String,
    pub phone: String,
    pub note: Option<String>,
}

struct ValidCheckout {
    shipping_address: String,
    phone: String,
    note: Option<String>,
}

impl CheckoutDraft {
    fn validate(self) -> Result<ValidCheckout, OrderError> {
        let shipping_address = self.shipping_address.trim().to_owned();
        if shipping_address.is_empty() {
            return Err(OrderError::Invalid("shipping_address is required".to_owned()));
        }
        if shipping_address.chars().count() > MAX_ADDRESS_LENGTH {
            return Err(OrderError::Invalid(format!(
                "shipping_address must be at most {MAX_ADDRESS_LENGTH} characters"
            )));
        }

        let phone = self.phone.trim().to_owned();
        if !is_valid_phone(&phone) {
            return Err(OrderError::Invalid("phone is not a valid number".to_owned()));
        }

        let note = self
            .note
            .map(|n| n.trim().to_owned())
            .filter(|n| !n.is_empty());
        if note
            .as_ref()
            .is_some_and(|n| n.chars().count() > MAX_NOTE_LENGTH)
        {
            return Err(OrderError::Invalid(format!(
                "note must be at most {MAX_NOTE_LENGTH} characters"
            )));
        }

        Ok(ValidCheckout {
            shipping_address,
            phone,
            note,
        })
    }
}

/// Digits with common separators, optionally a leading `+`.
fn is_valid_phone(phone: &str) -> bool {
    let body = phone.strip_prefix('+').unwrap_or(phone);
    let digits = body.chars().filter(char::is_ascii_digit).count();
    phone.len() <= MAX_PHONE_LENGTH
        && digits >= MIN_PHONE_DIGITS
        && body
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')' | '.'))
}

/// Order service.
pub struct OrderService<'a> {
    orders: OrderRepository<'a>,
    cache: &'a ProductCache,
    delivery: &'a DeliveryConfig,
}

impl<'a> OrderService<'a> {
    /// Create a new order service.
    #[must_use]
    pub const fn new(
        pool: &'a PgPool,
        cache: &'a ProductCache,
        delivery: &'a DeliveryConfig,
    ) -> Self {
        Self {
            orders: OrderRepository::new(pool),
            cache,
            delivery,
        }
    }

    /// Place an order from the user's cart.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::EmptyCart` if the cart has no lines.
    /// Returns `OrderError::InsufficientStock` naming the first short product.
    #[instrument(skip(self, draft))]
    pub async fn place(&self, user_id: UserId, draft: CheckoutDraft) -> Result<Order, OrderError> {
        let valid = draft.validate()?;
        let details = NewOrder {
            shipping_address: &valid.shipping_address,
            phone: &valid.phone,
            note: valid.note.as_deref(),
        };

        match self.orders.place(user_id, &details, self.delivery).await? {
            PlaceOutcome::Placed(order) => {
                self.cache.invalidate(&prefix::STOCK);
                tracing::info!(
                    order_id = %order.id,
                    total = %order.total,
                    items = order.items.len(),
                    "Order placed"
                );
                Ok(order)
            }
            PlaceOutcome::EmptyCart => Err(OrderError::EmptyCart),
            PlaceOutcome::Unavailable { product_name } => {
                Err(OrderError::ProductUnavailable(product_name))
            }
            PlaceOutcome::InsufficientStock {
                product_name,
                requested,
                available,
            } => Err(OrderError::InsufficientStock {
                product_name,
                requested,
                available,
            }),
            PlaceOutcome::TotalTooLarge => Err(OrderError::Invalid(
                "order total exceeds the maximum order amount".to_owned(),
            )),
        }
    }

    /// The user's orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Repository` if a query fails.
    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>, OrderError> {
        Ok(self.orders.list_for_user(user_id).await?)
    }

    /// An order the viewer may see: their own, or any for admins.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NotFound` if the order doesn't exist or belongs
    /// to someone else.
    pub async fn get(&self, id: OrderId, viewer: &CurrentUser) -> Result<Order, OrderError> {
        self.orders
            .get(id)
            .await?
            .filter(|order| viewer.is_admin() || order.user_id == viewer.id)
            .ok_or(OrderError::NotFound)
    }

    /// Cancel one of the user's orders, restoring stock.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NotFound` if the order isn't the user's.
    /// Returns `OrderError::InvalidTransition` once the order has shipped.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: OrderId, user_id: UserId) -> Result<Order, OrderError> {
        self.transition(id, Some(user_id), OrderStatus::Cancelled)
            .await
    }

    /// All orders, optionally with one status.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Repository` if a query fails.
    pub async fn list_all(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, OrderError> {
        Ok(self.orders.list_all(status).await?)
    }

    /// Move any order to a new status.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NotFound` if the order doesn't exist.
    /// Returns `OrderError::InvalidTransition` if the change is not allowed.
    #[instrument(skip(self))]
    pub async fn set_status(&self, id: OrderId, to: OrderStatus) -> Result<Order, OrderError> {
        self.transition(id, None, to).await
    }

    async fn transition(
        &self,
        id: OrderId,
        owner: Option<UserId>,
        to: OrderStatus,
    ) -> Result<Order, OrderError> {
        match self.orders.transition(id, owner, to).await? {
            TransitionOutcome::Changed(order) => {
                if to == OrderStatus::Cancelled {
                    self.cache.invalidate(&prefix::STOCK);
                }
                tracing::info!(order_id = %id, status = %to, "Order status changed");
                Ok(order)
            }
            TransitionOutcome::NotFound => Err(OrderError::NotFound),
            TransitionOutcome::Rejected { from, to } => {
                Err(OrderError::InvalidTransition { from, to })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> CheckoutDraft {
        CheckoutDraft {
            shipping_address: " 12 Market St, Springfield ".to_string(),
            phone: "+1 (555) 010-4477".to_string(),
            note: Some("   ".to_string()),
        }
    }

    #[test]
    fn test_checkout_draft_trims() {
        let valid = draft().validate().expect("valid");
        assert_eq!(valid.shipping_address, "12 Market St, Springfield");
        assert_eq!(valid.phone, "+1 (555) 010-4477");
        assert_eq!(valid.note, None);
    }

    #[test]
    fn test_checkout_draft_rejects_missing_address() {
        let result = CheckoutDraft {
            shipping_address: "  ".to_string(),
            ..draft()
        }
        .validate();
        assert!(matches!(result, Err(OrderError::Invalid(_))));
    }

    #[test]
    fn test_checkout_draft_rejects_long_note() {
        let result = CheckoutDraft {
            note: Some("x".repeat(MAX_NOTE_LENGTH + 1)),
            ..draft()
        }
        .validate();
        assert!(matches!(result, Err(OrderError::Invalid(_))));
    }

    #[test]
    fn test_phone_rules() {
        assert!(is_valid_phone("5550104477"));
        assert!(is_valid_phone("+44 20 7946 0958"));
        assert!(is_valid_phone("555.010.4477"));
        assert!(!is_valid_phone("12345"));
        assert!(!is_valid_phone("call me"));
        assert!(!is_valid_phone("++15550104477"));
        assert!(!is_valid_phone("1234567890123456789012"));
    }

    #[test]
    fn test_transition_error_message() {
        let err = OrderError::InvalidTransition {
            from: OrderStatus::Shipped,
            to: OrderStatus::Cancelled,
        };
        assert_eq!(err.to_string(), "cannot change order from shipped to cancelled");
    }
}
