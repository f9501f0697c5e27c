//! Order route handlers for customers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::instrument;

use apothecary_core::OrderId;

use crate::error::Result;
use crate::middleware::RequireAuth;
use crate::models::Order;
use crate::services::{CheckoutDraft, OrderService};
use crate::state::AppState;

/// Checkout body.
#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub shipping_address: String,
    pub phone: String,
    pub note: Option<String>,
}

impl From<PlaceOrderRequest> for CheckoutDraft {
    fn from(req: PlaceOrderRequest) -> Self {
        Self {
            shipping_address: req.shipping_address,
            phone: req.phone,
            note: req.note,
        }
    }
}

pub(super) fn order_service(state: &AppState) -> OrderService<'_> {
    OrderService::new(state.pool(), state.cache(), &state.config().delivery)
}

/// Place an order from the cart.
///
/// POST /api/orders
#[instrument(skip(state, user, req), fields(user_id = %user.id))]
pub async fn place(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<Order>)> {
    let order = order_service(&state).place(user.id, req.into()).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /api/orders
pub async fn index(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
) -> Result<Json<Vec<Order>>> {
    Ok(Json(order_service(&state).list_for_user(user.id).await?))
}

/// GET /api/orders/{id}
pub async fn show(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>> {
    Ok(Json(order_service(&state).get(id, &user).await?))
}

/// POST /api/orders/{id}/cancel
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn cancel(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>> {
    Ok(Json(order_service(&state).cancel(id, user.id).await?))
}
