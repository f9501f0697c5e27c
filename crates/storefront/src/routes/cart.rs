//! Cart route handlers.
//!
//! Every mutation answers with the updated cart so the client can redraw
//! without a second request.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::instrument;

use apothecary_core::{CartItemId, ProductId};

use crate::error::Result;
use crate::middleware::RequireAuth;
use crate::models::CartView;
use crate::services::CartService;
use crate::state::AppState;

/// Add-to-cart body.
#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: ProductId,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

const fn default_quantity() -> i64 {
    1
}

/// Quantity update body.
#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: i64,
}

/// GET /api/cart
pub async fn show(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
) -> Result<Json<CartView>> {
    Ok(Json(CartService::new(state.pool()).view(user.id).await?))
}

/// POST /api/cart/items
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn add_item(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<CartView>> {
    let cart = CartService::new(state.pool())
        .add_item(user.id, req.product_id, req.quantity)
        .await?;
    Ok(Json(cart))
}

/// PATCH /api/cart/items/{item_id}
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn update_item(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path(item_id): Path<CartItemId>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<Json<CartView>> {
    let cart = CartService::new(state.pool())
        .update_item(user.id, item_id, req.quantity)
        .await?;
    Ok(Json(cart))
}

/// DELETE /api/cart/items/{item_id}
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn remove_item(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path(item_id): Path<CartItemId>,
) -> Result<Json<CartView>> {
    let cart = CartService::new(state.pool())
        .remove_item(user.id, item_id)
        .await?;
    Ok(Json(cart))
}

/// DELETE /api/cart
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn clear(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
) -> Result<StatusCode> {
    CartService::new(state.pool()).clear(user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_item_quantity_defaults_to_one() {
        let req: AddItemRequest = serde_json::from_str(r#"{"product_id": 9}"#).expect("json");
        assert_eq!(req.product_id, ProductId::new(9));
        assert_eq!(req.quantity, 1);
    }
}
