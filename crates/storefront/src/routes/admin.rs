//! Admin order management.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use tracing::instrument;

use apothecary_core::{OrderId, OrderStatus};

use crate::error::Result;
use crate::middleware::RequireAdmin;
use crate::models::Order;
use crate::state::AppState;

use super::orders::order_service;

/// Optional status filter.
#[derive(Debug, Default, Deserialize)]
pub struct OrdersQuery {
    pub status: Option<OrderStatus>,
}

/// Status change body.
#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: OrderStatus,
}

/// GET /api/admin/orders
pub async fn orders(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Query(query): Query<OrdersQuery>,
) -> Result<Json<Vec<Order>>> {
    Ok(Json(order_service(&state).list_all(query.status).await?))
}

/// PATCH /api/admin/orders/{id}/status
#[instrument(skip(state, admin), fields(admin_id = %admin.id))]
pub async fn set_order_status(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<OrderId>,
    Json(req): Json<SetStatusRequest>,
) -> Result<Json<Order>> {
    Ok(Json(order_service(&state).set_status(id, req.status).await?))
}

#[cfg(test)]
mod tests {
    use axum::http::Uri;

    use super::*;

    #[test]
    fn test_status_filter_parses() {
        let Query(query) =
            Query::<OrdersQuery>::try_from_uri(&Uri::from_static("/api/admin/orders?status=shipped"))
                .expect("query");
        assert_eq!(query.status, Some(OrderStatus::Shipped));

        assert!(
            Query::<OrdersQuery>::try_from_uri(&Uri::from_static("/api/admin/orders?status=lost"))
                .is_err()
        );
    }
}
