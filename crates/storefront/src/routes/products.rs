//! Product route handlers.
//!
//! Public listing and detail reads go through the catalog cache; admin writes
//! invalidate it.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::instrument;

use apothecary_core::{CategoryId, Price, ProductId};

use crate::error::Result;
use crate::middleware::RequireAdmin;
use crate::models::{Page, Product, ProductFilter, ProductSort};
use crate::services::{CatalogService, ProductDraft};
use crate::state::AppState;

/// Listing query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct ProductQuery {
    pub category_id: Option<CategoryId>,
    pub search: Option<String>,
    pub min_price: Option<Price>,
    pub max_price: Option<Price>,
    pub in_stock: Option<bool>,
    pub sort: Option<ProductSort>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl From<ProductQuery> for ProductFilter {
    fn from(query: ProductQuery) -> Self {
        Self {
            category_id: query.category_id,
            search: query.search,
            min_price: query.min_price,
            max_price: query.max_price,
            in_stock: query.in_stock.unwrap_or(false),
            sort: query.sort.unwrap_or_default(),
            page: query.page.unwrap_or(1),
            page_size: query.page_size.unwrap_or(0),
        }
    }
}

/// Product create/update body.
#[derive(Debug, Deserialize)]
pub struct ProductRequest {
    pub category_id: CategoryId,
    pub name: String,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    /// Decimal string or number; validated as a non-negative 2-place amount.
    pub price: Decimal,
    pub stock: i64,
    #[serde(default)]
    pub requires_prescription: bool,
    pub image_url: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

const fn default_active() -> bool {
    true
}

impl From<ProductRequest> for ProductDraft {
    fn from(req: ProductRequest) -> Self {
        Self {
            category_id: req.category_id,
            name: req.name,
            description: req.description,
            manufacturer: req.manufacturer,
            price: req.price,
            stock: req.stock,
            requires_prescription: req.requires_prescription,
            image_url: req.image_url,
            is_active: req.is_active,
        }
    }
}

fn catalog(state: &AppState) -> CatalogService<'_> {
    CatalogService::new(state.pool(), state.cache())
}

/// GET /api/products
#[instrument(skip(state))]
pub async fn index(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> Result<Json<Page<Product>>> {
    Ok(Json(catalog(&state).list_products(query.into()).await?))
}

/// GET /api/products/{id}
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<ProductId>,
) -> Result<Json<Product>> {
    Ok(Json(catalog(&state).get_product(id).await?))
}

/// POST /api/products
#[instrument(skip(state, req), fields(admin_id = %admin.id))]
pub async fn create(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(req): Json<ProductRequest>,
) -> Result<(StatusCode, Json<Product>)> {
    let product = catalog(&state).create_product(req.into()).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

/// PUT /api/products/{id}
#[instrument(skip(state, req), fields(admin_id = %admin.id))]
pub async fn update(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<ProductId>,
    Json(req): Json<ProductRequest>,
) -> Result<Json<Product>> {
    Ok(Json(catalog(&state).update_product(id, req.into()).await?))
}

/// DELETE /api/products/{id}
#[instrument(skip(state), fields(admin_id = %admin.id))]
pub async fn delete(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<ProductId>,
) -> Result<StatusCode> {
    catalog(&state).delete_product(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
