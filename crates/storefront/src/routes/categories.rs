//! Category route handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::instrument;

use apothecary_core::CategoryId;

use crate::error::Result;
use crate::middleware::RequireAdmin;
use crate::models::Category;
use crate::services::{CatalogService, CategoryDraft};
use crate::state::AppState;

/// Category create/update body. The slug is derived from the name when omitted.
#[derive(Debug, Deserialize)]
pub struct CategoryRequest {
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
}

impl From<CategoryRequest> for CategoryDraft {
    fn from(req: CategoryRequest) -> Self {
        Self {
            name: req.name,
            slug: req.slug,
            description: req.description,
        }
    }
}

fn catalog(state: &AppState) -> CatalogService<'_> {
    CatalogService::new(state.pool(), state.cache())
}

/// GET /api/categories
pub async fn index(State(state): State<AppState>) -> Result<Json<Vec<Category>>> {
    Ok(Json(catalog(&state).list_categories().await?))
}

/// GET /api/categories/{id}
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<CategoryId>,
) -> Result<Json<Category>> {
    Ok(Json(catalog(&state).get_category(id).await?))
}

/// POST /api/categories
#[instrument(skip(state, req), fields(admin_id = %admin.id))]
pub async fn create(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(req): Json<CategoryRequest>,
) -> Result<(StatusCode, Json<Category>)> {
    let category = catalog(&state).create_category(req.into()).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// PUT /api/categories/{id}
#[instrument(skip(state, req), fields(admin_id = %admin.id))]
pub async fn update(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<CategoryId>,
    Json(req): Json<CategoryRequest>,
) -> Result<Json<Category>> {
    Ok(Json(catalog(&state).update_category(id, req.into()).await?))
}

/// DELETE /api/categories/{id}
///
/// Refused with 409 while products still reference the category.
#[instrument(skip(state), fields(admin_id = %admin.id))]
pub async fn delete(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<CategoryId>,
) -> Result<StatusCode> {
    catalog(&state).delete_category(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
