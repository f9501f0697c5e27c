//! Seed the catalog from a YAML file.
//!
//! Categories are matched by slug and products by name within their category,
//! so running the same file twice updates rows instead of duplicating them.
//!
//! ```yaml
//! categories:
//!   - name: Pain Relief
//!     slug: pain-relief            # optional, derived from name
//!     description: Tablets, gels and patches
//!     products:
//!       - name: Ibuprofen 200mg (24 tablets)
//!         manufacturer: Generic Labs
//!         price: "3.49"
//!         stock: 120
//!         requires_prescription: false
//! ```

use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, info};

use apothecary_core::CategoryId;
use apothecary_storefront::db::{CategoryRepository, ProductInput, ProductRepository};
use apothecary_storefront::services::catalog::ValidCategory;
use apothecary_storefront::services::{CategoryDraft, ProductDraft};

/// Top-level seed file.
#[derive(Debug, Deserialize)]
pub struct CatalogSeed {
    pub categories: Vec<CategorySeed>,
}

/// One category and its products.
#[derive(Debug, Deserialize)]
pub struct CategorySeed {
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub products: Vec<ProductSeed>,
}

/// One product.
#[derive(Debug, Deserialize)]
pub struct ProductSeed {
    pub name: String,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
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

/// A validated category ready to write. Products carry a placeholder
/// category id until the category row exists.
#[derive(Debug)]
pub struct PlannedCategory {
    pub category: ValidCategory,
    pub products: Vec<ProductInput>,
}

/// Validate the whole file before touching the database.
///
/// # Errors
///
/// Returns every validation problem found, each prefixed with its location.
pub fn plan(seed: CatalogSeed) -> Result<Vec<PlannedCategory>, Vec<String>> {
    let mut planned = Vec::with_capacity(seed.categories.len());
    let mut errors = Vec::new();

    for (ci, cat) in seed.categories.into_iter().enumerate() {
        let label = format!("categories[{ci}] ({})", cat.name);
        let category = CategoryDraft {
            name: cat.name,
            slug: cat.slug,
            description: cat.description,
        }
        .validate();

        let mut products = Vec::with_capacity(cat.products.len());
        for (pi, product) in cat.products.into_iter().enumerate() {
            let name = product.name.clone();
            let draft = ProductDraft {
                category_id: CategoryId::new(0),
                name: product.name,
                description: product.description,
                manufacturer: product.manufacturer,
                price: product.price,
                stock: product.stock,
                requires_prescription: product.requires_prescription,
                image_url: product.image_url,
                is_active: product.is_active,
            };
            match draft.validate() {
                Ok(input) => products.push(input),
                Err(e) => errors.push(format!("{label} products[{pi}] ({name}): {e}")),
            }
        }

        match category {
            Ok(category) => planned.push(PlannedCategory { category, products }),
            Err(e) => errors.push(format!("{label}: {e}")),
        }
    }

    if errors.is_empty() {
        Ok(planned)
    } else {
        Err(errors)
    }
}

/// Seed categories and products from a YAML file.
///
/// # Arguments
///
/// * `file_path` - Path to the YAML file
/// * `clear_existing` - Delete every product and category first
///
/// # Errors
///
/// Returns an error if the file cannot be read or fails validation, or a
/// database operation fails.
pub async fn catalog(file_path: &str, clear_existing: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = Path::new(file_path);
    if !path.exists() {
        return Err(format!("File not found: {file_path}").into());
    }

    info!(path = %file_path, "Loading catalog from file");

    // Read and validate YAML before connecting to database
    let content = tokio::fs::read_to_string(path).await?;
    let seed: CatalogSeed = serde_yaml::from_str(&content)?;

    let planned = match plan(seed) {
        Ok(planned) => planned,
        Err(errors) => {
            error!("Catalog validation failed:");
            for err in &errors {
                error!("  - {err}");
            }
            return Err(format!("{} validation errors found", errors.len()).into());
        }
    };

    let pool = super::connect().await?;
    let categories = CategoryRepository::new(&pool);
    let products = ProductRepository::new(&pool);

    if clear_existing {
        let removed = products.clear_catalog().await?;
        info!(products = removed, "Cleared existing catalog");
    }

    let mut inserted = 0_u32;
    let mut updated = 0_u32;
    for entry in &planned {
        let category_id = categories.upsert_by_slug(&entry.category.as_input()).await?;
        for input in &entry.products {
            let input = ProductInput {
                category_id,
                ..input.clone()
            };
            if products.upsert_by_name(&input).await? {
                inserted += 1;
            } else {
                updated += 1;
            }
        }
    }

    info!("Seeding complete!");
    info!("  Categories: {}", planned.len());
    info!("  Products inserted: {inserted}");
    info!("  Products updated: {updated}");

    Ok(())
}
