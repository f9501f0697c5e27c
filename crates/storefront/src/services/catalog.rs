//! Catalog service: categories and products behind the read cache.

use rust_decimal::Decimal;
use sqlx::PgPool;
use thiserror::Error;
use tracing::instrument;

use apothecary_core::{CategoryId, Price, ProductId};

use crate::db::{CategoryInput, CategoryRepository, ProductInput, ProductRepository, RepositoryError};
use crate::models::{Category, Page, Product, ProductFilter};
use crate::services::cache::{ProductCache, prefix};

const MAX_NAME_LENGTH: usize = 200;
const MAX_SLUG_LENGTH: usize = 100;

/// Errors from catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The category or product does not exist (or is hidden).
    #[error("not found")]
    NotFound,

    /// Input failed validation.
    #[error("{0}")]
    Invalid(String),

    /// A uniqueness or reference rule was violated.
    #[error("{0}")]
    Conflict(String),

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for CatalogError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Self::NotFound,
            RepositoryError::Conflict(msg) => Self::Conflict(msg),
            other => Self::Repository(other),
        }
    }
}

/// Unvalidated category fields from a request.
#[derive(Debug, Clone, Default)]
pub struct CategoryDraft {
    pub name: String,
    /// Derived from the name when absent.
    pub slug: Option<String>,
    pub description: Option<String>,
}

/// Category fields that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidCategory {
    name: String,
    slug: String,
    description: Option<String>,
}

impl ValidCategory {
    /// Borrow as repository input.
    #[must_use]
    pub fn as_input(&self) -> CategoryInput<'_> {
        CategoryInput {
            name: &self.name,
            slug: &self.slug,
            description: self.description.as_deref(),
        }
    }
}

impl CategoryDraft {
    /// Check field rules, deriving the slug from the name when absent.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Invalid` naming the first bad field.
    pub fn validate(self) -> Result<ValidCategory, CatalogError> {
        let name = required_text(&self.name, "name")?;
        let slug = match self.slug.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(slug) => {
                if !is_valid_slug(slug) {
                    return Err(CatalogError::Invalid(
                        "slug may contain only lowercase letters, digits, and hyphens".to_owned(),
                    ));
                }
                slug.to_owned()
            }
            None => slugify(&name),
        };
        if slug.is_empty() {
            return Err(CatalogError::Invalid(
                "slug could not be derived from name".to_owned(),
            ));
        }
        if slug.len() > MAX_SLUG_LENGTH {
            return Err(CatalogError::Invalid(format!(
                "slug must be at most {MAX_SLUG_LENGTH} characters"
            )));
        }

        Ok(ValidCategory {
            name,
            slug,
            description: optional_text(self.description),
        })
    }
}

/// Unvalidated product fields from a request.
#[derive(Debug, Clone)]
pub struct ProductDraft {
    pub category_id: CategoryId,
    pub name: String,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub price: Decimal,
    pub stock: i64,
    pub requires_prescription: bool,
    pub image_url: Option<String>,
    pub is_active: bool,
}

impl ProductDraft {
    /// Check field rules and produce repository input.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Invalid` naming the first bad field.
    pub fn validate(self) -> Result<ProductInput, CatalogError> {
        let name = required_text(&self.name, "name")?;
        let price = Price::new(self.price)
            .map_err(|e| CatalogError::Invalid(format!("price: {e}")))?;
        let stock = u32::try_from(self.stock)
            .ok()
            .filter(|s| i32::try_from(*s).is_ok())
            .ok_or_else(|| {
                CatalogError::Invalid("stock must be a non-negative whole number".to_owned())
            })?;
        let image_url = optional_text(self.image_url)
            .map(|raw| validate_image_url(&raw).map(|()| raw))
            .transpose()?;

        Ok(ProductInput {
            category_id: self.category_id,
            name,
            description: optional_text(self.description),
            manufacturer: optional_text(self.manufacturer),
            price,
            stock,
            requires_prescription: self.requires_prescription,
            image_url,
            is_active: self.is_active,
        })
    }
}

fn required_text(value: &str, field: &str) -> Result<String, CatalogError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CatalogError::Invalid(format!("{field} is required")));
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(CatalogError::Invalid(format!(
            "{field} must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(trimmed.to_owned())
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn validate_image_url(raw: &str) -> Result<(), CatalogError> {
    let parsed = url::Url::parse(raw)
        .map_err(|_| CatalogError::Invalid("image_url must be an absolute URL".to_owned()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(CatalogError::Invalid(
            "image_url must use http or https".to_owned(),
        ));
    }
    Ok(())
}

fn is_valid_slug(slug: &str) -> bool {
    !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Lowercase ASCII slug: runs of other characters become one hyphen.
#[must_use]
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Catalog service.
pub struct CatalogService<'a> {
    categories: CategoryRepository<'a>,
    products: ProductRepository<'a>,
    cache: &'a ProductCache,
}

impl<'a> CatalogService<'a> {
    /// Create a new catalog service.
    #[must_use]
    pub const fn new(pool: &'a PgPool, cache: &'a ProductCache) -> Self {
        Self {
            categories: CategoryRepository::new(pool),
            products: ProductRepository::new(pool),
            cache,
        }
    }

    // =========================================================================
    // Categories
    // =========================================================================

    /// All categories with active product counts.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Repository` if the query fails.
    pub async fn list_categories(&self) -> Result<Vec<Category>, CatalogError> {
        if let Some(categories) = self.cache.categories().await {
            return Ok(categories);
        }
        let categories = self.categories.list().await?;
        self.cache.put_categories(categories.clone()).await;
        Ok(categories)
    }

    /// One category.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if the category doesn't exist.
    pub async fn get_category(&self, id: CategoryId) -> Result<Category, CatalogError> {
        if let Some(category) = self.cache.category(id).await {
            return Ok(category);
        }
        let category = self.categories.get(id).await?.ok_or(CatalogError::NotFound)?;
        self.cache.put_category(category.clone()).await;
        Ok(category)
    }

    /// Create a category.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Invalid` for bad input.
    /// Returns `CatalogError::Conflict` if the name or slug is taken.
    #[instrument(skip(self))]
    pub async fn create_category(&self, draft: CategoryDraft) -> Result<Category, CatalogError> {
        let valid = draft.validate()?;
        let category = self.categories.create(&valid.as_input()).await?;
        self.cache.invalidate(&[prefix::CATEGORIES]);
        tracing::info!(category_id = %category.id, "Category created");
        Ok(category)
    }

    /// Replace a category's fields.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if the category doesn't exist.
    /// Returns `CatalogError::Conflict` if the name or slug is taken.
    #[instrument(skip(self))]
    pub async fn update_category(
        &self,
        id: CategoryId,
        draft: CategoryDraft,
    ) -> Result<Category, CatalogError> {
        let valid = draft.validate()?;
        let category = self.categories.update(id, &valid.as_input()).await?;
        // Products embed the category name
        self.cache.invalidate(&prefix::ALL);
        Ok(category)
    }

    /// Delete an empty category.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if the category doesn't exist.
    /// Returns `CatalogError::Conflict` if products still reference it.
    #[instrument(skip(self))]
    pub async fn delete_category(&self, id: CategoryId) -> Result<(), CatalogError> {
        self.categories.delete(id).await?;
        self.cache.invalidate(&[prefix::CATEGORIES]);
        tracing::info!(category_id = %id, "Category deleted");
        Ok(())
    }

    // =========================================================================
    // Products
    // =========================================================================

    /// One page of active products.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Invalid` if the price range is inverted.
    pub async fn list_products(&self, filter: ProductFilter) -> Result<Page<Product>, CatalogError> {
        let filter = filter.normalized();
        if let (Some(min), Some(max)) = (filter.min_price, filter.max_price)
            && min > max
        {
            return Err(CatalogError::Invalid(
                "min_price cannot exceed max_price".to_owned(),
            ));
        }

        if let Some(page) = self.cache.product_page(&filter).await {
            return Ok(page);
        }
        let page = self.products.list(&filter).await?;
        self.cache.put_product_page(&filter, page.clone()).await;
        Ok(page)
    }

    /// An active product.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if the product doesn't exist or is inactive.
    pub async fn get_product(&self, id: ProductId) -> Result<Product, CatalogError> {
        if let Some(product) = self.cache.product(id).await {
            return Ok(product);
        }
        let product = self
            .products
            .get(id)
            .await?
            .filter(|p| p.is_active)
            .ok_or(CatalogError::NotFound)?;
        self.cache.put_product(product.clone()).await;
        Ok(product)
    }

    /// Create a product.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Invalid` for bad input or an unknown category.
    #[instrument(skip(self))]
    pub async fn create_product(&self, draft: ProductDraft) -> Result<Product, CatalogError> {
        let input = draft.validate()?;
        let product = self
            .products
            .create(&input)
            .await
            .map_err(reference_error)?;
        self.cache.invalidate(&prefix::ALL);
        tracing::info!(product_id = %product.id, "Product created");
        Ok(product)
    }

    /// Replace a product's fields.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if the product doesn't exist.
    /// Returns `CatalogError::Invalid` for bad input or an unknown category.
    #[instrument(skip(self))]
    pub async fn update_product(
        &self,
        id: ProductId,
        draft: ProductDraft,
    ) -> Result<Product, CatalogError> {
        let input = draft.validate()?;
        let product = self
            .products
            .update(id, &input)
            .await
            .map_err(reference_error)?;
        self.cache.invalidate(&prefix::ALL);
        Ok(product)
    }

    /// Delete a product.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if the product doesn't exist.
    #[instrument(skip(self))]
    pub async fn delete_product(&self, id: ProductId) -> Result<(), CatalogError> {
        self.products.delete(id).await?;
        self.cache.invalidate(&prefix::ALL);
        tracing::info!(product_id = %id, "Product deleted");
        Ok(())
    }
}

/// A product write that trips a constraint has bad input, not a state conflict.
fn reference_error(err: RepositoryError) -> CatalogError {
    match err {
        RepositoryError::Conflict(msg) => CatalogError::Invalid(msg),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> ProductDraft {
        ProductDraft {
            category_id: CategoryId::new(1),
            name: "  Ibuprofen 200mg ".to_string(),
            description: Some("  ".to_string()),
            manufacturer: Some("Acme Pharma".to_string()),
            price: Decimal::new(799, 2),
            stock: 25,
            requires_prescription: false,
            image_url: Some("https://cdn.example.com/ibuprofen.png".to_string()),
            is_active: true,
        }
    }

    #[test]
    fn test_product_draft_trims_and_converts() {
        let input = draft().validate().expect("valid");
        assert_eq!(input.name, "Ibuprofen 200mg");
        assert_eq!(input.description, None);
        assert_eq!(input.price, Price::from_cents(799));
        assert_eq!(input.stock, 25);
    }

    #[test]
    fn test_product_draft_rejects_bad_fields() {
        let cases = [
            ProductDraft {
                name: " ".to_string(),
                ..draft()
            },
            ProductDraft {
                price: Decimal::new(-1, 2),
                ..draft()
            },
            ProductDraft {
                price: Decimal::new(1, 3),
                ..draft()
            },
            ProductDraft {
                stock: -1,
                ..draft()
            },
            ProductDraft {
                stock: i64::from(i32::MAX) + 1,
                ..draft()
            },
            ProductDraft {
                image_url: Some("javascript:alert(1)".to_string()),
                ..draft()
            },
            ProductDraft {
                image_url: Some("/relative.png".to_string()),
                ..draft()
            },
        ];
        for case in cases {
            assert!(
                matches!(case.clone().validate(), Err(CatalogError::Invalid(_))),
                "{case:?}"
            );
        }
    }

    #[test]
    fn test_zero_price_and_stock_are_allowed() {
        let input = ProductDraft {
            price: Decimal::ZERO,
            stock: 0,
            ..draft()
        }
        .validate()
        .expect("valid");
        assert!(input.price.is_zero());
        assert_eq!(input.stock, 0);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Cold & Flu"), "cold-flu");
        assert_eq!(slugify("  Vitamins -- Minerals  "), "vitamins-minerals");
        assert_eq!(slugify("Skin Care 2"), "skin-care-2");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_category_draft_slug_rules() {
        let derived = CategoryDraft {
            name: "Pain Relief".to_string(),
            ..CategoryDraft::default()
        }
        .validate()
        .expect("valid");
        assert_eq!(derived.slug, "pain-relief");

        let explicit = CategoryDraft {
            name: "Pain Relief".to_string(),
            slug: Some("analgesics".to_string()),
            description: Some(" Aches and pains ".to_string()),
        }
        .validate()
        .expect("valid");
        assert_eq!(explicit.slug, "analgesics");
        assert_eq!(explicit.description.as_deref(), Some("Aches and pains"));

        for bad in ["Upper", "has space", "-edge", "under_score"] {
            let result = CategoryDraft {
                name: "Name".to_string(),
                slug: Some(bad.to_string()),
                description: None,
            }
            .validate();
            assert!(matches!(result, Err(CatalogError::Invalid(_))), "{bad}");
        }

        assert!(
            CategoryDraft {
                name: "???".to_string(),
                ..CategoryDraft::default()
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_repository_errors_map_to_catalog_errors() {
        assert!(matches!(
            CatalogError::from(RepositoryError::NotFound),
            CatalogError::NotFound
        ));
        assert!(matches!(
            CatalogError::from(RepositoryError::Conflict("taken".to_string())),
            CatalogError::Conflict(_)
        ));
        assert!(matches!(
            reference_error(RepositoryError::Conflict("category does not exist".to_string())),
            CatalogError::Invalid(_)
        ));
    }
}
