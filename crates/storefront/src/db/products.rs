//! Product repository.
//!
//! Listing filters are assembled with `sqlx::QueryBuilder` so every value is
//! bound, never interpolated.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder};

use apothecary_core::{CategoryId, Price, ProductId};

use super::{RepositoryError, count_column, price_column};
use crate::models::{Page, Product, ProductFilter};

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: i32,
    category_id: i32,
    category_name: String,
    name: String,
    description: Option<String>,
    manufacturer: Option<String>,
    price: Decimal,
    stock: i32,
    requires_prescription: bool,
    image_url: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = RepositoryError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: ProductId::new(row.id),
            category_id: CategoryId::new(row.category_id),
            category_name: row.category_name,
            name: row.name,
            description: row.description,
            manufacturer: row.manufacturer,
            price: price_column(row.price, "price")?,
            stock: count_column(row.stock, "stock")?,
            requires_prescription: row.requires_prescription,
            image_url: row.image_url,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Validated fields for creating or replacing a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductInput {
    pub category_id: CategoryId,
    pub name: String,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub price: Price,
    pub stock: u32,
    pub requires_prescription: bool,
    pub image_url: Option<String>,
    pub is_active: bool,
}

const SELECT_PRODUCT: &str = r"
    SELECT p.id, p.category_id, c.name AS category_name, p.name, p.description,
           p.manufacturer, p.price, p.stock, p.requires_prescription, p.image_url,
           p.is_active, p.created_at, p.updated_at
    FROM storefront.product p
    JOIN storefront.category c ON c.id = p.category_id
";

/// Append the `WHERE` clause for a listing filter. Only active products are listed.
fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &ProductFilter) {
    builder.push(" WHERE p.is_active");

    if let Some(category_id) = filter.category_id {
        builder.push(" AND p.category_id = ").push_bind(category_id);
    }
    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", escape_like(search));
        builder
            .push(" AND (LOWER(p.name) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(COALESCE(p.manufacturer, '')) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(COALESCE(p.description, '')) LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(min) = filter.min_price {
        builder.push(" AND p.price >= ").push_bind(min);
    }
    if let Some(max) = filter.max_price {
        builder.push(" AND p.price <= ").push_bind(max);
    }
    if filter.in_stock {
        builder.push(" AND p.stock > 0");
    }
}

/// Escape `LIKE` wildcards so user text matches literally.
fn escape_like(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn stock_param(stock: u32) -> Result<i32, RepositoryError> {
    i32::try_from(stock).map_err(|_| RepositoryError::Conflict("stock is too large".to_owned()))
}

/// Repository for product database operations.
pub struct ProductRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> ProductRepository<'a> {
    /// Create a new product repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// One page of active products matching `filter`.
    ///
    /// `filter` is expected to be normalized.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn list(&self, filter: &ProductFilter) -> Result<Page<Product>, RepositoryError> {
        let mut count = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*) FROM storefront.product p",
        );
        push_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(self.pool).await?;

        let mut query = QueryBuilder::<Postgres>::new(SELECT_PRODUCT);
        push_filter(&mut query, filter);
        query
            .push(" ORDER BY ")
            .push(filter.sort.order_by())
            .push(" LIMIT ")
            .push_bind(i64::from(filter.page_size))
            .push(" OFFSET ")
            .push_bind(filter.offset());

        let rows: Vec<ProductRow> = query.build_query_as().fetch_all(self.pool).await?;
        let items = rows
            .into_iter()
            .map(Product::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(
            items,
            filter.page,
            filter.page_size,
            u64::try_from(total).unwrap_or_default(),
        ))
    }

    /// Get a product, active or not.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!("{SELECT_PRODUCT} WHERE p.id = $1"))
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        row.map(Product::try_from).transpose()
    }

    /// Create a product.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the category does not exist.
    pub async fn create(&self, input: &ProductInput) -> Result<Product, RepositoryError> {
        let id = sqlx::query_scalar::<_, ProductId>(
            r"
            INSERT INTO storefront.product
                (category_id, name, description, manufacturer, price, stock,
                 requires_prescription, image_url, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            ",
        )
        .bind(input.category_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.manufacturer)
        .bind(input.price)
        .bind(stock_param(input.stock)?)
        .bind(input.requires_prescription)
        .bind(&input.image_url)
        .bind(input.is_active)
        .fetch_one(self.pool)
        .await
        .map_err(|e| RepositoryError::from_constraint(e, "category does not exist"))?;

        self.get(id).await?.ok_or(RepositoryError::NotFound)
    }

    /// Replace a product's fields.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the product doesn't exist.
    /// Returns `RepositoryError::Conflict` if the category does not exist.
    pub async fn update(
        &self,
        id: ProductId,
        input: &ProductInput,
    ) -> Result<Product, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE storefront.product
            SET category_id = $2, name = $3, description = $4, manufacturer = $5,
                price = $6, stock = $7, requires_prescription = $8, image_url = $9,
                is_active = $10, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(input.category_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.manufacturer)
        .bind(input.price)
        .bind(stock_param(input.stock)?)
        .bind(input.requires_prescription)
        .bind(&input.image_url)
        .bind(input.is_active)
        .execute(self.pool)
        .await
        .map_err(|e| RepositoryError::from_constraint(e, "category does not exist"))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        self.get(id).await?.ok_or(RepositoryError::NotFound)
    }

    /// Upsert by name within a category (used by catalog seeding).
    ///
    /// Returns `true` when a new row was inserted.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn upsert_by_name(&self, input: &ProductInput) -> Result<bool, RepositoryError> {
        let existing = sqlx::query_scalar::<_, ProductId>(
            "SELECT id FROM storefront.product WHERE name = $1 AND category_id = $2",
        )
        .bind(&input.name)
        .bind(input.category_id)
        .fetch_optional(self.pool)
        .await?;

        match existing {
            Some(id) => {
                self.update(id, input).await?;
                Ok(false)
            }
            None => {
                self.create(input).await?;
                Ok(true)
            }
        }
    }

    /// Delete a product.
    ///
    /// Cart lines referencing it are removed; order lines keep their snapshot.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the product doesn't exist.
    pub async fn delete(&self, id: ProductId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM storefront.product WHERE id = $1")
            .bind(id)
            .execute(self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    /// Delete every product and category (used by `seed --clear`).
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn clear_catalog(&self) -> Result<u64, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM storefront.product")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM storefront.category")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProductSort;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("aspirin"), "aspirin");
    }

    #[test]
    fn test_filter_sql_binds_every_value() {
        let filter = ProductFilter {
            category_id: Some(CategoryId::new(3)),
            search: Some("cold".to_string()),
            min_price: Some(Price::from_cents(100)),
            max_price: Some(Price::from_cents(2_000)),
            in_stock: true,
            sort: ProductSort::PriceAsc,
            ..ProductFilter::default()
        }
        .normalized();

        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM storefront.product p");
        push_filter(&mut builder, &filter);
        let sql = builder.sql();

        assert!(sql.contains("p.is_active"));
        assert!(sql.contains("p.category_id = $1"));
        assert!(sql.contains("LIKE $2"));
        assert!(sql.contains("p.price >= $5"));
        assert!(sql.contains("p.price <= $6"));
        assert!(sql.contains("p.stock > 0"));
        assert!(!sql.contains("cold"));
    }

    #[test]
    fn test_unfiltered_sql_only_hides_inactive() {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT 1 FROM storefront.product p");
        push_filter(&mut builder, &ProductFilter::default().normalized());
        assert_eq!(
            builder.sql(),
            "SELECT 1 FROM storefront.product p WHERE p.is_active"
        );
    }
}
