//! Category repository.

use sqlx::PgPool;

use apothecary_core::CategoryId;

use super::RepositoryError;
use crate::models::Category;

#[derive(Debug, sqlx::FromRow)]
struct CategoryRow {
    id: i32,
    name: String,
    slug: String,
    description: Option<String>,
    product_count: i64,
}

impl From<CategoryRow> for Category {
    fn from(row: CategoryRow) -> Self {
        Self {
            id: CategoryId::new(row.id),
            name: row.name,
            slug: row.slug,
            description: row.description,
            product_count: row.product_count,
        }
    }
}

/// Fields accepted when creating or replacing a category.
#[derive(Debug, Clone)]
pub struct CategoryInput<'a> {
    pub name: &'a str,
    pub slug: &'a str,
    pub description: Option<&'a str>,
}

const SELECT_WITH_COUNT: &str = r"
    SELECT c.id, c.name, c.slug, c.description,
           (SELECT COUNT(*) FROM storefront.product p
            WHERE p.category_id = c.id AND p.is_active) AS product_count
    FROM storefront.category c
";

/// Repository for category database operations.
pub struct CategoryRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> CategoryRepository<'a> {
    /// Create a new category repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// List all categories by name, with active product counts.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list(&self) -> Result<Vec<Category>, RepositoryError> {
        let rows =
            sqlx::query_as::<_, CategoryRow>(&format!("{SELECT_WITH_COUNT} ORDER BY c.name"))
                .fetch_all(self.pool)
                .await?;

        Ok(rows.into_iter().map(Category::from).collect())
    }

    /// Get one category.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get(&self, id: CategoryId) -> Result<Option<Category>, RepositoryError> {
        let row = sqlx::query_as::<_, CategoryRow>(&format!("{SELECT_WITH_COUNT} WHERE c.id = $1"))
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(row.map(Category::from))
    }

    /// Find a category id by slug.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn id_by_slug(&self, slug: &str) -> Result<Option<CategoryId>, RepositoryError> {
        let id = sqlx::query_scalar::<_, CategoryId>(
            "SELECT id FROM storefront.category WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(self.pool)
        .await?;

        Ok(id)
    }

    /// Create a category.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the name or slug is taken.
    pub async fn create(&self, input: &CategoryInput<'_>) -> Result<Category, RepositoryError> {
        let row = sqlx::query_as::<_, CategoryRow>(
            r"
            INSERT INTO storefront.category (name, slug, description)
            VALUES ($1, $2, $3)
            RETURNING id, name, slug, description, 0::BIGINT AS product_count
            ",
        )
        .bind(input.name)
        .bind(input.slug)
        .bind(input.description)
        .fetch_one(self.pool)
        .await
        .map_err(|e| RepositoryError::from_constraint(e, "category name or slug already exists"))?;

        Ok(row.into())
    }

    /// Replace a category's fields.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the category doesn't exist.
    /// Returns `RepositoryError::Conflict` if the name or slug is taken.
    pub async fn update(
        &self,
        id: CategoryId,
        input: &CategoryInput<'_>,
    ) -> Result<Category, RepositoryError> {
        let updated = sqlx::query(
            r"
            UPDATE storefront.category
            SET name = $2, slug = $3, description = $4
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(input.name)
        .bind(input.slug)
        .bind(input.description)
        .execute(self.pool)
        .await
        .map_err(|e| RepositoryError::from_constraint(e, "category name or slug already exists"))?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        self.get(id).await?.ok_or(RepositoryError::NotFound)
    }

    /// Upsert by slug (used by catalog seeding).
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if another category already has the name.
    pub async fn upsert_by_slug(
        &self,
        input: &CategoryInput<'_>,
    ) -> Result<CategoryId, RepositoryError> {
        let id = sqlx::query_scalar::<_, CategoryId>(
            r"
            INSERT INTO storefront.category (name, slug, description)
            VALUES ($1, $2, $3)
            ON CONFLICT (slug) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description
            RETURNING id
            ",
        )
        .bind(input.name)
        .bind(input.slug)
        .bind(input.description)
        .fetch_one(self.pool)
        .await
        .map_err(|e| RepositoryError::from_constraint(e, "category name already exists"))?;

        Ok(id)
    }

    /// Delete a category.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the category doesn't exist.
    /// Returns `RepositoryError::Conflict` if products still reference it.
    pub async fn delete(&self, id: CategoryId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM storefront.category WHERE id = $1")
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| RepositoryError::from_constraint(e, "category still has products"))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}
