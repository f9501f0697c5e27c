//! Database operations for the storefront `PostgreSQL` schema.
//!
//! ## Tables (schema `storefront`)
//!
//! - `user` - Accounts, roles and the two-factor flag
//! - `two_factor_challenge` - One pending login challenge per user
//! - `session` - Tower-sessions storage
//! - `category`, `product` - Catalog
//! - `cart`, `cart_item` - One cart per user
//! - `order`, `order_item` - Placed orders with price snapshots
//!
//! Queries are built at runtime with `sqlx::query_as` and decoded into private
//! `FromRow` row types, which convert to domain models with `TryFrom` so bad
//! data surfaces as [`RepositoryError::DataCorruption`].
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p apothecary-cli -- migrate
//! ```

pub mod carts;
pub mod categories;
pub mod orders;
pub mod products;
pub mod two_factor;
pub mod users;

pub use carts::CartRepository;
pub use categories::{CategoryInput, CategoryRepository};
pub use orders::{NewOrder, OrderRepository, PlaceOutcome, TransitionOutcome};
pub use products::{ProductInput, ProductRepository};
pub use two_factor::TwoFactorRepository;
pub use users::UserRepository;

use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use apothecary_core::Price;

/// Errors from repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., unique email).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// A computed amount does not fit its column.
    #[error("out of range: {0}")]
    OutOfRange(String),
}

impl RepositoryError {
    /// Map unique and foreign-key violations to [`RepositoryError::Conflict`].
    pub(crate) fn from_constraint(err: sqlx::Error, message: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = err
            && (db_err.is_unique_violation() || db_err.is_foreign_key_violation())
        {
            return Self::Conflict(message.to_owned());
        }
        Self::Database(err)
    }
}

/// Decode a `NUMERIC(10, 2)` column into a [`Price`].
pub(crate) fn price_column(value: Decimal, column: &str) -> Result<Price, RepositoryError> {
    Price::new(value)
        .map_err(|e| RepositoryError::DataCorruption(format!("invalid {column} in database: {e}")))
}

/// Decode a non-negative `INTEGER` column.
pub(crate) fn count_column(value: i32, column: &str) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::DataCorruption(format!("negative {column} in database")))
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
