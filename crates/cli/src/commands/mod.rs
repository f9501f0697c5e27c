//! CLI subcommands.

pub mod migrate;
pub mod seed;
pub mod user;

use secrecy::SecretString;
use sqlx::PgPool;

/// Missing database configuration.
#[derive(Debug, thiserror::Error)]
#[error("Missing environment variable: STOREFRONT_DATABASE_URL (or DATABASE_URL)")]
pub struct MissingDatabaseUrl;

/// Connect to the storefront database named by the environment.
///
/// # Errors
///
/// Returns an error if no URL is set or the connection fails.
pub async fn connect() -> Result<PgPool, Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("STOREFRONT_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| MissingDatabaseUrl)?;

    tracing::info!("Connecting to storefront database...");
    let pool = apothecary_storefront::db::create_pool(&database_url).await?;
    Ok(pool)
}
