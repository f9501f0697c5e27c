//! Database migration command.
//!
//! Migrations live in `crates/storefront/migrations/` and are embedded at
//! compile time. The server never applies them itself.

use sqlx::migrate::Migrator;

static MIGRATOR: Migrator = sqlx::migrate!("../storefront/migrations");

/// Apply pending storefront migrations.
///
/// # Errors
///
/// Returns an error if the database is unreachable or a migration fails.
pub async fn storefront() -> Result<(), Box<dyn std::error::Error>> {
    let pool = super::connect().await?;

    tracing::info!(
        available = MIGRATOR.iter().count(),
        "Running storefront migrations..."
    );
    MIGRATOR.run(&pool).await?;

    tracing::info!("Storefront migrations complete");
    Ok(())
}
