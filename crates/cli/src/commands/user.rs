//! User role management.

use apothecary_core::{Email, UserRole};
use apothecary_storefront::db::{RepositoryError, UserRepository};

/// Set a user's role by email.
///
/// Existing sessions pick up the new role on their next request.
///
/// # Errors
///
/// Returns an error if the email is invalid, no such user exists, or the
/// database is unreachable.
pub async fn set_role(email: &str, role: UserRole) -> Result<(), Box<dyn std::error::Error>> {
    let email = Email::parse(email)?;
    let pool = super::connect().await?;

    match UserRepository::new(&pool).set_role(&email, role).await {
        Ok(user) => {
            tracing::info!(user_id = %user.id, email = %user.email, %role, "Role updated");
            Ok(())
        }
        Err(RepositoryError::NotFound) => Err(format!("No user with email {email}").into()),
        Err(e) => Err(e.into()),
    }
}
