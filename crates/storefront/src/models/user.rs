//! User domain types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use apothecary_core::{Email, UserId, UserRole};

/// A storefront account.
///
/// The password hash never leaves the repository layer, so this type is safe
/// to serialize straight into API responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    /// Unique user ID.
    pub id: UserId,
    /// Normalized email address, unique per account.
    pub email: Email,
    /// Display name.
    pub full_name: String,
    /// Customer or admin.
    pub role: UserRole,
    /// Whether login requires an emailed code.
    pub two_factor_enabled: bool,
    /// Bumped to sign the user out of every session.
    #[serde(skip)]
    pub session_version: u32,
    /// When the user was created.
    pub created_at: DateTime<Utc>,
    /// When the user was last updated.
    pub updated_at: DateTime<Utc>,
}
