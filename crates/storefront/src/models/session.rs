//! Session-related types.
//!
//! Types stored in the session for authentication state.

use serde::{Deserialize, Serialize};

use apothecary_core::{Email, UserId, UserRole};

use super::User;

/// Session-stored user identity.
///
/// Minimal data stored in the session to identify the logged-in user. The
/// auth extractors re-read the role and session version on every request, so
/// a demotion or a password change takes effect immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    /// User's database ID.
    pub id: UserId,
    /// User's email address.
    pub email: Email,
    /// Role, refreshed from the database by the auth extractors.
    pub role: UserRole,
    /// Session version the session was issued under.
    pub session_version: u32,
}

impl CurrentUser {
    /// Whether the user may manage the catalog and all orders.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

impl From<&User> for CurrentUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
            session_version: user.session_version,
        }
    }
}

/// Session keys for authentication data.
pub mod keys {
    /// Key for storing the current logged-in user.
    pub const CURRENT_USER: &str = "current_user";
}
