//! Authentication extractors and session helpers.
//!
//! Handlers take [`RequireAuth`] or [`RequireAdmin`] to read the logged-in user
//! from the session. Rejections are JSON, matching the rest of the API.

use axum::{
    Json,
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tower_sessions::Session;

use crate::db::UserRepository;
use crate::models::{CurrentUser, session_keys};
use crate::state::AppState;

/// Extractor that requires a logged-in user.
///
/// # Example
///
/// ```rust,ignore
/// async fn protected_handler(
///     RequireAuth(user): RequireAuth,
/// ) -> impl IntoResponse {
///     format!("Hello, {}!", user.email)
/// }
/// ```
pub struct RequireAuth(pub CurrentUser);

/// Extractor that requires a logged-in admin.
pub struct RequireAdmin(pub CurrentUser);

/// Error returned when a request lacks the required identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// No user in the session, or the session was revoked.
    Unauthorized,
    /// Logged in, but not an admin.
    Forbidden,
    /// The user record could not be checked.
    Unavailable,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "Authentication required"),
            Self::Forbidden => (StatusCode::FORBIDDEN, "Admin access required"),
            Self::Unavailable => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

async fn session_user(parts: &Parts) -> Option<(Session, CurrentUser)> {
    // Set by SessionManagerLayer
    let session = parts.extensions.get::<Session>()?;
    let user = session
        .get::<CurrentUser>(session_keys::CURRENT_USER)
        .await
        .ok()
        .flatten()?;
    Some((session.clone(), user))
}

/// The session user with the role as it is now in the database.
///
/// A deleted user or a session issued before the last password change is
/// flushed and rejected.
async fn current_user(parts: &Parts, state: &AppState) -> Result<CurrentUser, AuthRejection> {
    let (session, user) = session_user(parts)
        .await
        .ok_or(AuthRejection::Unauthorized)?;

    let standing = UserRepository::new(state.pool())
        .session_standing(user.id)
        .await
        .map_err(|e| {
            tracing::error!(user_id = %user.id, error = %e, "Failed to check session user");
            AuthRejection::Unavailable
        })?;

    match standing {
        Some((role, version)) if version == user.session_version => {
            Ok(CurrentUser { role, ..user })
        }
        _ => {
            tracing::info!(user_id = %user.id, "Revoked session rejected");
            if let Err(e) = session.flush().await {
                tracing::warn!(error = %e, "Failed to flush revoked session");
            }
            Err(AuthRejection::Unauthorized)
        }
    }
}

impl<S> FromRequestParts<S> for RequireAuth
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        current_user(parts, &state).await.map(Self)
    }
}

impl<S> FromRequestParts<S> for RequireAdmin
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let user = current_user(parts, &state).await?;
        if !user.is_admin() {
            return Err(AuthRejection::Forbidden);
        }
        Ok(Self(user))
    }
}

/// Store the logged-in user, issuing a new session id first.
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn set_current_user(
    session: &Session,
    user: &CurrentUser,
) -> Result<(), tower_sessions::session::Error> {
    session.cycle_id().await?;
    session.insert(session_keys::CURRENT_USER, user).await
}

/// Drop the whole session (logout).
///
/// # Errors
///
/// Returns an error if the session store cannot delete the record.
pub async fn clear_current_user(session: &Session) -> Result<(), tower_sessions::session::Error> {
    session.flush().await
}
