//! Authentication route handlers.
//!
//! Password login, the emailed two-factor code step, and account security
//! settings. A successful login stores a [`CurrentUser`] in the session.

use axum::{Json, extract::State, http::StatusCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::instrument;

use apothecary_core::{Email, UserId, UserRole};

use crate::error::{AppError, Result, clear_sentry_user, set_sentry_user};
use crate::middleware::{RequireAuth, clear_current_user, set_current_user};
use crate::models::{CurrentUser, User};
use crate::services::{AuthService, LoginOutcome, PendingChallenge};
use crate::state::AppState;

// =============================================================================
// Types
// =============================================================================

/// Account data returned to the client.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: UserId,
    pub email: Email,
    pub full_name: String,
    pub role: UserRole,
    pub two_factor_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            role: user.role,
            two_factor_enabled: user.two_factor_enabled,
            created_at: user.created_at,
        }
    }
}

/// Registration form.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

/// Password login form.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Result of a login step, tagged by `status`.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginResponse {
    Authenticated {
        user: UserView,
    },
    TwoFactorRequired {
        login_token: String,
        code_sent: bool,
        retry_after_seconds: u64,
        expires_in_seconds: u64,
    },
}

impl From<PendingChallenge> for LoginResponse {
    fn from(pending: PendingChallenge) -> Self {
        Self::TwoFactorRequired {
            login_token: pending.login_token,
            code_sent: pending.code_sent,
            retry_after_seconds: pending.retry_after_seconds,
            expires_in_seconds: pending.expires_in_seconds,
        }
    }
}

/// Two-factor code submission.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub login_token: String,
    pub code: String,
}

/// Request for a fresh code.
#[derive(Debug, Deserialize)]
pub struct ResendRequest {
    pub login_token: String,
}

/// Outcome of a resend request.
#[derive(Debug, Serialize)]
pub struct ResendResponse {
    pub login_token: String,
    pub code_sent: bool,
    pub retry_after_seconds: u64,
    pub expires_in_seconds: u64,
}

impl From<PendingChallenge> for ResendResponse {
    fn from(pending: PendingChallenge) -> Self {
        Self {
            login_token: pending.login_token,
            code_sent: pending.code_sent,
            retry_after_seconds: pending.retry_after_seconds,
            expires_in_seconds: pending.expires_in_seconds,
        }
    }
}

/// Toggle for emailed login codes; the password is re-checked.
#[derive(Debug, Deserialize)]
pub struct TwoFactorSettingRequest {
    pub enabled: bool,
    pub password: String,
}

/// Password change form.
#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

// =============================================================================
// Helpers
// =============================================================================

fn auth_service(state: &AppState) -> AuthService<'_> {
    AuthService::new(
        state.pool(),
        state.two_factor(),
        state.code_hasher(),
        state.email_service(),
    )
}

/// Put the user in a fresh session.
async fn establish_session(session: &Session, user: &User) -> Result<()> {
    set_current_user(session, &CurrentUser::from(user))
        .await
        .map_err(|e| AppError::Internal(format!("session error: {e}")))?;
    set_sentry_user(&user.id, Some(user.email.as_str()));
    tracing::info!(user_id = %user.id, "User logged in");
    Ok(())
}

// =============================================================================
// Handlers
// =============================================================================

/// Create an account and log it in.
///
/// POST /api/auth/register
#[instrument(skip(state, session, form), fields(email = %form.email))]
pub async fn register(
    State(state): State<AppState>,
    session: Session,
    Json(form): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserView>)> {
    let user = auth_service(&state)
        .register(&form.email, &form.password, &form.full_name)
        .await?;
    establish_session(&session, &user).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// Check email and password.
///
/// POST /api/auth/login
#[instrument(skip(state, session, form))]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Json(form): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    match auth_service(&state).login(&form.email, &form.password).await? {
        LoginOutcome::Authenticated(user) => {
            establish_session(&session, &user).await?;
            Ok(Json(LoginResponse::Authenticated { user: user.into() }))
        }
        LoginOutcome::TwoFactorRequired(pending) => Ok(Json(pending.into())),
    }
}

/// Complete a two-factor login.
///
/// POST /api/auth/two-factor/verify
#[instrument(skip(state, session, form))]
pub async fn verify_two_factor(
    State(state): State<AppState>,
    session: Session,
    Json(form): Json<VerifyRequest>,
) -> Result<Json<LoginResponse>> {
    let user = auth_service(&state)
        .verify_two_factor(&form.login_token, &form.code)
        .await?;
    establish_session(&session, &user).await?;
    Ok(Json(LoginResponse::Authenticated { user: user.into() }))
}

/// Send a new code if the cooldown allows.
///
/// POST /api/auth/two-factor/resend
#[instrument(skip(state, form))]
pub async fn resend_two_factor(
    State(state): State<AppState>,
    Json(form): Json<ResendRequest>,
) -> Result<Json<ResendResponse>> {
    let pending = auth_service(&state)
        .resend_two_factor(&form.login_token)
        .await?;
    Ok(Json(pending.into()))
}

/// End the session.
///
/// POST /api/auth/logout
#[instrument(skip(session))]
pub async fn logout(session: Session) -> Result<StatusCode> {
    clear_current_user(&session)
        .await
        .map_err(|e| AppError::Internal(format!("session error: {e}")))?;
    clear_sentry_user();
    Ok(StatusCode::NO_CONTENT)
}

/// The logged-in account.
///
/// GET /api/auth/me
pub async fn me(
    State(state): State<AppState>,
    RequireAuth(current): RequireAuth,
) -> Result<Json<UserView>> {
    let user = auth_service(&state).get_user(current.id).await?;
    Ok(Json(user.into()))
}

/// Turn emailed login codes on or off.
///
/// PUT /api/auth/two-factor
#[instrument(skip(state, form), fields(user_id = %current.id, enabled = form.enabled))]
pub async fn set_two_factor(
    State(state): State<AppState>,
    RequireAuth(current): RequireAuth,
    Json(form): Json<TwoFactorSettingRequest>,
) -> Result<Json<UserView>> {
    let user = auth_service(&state)
        .set_two_factor(current.id, form.enabled, &form.password)
        .await?;
    Ok(Json(user.into()))
}

/// Change the account password.
///
/// Signs out every other session; this one moves to a fresh session id.
///
/// PUT /api/auth/password
#[instrument(skip(state, session, form), fields(user_id = %current.id))]
pub async fn change_password(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(current): RequireAuth,
    Json(form): Json<ChangePasswordRequest>,
) -> Result<StatusCode> {
    let user = auth_service(&state)
        .change_password(current.id, &form.current_password, &form.new_password)
        .await?;
    set_current_user(&session, &CurrentUser::from(&user))
        .await
        .map_err(|e| AppError::Internal(format!("session error: {e}")))?;
    Ok(StatusCode::NO_CONTENT)
}
