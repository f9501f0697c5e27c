//! Authentication error types.

use thiserror::Error;

use crate::db::RepositoryError;
use crate::services::email::EmailError;

use super::two_factor::Rejection;

/// Errors that can occur during authentication operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] apothecary_core::EmailError),

    /// A field other than email or password failed validation.
    #[error("{0}")]
    InvalidInput(String),

    /// Invalid credentials (wrong password or user not found).
    #[error("invalid credentials")]
    InvalidCredentials,

    /// User not found.
    #[error("user not found")]
    UserNotFound,

    /// User already exists.
    #[error("user already exists")]
    UserAlreadyExists,

    /// Password too weak or invalid.
    #[error("password validation failed: {0}")]
    WeakPassword(String),

    /// The login token is unknown or expired; log in again.
    #[error("login expired, please sign in again")]
    LoginExpired,

    /// The code expired; request a new one.
    #[error("verification code expired, request a new one")]
    CodeExpired,

    /// Wrong code.
    #[error("invalid verification code, {remaining} attempts remaining")]
    InvalidCode {
        /// Attempts left before the challenge is discarded.
        remaining: u32,
    },

    /// Too many wrong codes; the challenge was discarded.
    #[error("too many incorrect codes, please sign in again")]
    AttemptsExhausted,

    /// The code email could not be sent.
    #[error("failed to send verification code: {0}")]
    CodeDelivery(#[from] EmailError),

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),

    /// Password hashing error.
    #[error("password hashing error")]
    PasswordHash,
}

impl From<Rejection> for AuthError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::LoginExpired => Self::LoginExpired,
            Rejection::CodeExpired => Self::CodeExpired,
            Rejection::AttemptsExhausted => Self::AttemptsExhausted,
        }
    }
}
