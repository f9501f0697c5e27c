//! Authentication service.
//!
//! Password login with optional email-based two-factor verification.

mod error;
pub mod two_factor;

pub use error::AuthError;
pub use two_factor::{CodeHasher, TwoFactorPolicy};

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::Utc;
use sqlx::PgPool;
use tracing::instrument;

use apothecary_core::{Email, UserId};

use crate::db::{RepositoryError, TwoFactorRepository, UserRepository};
use crate::models::{TwoFactorChallenge, User};
use crate::services::email::EmailService;

use two_factor::{Issued, Verdict, hash_login_token, is_well_formed_code};

/// Minimum password length.
const MIN_PASSWORD_LENGTH: usize = 8;

/// Maximum length of a display name.
const MAX_FULL_NAME_LENGTH: usize = 200;

/// Result of a password login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// No second factor needed; the caller should establish the session.
    Authenticated(User),
    /// A code challenge is pending.
    TwoFactorRequired(PendingChallenge),
}

/// What the client needs to finish a two-factor login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChallenge {
    /// Opaque token identifying the challenge.
    pub login_token: String,
    /// Whether a new code was emailed by this request.
    pub code_sent: bool,
    /// Seconds before another code may be requested.
    pub retry_after_seconds: u64,
    /// Seconds before the login token expires.
    pub expires_in_seconds: u64,
}

/// Authentication service.
///
/// Handles registration, password login, two-factor challenges, and
/// account security settings.
pub struct AuthService<'a> {
    users: UserRepository<'a>,
    challenges: TwoFactorRepository<'a>,
    policy: TwoFactorPolicy,
    hasher: &'a CodeHasher,
    email: Option<&'a EmailService>,
}

impl<'a> AuthService<'a> {
    /// Create a new authentication service.
    ///
    /// Without an email service, codes are written to the log instead.
    #[must_use]
    pub const fn new(
        pool: &'a PgPool,
        policy: TwoFactorPolicy,
        hasher: &'a CodeHasher,
        email: Option<&'a EmailService>,
    ) -> Self {
        Self {
            users: UserRepository::new(pool),
            challenges: TwoFactorRepository::new(pool),
            policy,
            hasher,
            email,
        }
    }

    // =========================================================================
    // Password Authentication
    // =========================================================================

    /// Register a new customer.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidEmail` if the email format is invalid.
    /// Returns `AuthError::WeakPassword` if the password doesn't meet requirements.
    /// Returns `AuthError::UserAlreadyExists` if the email is already registered.
    #[instrument(skip(self, password))]
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<User, AuthError> {
        let email = Email::parse(email)?;
        let full_name = validate_full_name(full_name)?;
        validate_password(password)?;

        let password_hash = hash_password(password)?;

        let user = self
            .users
            .create(&email, &password_hash, full_name)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => AuthError::UserAlreadyExists,
                other => AuthError::Repository(other),
            })?;

        tracing::info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Log in with email and password.
    ///
    /// Users with two-factor enabled get a pending challenge instead of a
    /// session.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` if the email/password is wrong.
    /// Returns `AuthError::CodeDelivery` if the code email cannot be sent.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let email = Email::parse(email).map_err(|_| AuthError::InvalidCredentials)?;

        let (user, password_hash) = self
            .users
            .get_with_password_hash(&email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        verify_password(password, &password_hash)?;

        if !user.two_factor_enabled {
            return Ok(LoginOutcome::Authenticated(user));
        }

        let existing = self.challenges.get_for_user(user.id).await?;
        let login_token = two_factor::generate_login_token();
        let issued = self.policy.begin(
            user.id,
            existing.as_ref(),
            &login_token,
            self.hasher,
            Utc::now(),
        );

        self.challenges.upsert(&issued.challenge).await?;
        let code_sent = match self.deliver(&user, &issued).await {
            Ok(sent) => sent,
            Err(e) => {
                self.restore(user.id, existing.as_ref()).await?;
                return Err(e);
            }
        };

        Ok(LoginOutcome::TwoFactorRequired(PendingChallenge {
            login_token,
            code_sent,
            retry_after_seconds: issued.retry_after_seconds,
            expires_in_seconds: self.policy.token_ttl_seconds(),
        }))
    }

    // =========================================================================
    // Two-Factor Challenge
    // =========================================================================

    /// Check a code for a pending login.
    ///
    /// On success the challenge is consumed and the user returned.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::LoginExpired` if the token is unknown or expired.
    /// Returns `AuthError::CodeExpired` if the code expired.
    /// Returns `AuthError::InvalidCode` on a wrong code with attempts left.
    /// Returns `AuthError::AttemptsExhausted` once the attempt limit is reached.
    #[instrument(skip_all)]
    pub async fn verify_two_factor(&self, login_token: &str, code: &str) -> Result<User, AuthError> {
        let token_hash = hash_login_token(login_token);
        let challenge = self
            .challenges
            .get_by_token_hash(&token_hash)
            .await?
            .ok_or(AuthError::LoginExpired)?;
        let user_id = challenge.user_id;

        let verdict = self.policy.verify(
            &challenge,
            || {
                is_well_formed_code(code)
                    && self.hasher.verify(user_id, code, &challenge.code_hash)
            },
            Utc::now(),
        );

        match verdict {
            Verdict::Accept => {
                // Two concurrent correct submissions: only one wins
                if !self.challenges.consume(user_id, &token_hash).await? {
                    return Err(AuthError::LoginExpired);
                }
                tracing::info!(user_id = %user_id, "Two-factor verification succeeded");
                self.get_user(user_id).await
            }
            Verdict::Mismatch { .. } => {
                let attempts = self
                    .challenges
                    .increment_attempts(user_id, &token_hash)
                    .await?
                    .ok_or(AuthError::LoginExpired)?;
                let remaining = self.policy.max_attempts().saturating_sub(attempts);
                tracing::warn!(user_id = %user_id, attempts, "Incorrect two-factor code");

                if remaining == 0 {
                    self.challenges.delete(user_id).await?;
                    return Err(AuthError::AttemptsExhausted);
                }
                Err(AuthError::InvalidCode { remaining })
            }
            Verdict::Reject { rejection, discard } => {
                if discard {
                    self.challenges.delete(user_id).await?;
                }
                Err(rejection.into())
            }
        }
    }

    /// Resend the code for a pending login, honoring the cooldown.
    ///
    /// The login token stays the same.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::LoginExpired` if the token is unknown or expired.
    /// Returns `AuthError::CodeDelivery` if the code email cannot be sent.
    #[instrument(skip_all)]
    pub async fn resend_two_factor(&self, login_token: &str) -> Result<PendingChallenge, AuthError> {
        let token_hash = hash_login_token(login_token);
        let challenge = self
            .challenges
            .get_by_token_hash(&token_hash)
            .await?
            .ok_or(AuthError::LoginExpired)?;

        let issued = match self.policy.resend(&challenge, self.hasher, Utc::now()) {
            Ok(issued) => issued,
            Err(rejection) => {
                self.challenges.delete(challenge.user_id).await?;
                return Err(rejection.into());
            }
        };

        let code_sent = if issued.code.is_some() {
            self.challenges.upsert(&issued.challenge).await?;
            let user = self.get_user(challenge.user_id).await?;
            match self.deliver(&user, &issued).await {
                Ok(sent) => sent,
                Err(e) => {
                    self.restore(user.id, Some(&challenge)).await?;
                    return Err(e);
                }
            }
        } else {
            false
        };

        let remaining = issued.challenge.token_expires_at - Utc::now();
        Ok(PendingChallenge {
            login_token: login_token.to_owned(),
            code_sent,
            retry_after_seconds: issued.retry_after_seconds,
            expires_in_seconds: u64::try_from(remaining.num_seconds()).unwrap_or_default(),
        })
    }

    /// Email a freshly issued code. Returns whether a code went out.
    async fn deliver(&self, user: &User, issued: &Issued) -> Result<bool, AuthError> {
        let Some(code) = issued.code.as_deref() else {
            return Ok(false);
        };

        if let Some(email_service) = self.email {
            email_service
                .send_two_factor_code(user.email.as_str(), code, self.policy.code_ttl_minutes())
                .await?;
            tracing::info!(user_id = %user.id, "Two-factor code sent");
        } else {
            // Development mode - log the code
            tracing::warn!(
                email = %user.email.masked(),
                code = %code,
                "SMTP not configured - two-factor code logged (dev mode)"
            );
        }
        Ok(true)
    }

    /// Put back the challenge that was replaced by an undelivered code, so
    /// the send cooldown only starts once an email actually went out.
    async fn restore(
        &self,
        user_id: UserId,
        previous: Option<&TwoFactorChallenge>,
    ) -> Result<(), AuthError> {
        match previous {
            Some(challenge) => self.challenges.upsert(challenge).await?,
            None => self.challenges.delete(user_id).await?,
        }
        tracing::warn!(user_id = %user_id, "Two-factor code not delivered, challenge restored");
        Ok(())
    }

    // =========================================================================
    // Account Security
    // =========================================================================

    /// Turn two-factor login on or off after re-checking the password.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` if the password is wrong.
    #[instrument(skip(self, password))]
    pub async fn set_two_factor(
        &self,
        user_id: UserId,
        enabled: bool,
        password: &str,
    ) -> Result<User, AuthError> {
        let password_hash = self.password_hash(user_id).await?;
        verify_password(password, &password_hash)?;

        let user = self.users.set_two_factor_enabled(user_id, enabled).await?;
        if !enabled {
            self.challenges.delete(user_id).await?;
        }

        tracing::info!(user_id = %user_id, enabled, "Two-factor setting changed");
        Ok(user)
    }

    /// Change a password after re-checking the current one.
    ///
    /// Every existing session of the user stops being accepted; the returned
    /// user carries the new session version for the caller's own session.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` if the current password is wrong.
    /// Returns `AuthError::WeakPassword` if the new password doesn't meet requirements.
    #[instrument(skip(self, current_password, new_password))]
    pub async fn change_password(
        &self,
        user_id: UserId,
        current_password: &str,
        new_password: &str,
    ) -> Result<User, AuthError> {
        let password_hash = self.password_hash(user_id).await?;
        verify_password(current_password, &password_hash)?;
        validate_password(new_password)?;

        let new_hash = hash_password(new_password)?;
        let user = self
            .users
            .update_password_hash(user_id, &new_hash)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => AuthError::UserNotFound,
                other => AuthError::Repository(other),
            })?;

        tracing::info!(user_id = %user_id, "Password changed, other sessions revoked");
        Ok(user)
    }

    /// Get a user by ID.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::UserNotFound` if the user doesn't exist.
    pub async fn get_user(&self, user_id: UserId) -> Result<User, AuthError> {
        self.users
            .get_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    async fn password_hash(&self, user_id: UserId) -> Result<String, AuthError> {
        self.users
            .get_password_hash(user_id)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => AuthError::UserNotFound,
                other => AuthError::Repository(other),
            })
    }
}

/// Validate password meets requirements.
fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    Ok(())
}

/// Validate and trim a display name.
fn validate_full_name(full_name: &str) -> Result<&str, AuthError> {
    let trimmed = full_name.trim();
    if trimmed.is_empty() {
        return Err(AuthError::InvalidInput("full name is required".to_owned()));
    }
    if trimmed.chars().count() > MAX_FULL_NAME_LENGTH {
        return Err(AuthError::InvalidInput(format!(
            "full name must be at most {MAX_FULL_NAME_LENGTH} characters"
        )));
    }
    Ok(trimmed)
}

/// Hash a password using Argon2id.
fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::PasswordHash)
}

/// Verify a password against a hash.
fn verify_password(password: &str, hash: &str) -> Result<(), AuthError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::InvalidCredentials)?;
    let argon2 = Argon2::default();

    argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AuthError::InvalidCredentials)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("correct horse").expect("hashes");
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash).is_ok());
        assert!(matches!(
            verify_password("wrong horse", &hash),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_verify_password_rejects_garbage_hash() {
        assert!(matches!(
            verify_password("anything", "not-a-phc-string"),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_validate_password_counts_characters() {
        assert!(matches!(
            validate_password("short"),
            Err(AuthError::WeakPassword(_))
        ));
        assert!(validate_password("12345678").is_ok());
        assert!(validate_password("pässwörd").is_ok());
    }

    #[test]
    fn test_validate_full_name() {
        assert_eq!(validate_full_name("  Ada Lovelace ").ok(), Some("Ada Lovelace"));
        assert!(matches!(
            validate_full_name("   "),
            Err(AuthError::InvalidInput(_))
        ));
        assert!(validate_full_name(&"x".repeat(201)).is_err());
    }
}
