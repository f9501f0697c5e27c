//! Persistence for pending two-factor login challenges.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use apothecary_core::UserId;

use super::{RepositoryError, count_column};
use crate::models::TwoFactorChallenge;

#[derive(Debug, sqlx::FromRow)]
struct ChallengeRow {
    user_id: i32,
    login_token_hash: String,
    token_expires_at: DateTime<Utc>,
    code_hash: String,
    code_expires_at: DateTime<Utc>,
    attempts: i32,
    last_sent_at: DateTime<Utc>,
}

impl TryFrom<ChallengeRow> for TwoFactorChallenge {
    type Error = RepositoryError;

    fn try_from(row: ChallengeRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: UserId::new(row.user_id),
            login_token_hash: row.login_token_hash,
            token_expires_at: row.token_expires_at,
            code_hash: row.code_hash,
            code_expires_at: row.code_expires_at,
            attempts: count_column(row.attempts, "attempts")?,
            last_sent_at: row.last_sent_at,
        })
    }
}

/// Repository for two-factor challenges.
pub struct TwoFactorRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> TwoFactorRepository<'a> {
    /// Create a new challenge repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Get the challenge a login token points at.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_by_token_hash(
        &self,
        login_token_hash: &str,
    ) -> Result<Option<TwoFactorChallenge>, RepositoryError> {
        let row = sqlx::query_as::<_, ChallengeRow>(
            r"
            SELECT user_id, login_token_hash, token_expires_at, code_hash,
                   code_expires_at, attempts, last_sent_at
            FROM storefront.two_factor_challenge
            WHERE login_token_hash = $1
            ",
        )
        .bind(login_token_hash)
        .fetch_optional(self.pool)
        .await?;

        row.map(TwoFactorChallenge::try_from).transpose()
    }

    /// Get a user's outstanding challenge, if any.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<TwoFactorChallenge>, RepositoryError> {
        let row = sqlx::query_as::<_, ChallengeRow>(
            r"
            SELECT user_id, login_token_hash, token_expires_at, code_hash,
                   code_expires_at, attempts, last_sent_at
            FROM storefront.two_factor_challenge
            WHERE user_id = $1
            ",
        )
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(TwoFactorChallenge::try_from).transpose()
    }

    /// Insert or replace the user's challenge.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn upsert(&self, challenge: &TwoFactorChallenge) -> Result<(), RepositoryError> {
        let attempts = i32::try_from(challenge.attempts).unwrap_or(i32::MAX);
        sqlx::query(
            r"
            INSERT INTO storefront.two_factor_challenge
                (user_id, login_token_hash, token_expires_at, code_hash,
                 code_expires_at, attempts, last_sent_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id) DO UPDATE SET
                login_token_hash = EXCLUDED.login_token_hash,
                token_expires_at = EXCLUDED.token_expires_at,
                code_hash = EXCLUDED.code_hash,
                code_expires_at = EXCLUDED.code_expires_at,
                attempts = EXCLUDED.attempts,
                last_sent_at = EXCLUDED.last_sent_at
            ",
        )
        .bind(challenge.user_id)
        .bind(&challenge.login_token_hash)
        .bind(challenge.token_expires_at)
        .bind(&challenge.code_hash)
        .bind(challenge.code_expires_at)
        .bind(attempts)
        .bind(challenge.last_sent_at)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Record one more wrong code.
    ///
    /// The increment happens in SQL so concurrent guesses cannot both read
    /// the same counter. Returns the new count, or `None` if the challenge is
    /// gone.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn increment_attempts(
        &self,
        user_id: UserId,
        login_token_hash: &str,
    ) -> Result<Option<u32>, RepositoryError> {
        let attempts = sqlx::query_scalar::<_, i32>(
            r"
            UPDATE storefront.two_factor_challenge
            SET attempts = attempts + 1
            WHERE user_id = $1 AND login_token_hash = $2
            RETURNING attempts
            ",
        )
        .bind(user_id)
        .bind(login_token_hash)
        .fetch_optional(self.pool)
        .await?;

        attempts.map(|a| count_column(a, "attempts")).transpose()
    }

    /// Delete a user's challenge.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn delete(&self, user_id: UserId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM storefront.two_factor_challenge WHERE user_id = $1")
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Consume a challenge exactly once.
    ///
    /// Returns `false` if another request already consumed it.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn consume(
        &self,
        user_id: UserId,
        login_token_hash: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            DELETE FROM storefront.two_factor_challenge
            WHERE user_id = $1 AND login_token_hash = $2
            ",
        )
        .bind(user_id)
        .bind(login_token_hash)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
