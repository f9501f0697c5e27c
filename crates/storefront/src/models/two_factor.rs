//! Pending two-factor login challenge.

use chrono::{DateTime, Utc};

use apothecary_core::UserId;

/// The single outstanding challenge for a user.
///
/// Only digests are stored: the login token as SHA-256 and the code as an
/// HMAC keyed by the session secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoFactorChallenge {
    /// Owner of the challenge.
    pub user_id: UserId,
    /// SHA-256 hex digest of the login token.
    pub login_token_hash: String,
    /// When the login token stops being accepted.
    pub token_expires_at: DateTime<Utc>,
    /// HMAC hex digest of the current code.
    pub code_hash: String,
    /// When the current code stops being accepted.
    pub code_expires_at: DateTime<Utc>,
    /// Wrong codes entered against the current code.
    pub attempts: u32,
    /// When the current code was last emailed.
    pub last_sent_at: DateTime<Utc>,
}
