//! Two-factor login challenge rules.
//!
//! ```text
//! NoChallenge ──login──► ChallengeIssued ──correct code──► Verified
//!                            │   ▲
//!                            │   └─ wrong code (attempts < max), resend
//!                            ├──── token expired ────────► Expired
//!                            └──── attempts == max ──────► AttemptsExhausted
//! ```
//!
//! Everything here is pure: the caller supplies `now` and persists the
//! returned challenge, so the rules are testable without a database.

use chrono::{DateTime, TimeDelta, Utc};
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use apothecary_core::UserId;

use crate::config::TwoFactorConfig;
use crate::models::TwoFactorChallenge;

type HmacSha256 = Hmac<Sha256>;

/// Number of digits in an emailed code.
pub const CODE_LENGTH: usize = 6;

/// Generate a 6-digit verification code.
#[must_use]
pub fn generate_code() -> String {
    let code: u32 = rand::rng().random_range(100_000..1_000_000);
    code.to_string()
}

/// Generate an opaque login token (32 random bytes, base64url).
#[must_use]
pub fn generate_login_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hex digest of a login token, the form stored in the database.
#[must_use]
pub fn hash_login_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Keyed hashing of codes.
///
/// The user id is mixed in so a stolen digest cannot be replayed for another
/// account.
#[derive(Clone)]
pub struct CodeHasher {
    keyed: HmacSha256,
}

impl CodeHasher {
    /// Create a hasher keyed by the session secret.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLength` if the key is rejected by HMAC.
    pub fn new(key: &SecretString) -> Result<Self, InvalidLength> {
        let keyed = <HmacSha256 as Mac>::new_from_slice(key.expose_secret().as_bytes())?;
        Ok(Self { keyed })
    }

    fn mac(&self, user_id: UserId, code: &str) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(user_id.to_string().as_bytes());
        mac.update(b":");
        mac.update(code.as_bytes());
        mac
    }

    /// Hex digest of `code` for `user_id`.
    #[must_use]
    pub fn hash(&self, user_id: UserId, code: &str) -> String {
        hex::encode(self.mac(user_id, code).finalize().into_bytes())
    }

    /// Constant-time comparison of `code` against a stored digest.
    #[must_use]
    pub fn verify(&self, user_id: UserId, code: &str, stored_hash: &str) -> bool {
        let Ok(expected) = hex::decode(stored_hash) else {
            return false;
        };
        self.mac(user_id, code.trim()).verify_slice(&expected).is_ok()
    }
}

impl std::fmt::Debug for CodeHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeHasher").finish_non_exhaustive()
    }
}

/// Why a code was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Unknown or expired login token; the user must log in again.
    LoginExpired,
    /// The code expired; a resend will issue a fresh one.
    CodeExpired,
    /// Too many wrong codes; the challenge is discarded.
    AttemptsExhausted,
}

/// Outcome of checking a submitted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Correct code: delete the challenge and log the user in.
    Accept,
    /// Wrong code: persist `attempts` and report `remaining`.
    Mismatch { attempts: u32, remaining: u32 },
    /// Rejected without counting an attempt. `discard` means the challenge
    /// must be deleted.
    Reject { rejection: Rejection, discard: bool },
}

/// What `login` and `resend` should do about the code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issued {
    /// The challenge to persist.
    pub challenge: TwoFactorChallenge,
    /// Plain code to email, present only when a new code was generated.
    pub code: Option<String>,
    /// Seconds until another code may be sent (0 when one was just sent).
    pub retry_after_seconds: u64,
}

/// Timing and attempt rules for challenges.
#[derive(Debug, Clone, Copy)]
pub struct TwoFactorPolicy {
    code_ttl: TimeDelta,
    token_ttl: TimeDelta,
    resend_cooldown: TimeDelta,
    max_attempts: u32,
}

impl From<TwoFactorConfig> for TwoFactorPolicy {
    fn from(config: TwoFactorConfig) -> Self {
        let delta = |d: std::time::Duration| TimeDelta::from_std(d).unwrap_or_else(|_| TimeDelta::days(365));
        Self {
            code_ttl: delta(config.code_ttl),
            token_ttl: delta(config.token_ttl),
            resend_cooldown: delta(config.resend_cooldown),
            max_attempts: config.max_attempts.max(1),
        }
    }
}

impl TwoFactorPolicy {
    /// Attempts allowed per code.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Lifetime of a login token in whole seconds.
    #[must_use]
    pub fn token_ttl_seconds(&self) -> u64 {
        u64::try_from(self.token_ttl.num_seconds()).unwrap_or_default()
    }

    /// Lifetime of a code in whole minutes, rounded up (for the email body).
    #[must_use]
    pub fn code_ttl_minutes(&self) -> u64 {
        u64::try_from(self.code_ttl.num_seconds())
            .unwrap_or_default()
            .div_ceil(60)
    }

    /// Seconds left before another code may be sent, rounded up.
    #[must_use]
    pub fn cooldown_remaining(&self, challenge: &TwoFactorChallenge, now: DateTime<Utc>) -> u64 {
        let ready_at = challenge.last_sent_at + self.resend_cooldown;
        if now >= ready_at {
            return 0;
        }
        let millis = (ready_at - now).num_milliseconds();
        u64::try_from(millis).map_or(0, |ms| ms.div_ceil(1000))
    }

    /// Whether the current code can no longer be used, so a new one is due
    /// regardless of cooldown.
    fn code_spent(&self, challenge: &TwoFactorChallenge, now: DateTime<Utc>) -> bool {
        now >= challenge.code_expires_at || challenge.attempts >= self.max_attempts
    }

    fn fresh_code(
        &self,
        user_id: UserId,
        login_token_hash: String,
        token_expires_at: DateTime<Utc>,
        hasher: &CodeHasher,
        now: DateTime<Utc>,
    ) -> Issued {
        let code = generate_code();
        Issued {
            challenge: TwoFactorChallenge {
                user_id,
                login_token_hash,
                token_expires_at,
                code_hash: hasher.hash(user_id, &code),
                code_expires_at: now + self.code_ttl,
                attempts: 0,
                last_sent_at: now,
            },
            code: Some(code),
            retry_after_seconds: 0,
        }
    }

    /// Start (or restart) a challenge after a correct password.
    ///
    /// A new login token always replaces the old one. A new code is issued
    /// unless the previous one was sent within the cooldown and is still
    /// usable, in which case it stays valid and the wait is reported.
    #[must_use]
    pub fn begin(
        &self,
        user_id: UserId,
        existing: Option<&TwoFactorChallenge>,
        login_token: &str,
        hasher: &CodeHasher,
        now: DateTime<Utc>,
    ) -> Issued {
        let login_token_hash = hash_login_token(login_token);
        let token_expires_at = now + self.token_ttl;

        match existing {
            Some(previous)
                if !self.code_spent(previous, now)
                    && self.cooldown_remaining(previous, now) > 0 =>
            {
                Issued {
                    challenge: TwoFactorChallenge {
                        login_token_hash,
                        token_expires_at,
                        ..previous.clone()
                    },
                    code: None,
                    retry_after_seconds: self.cooldown_remaining(previous, now),
                }
            }
            _ => self.fresh_code(user_id, login_token_hash, token_expires_at, hasher, now),
        }
    }

    /// Handle a resend request for a live challenge.
    ///
    /// The login token is kept. Within the cooldown nothing changes;
    /// otherwise a new code replaces the old and attempts reset.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::LoginExpired`] when the token has expired.
    pub fn resend(
        &self,
        challenge: &TwoFactorChallenge,
        hasher: &CodeHasher,
        now: DateTime<Utc>,
    ) -> Result<Issued, Rejection> {
        if now >= challenge.token_expires_at {
            return Err(Rejection::LoginExpired);
        }

        let wait = self.cooldown_remaining(challenge, now);
        if wait > 0 && !self.code_spent(challenge, now) {
            return Ok(Issued {
                challenge: challenge.clone(),
                code: None,
                retry_after_seconds: wait,
            });
        }

        Ok(self.fresh_code(
            challenge.user_id,
            challenge.login_token_hash.clone(),
            challenge.token_expires_at,
            hasher,
            now,
        ))
    }

    /// Check a submitted code against a challenge.
    ///
    /// `code_matches` is only consulted once the challenge is otherwise
    /// usable, so expired challenges never spend HMAC work or attempts.
    pub fn verify(
        &self,
        challenge: &TwoFactorChallenge,
        code_matches: impl FnOnce() -> bool,
        now: DateTime<Utc>,
    ) -> Verdict {
        if now >= challenge.token_expires_at {
            return Verdict::Reject {
                rejection: Rejection::LoginExpired,
                discard: true,
            };
        }
        if now >= challenge.code_expires_at {
            return Verdict::Reject {
                rejection: Rejection::CodeExpired,
                discard: false,
            };
        }
        if challenge.attempts >= self.max_attempts {
            return Verdict::Reject {
                rejection: Rejection::AttemptsExhausted,
                discard: true,
            };
        }
        if code_matches() {
            return Verdict::Accept;
        }

        let attempts = challenge.attempts + 1;
        Verdict::Mismatch {
            attempts,
            remaining: self.max_attempts.saturating_sub(attempts),
        }
    }
}

/// Whether a submitted code has the right shape, before any lookup.
#[must_use]
pub fn is_well_formed_code(code: &str) -> bool {
    let code = code.trim();
    code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn policy() -> TwoFactorPolicy {
        TwoFactorPolicy::from(TwoFactorConfig {
            code_ttl: Duration::from_secs(600),
            token_ttl: Duration::from_secs(900),
            resend_cooldown: Duration::from_secs(60),
            max_attempts: 3,
        })
    }

    fn hasher() -> CodeHasher {
        CodeHasher::new(&SecretString::from("k9$Qm2!vR7@pL4#xT8&wZ1*nB5^cF3%h")).expect("valid key")
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_800_000_000, 0).expect("valid timestamp")
    }

    fn issue(now: DateTime<Utc>) -> (TwoFactorChallenge, String) {
        let issued = policy().begin(UserId::new(7), None, "token-a", &hasher(), now);
        let code = issued.code.expect("first login sends a code");
        (issued.challenge, code)
    }

    #[test]
    fn test_generated_code_shape() {
        for _ in 0..100 {
            let code = generate_code();
            assert!(is_well_formed_code(&code), "{code}");
            let n: u32 = code.parse().expect("digits");
            assert!((100_000..1_000_000).contains(&n));
        }
    }

    #[test]
    fn test_login_tokens_are_unique_and_url_safe() {
        let a = generate_login_token();
        let b = generate_login_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(hash_login_token(&a).len(), 64);
        assert_eq!(hash_login_token(&a), hash_login_token(&a));
    }

    #[test]
    fn test_code_hash_is_bound_to_user() {
        let hasher = hasher();
        let digest = hasher.hash(UserId::new(1), "123456");
        assert!(hasher.verify(UserId::new(1), "123456", &digest));
        assert!(hasher.verify(UserId::new(1), " 123456 ", &digest));
        assert!(!hasher.verify(UserId::new(2), "123456", &digest));
        assert!(!hasher.verify(UserId::new(1), "654321", &digest));
        assert!(!hasher.verify(UserId::new(1), "123456", "not-hex"));
    }

    #[test]
    fn test_begin_issues_code_and_token() {
        let now = t0();
        let (challenge, code) = issue(now);
        assert_eq!(challenge.attempts, 0);
        assert_eq!(challenge.last_sent_at, now);
        assert_eq!(challenge.code_expires_at, now + TimeDelta::seconds(600));
        assert_eq!(challenge.token_expires_at, now + TimeDelta::seconds(900));
        assert_eq!(challenge.login_token_hash, hash_login_token("token-a"));
        assert!(hasher().verify(UserId::new(7), &code, &challenge.code_hash));
    }

    #[test]
    fn test_relogin_within_cooldown_keeps_code_but_rotates_token() {
        let (first, _) = issue(t0());
        let later = t0() + TimeDelta::seconds(20);

        let issued = policy().begin(UserId::new(7), Some(&first), "token-b", &hasher(), later);
        assert_eq!(issued.code, None);
        assert_eq!(issued.retry_after_seconds, 40);
        assert_eq!(issued.challenge.code_hash, first.code_hash);
        assert_eq!(issued.challenge.login_token_hash, hash_login_token("token-b"));
        assert_eq!(
            issued.challenge.token_expires_at,
            later + TimeDelta::seconds(900)
        );
    }

    #[test]
    fn test_relogin_after_cooldown_sends_new_code() {
        let (first, _) = issue(t0());
        let later = t0() + TimeDelta::seconds(60);

        let issued = policy().begin(UserId::new(7), Some(&first), "token-b", &hasher(), later);
        assert!(issued.code.is_some());
        assert_eq!(issued.retry_after_seconds, 0);
        assert_eq!(issued.challenge.last_sent_at, later);
    }

    #[test]
    fn test_verify_accepts_correct_code() {
        let now = t0();
        let (challenge, code) = issue(now);
        let verdict = policy().verify(
            &challenge,
            || hasher().verify(challenge.user_id, &code, &challenge.code_hash),
            now + TimeDelta::seconds(30),
        );
        assert_eq!(verdict, Verdict::Accept);
    }

    #[test]
    fn test_verify_counts_wrong_codes_until_exhausted() {
        let (mut challenge, _) = issue(t0());
        let now = t0() + TimeDelta::seconds(5);

        let verdict = policy().verify(&challenge, || false, now);
        assert_eq!(
            verdict,
            Verdict::Mismatch {
                attempts: 1,
                remaining: 2
            }
        );

        challenge.attempts = 2;
        assert_eq!(
            policy().verify(&challenge, || false, now),
            Verdict::Mismatch {
                attempts: 3,
                remaining: 0
            }
        );

        challenge.attempts = 3;
        assert_eq!(
            policy().verify(&challenge, || true, now),
            Verdict::Reject {
                rejection: Rejection::AttemptsExhausted,
                discard: true
            }
        );
    }

    #[test]
    fn test_verify_expiry_order() {
        let (challenge, _) = issue(t0());

        let code_expired = t0() + TimeDelta::seconds(600);
        assert_eq!(
            policy().verify(&challenge, || true, code_expired),
            Verdict::Reject {
                rejection: Rejection::CodeExpired,
                discard: false
            }
        );

        let token_expired = t0() + TimeDelta::seconds(900);
        assert_eq!(
            policy().verify(&challenge, || true, token_expired),
            Verdict::Reject {
                rejection: Rejection::LoginExpired,
                discard: true
            }
        );
    }

    #[test]
    fn test_code_expiry_is_reported_before_exhausted_attempts() {
        let (mut challenge, _) = issue(t0());
        challenge.attempts = 3;

        assert_eq!(
            policy().verify(&challenge, || true, t0() + TimeDelta::seconds(600)),
            Verdict::Reject {
                rejection: Rejection::CodeExpired,
                discard: false
            }
        );
        assert_eq!(
            policy().verify(&challenge, || true, t0() + TimeDelta::seconds(5)),
            Verdict::Reject {
                rejection: Rejection::AttemptsExhausted,
                discard: true
            }
        );
    }

    #[test]
    fn test_verify_does_not_hash_when_expired() {
        let (challenge, _) = issue(t0());
        let verdict = policy().verify(
            &challenge,
            || panic!("code must not be checked"),
            t0() + TimeDelta::seconds(901),
        );
        assert!(matches!(verdict, Verdict::Reject { .. }));
    }

    #[test]
    fn test_resend_within_cooldown_is_a_no_op() {
        let (challenge, _) = issue(t0());
        let issued = policy()
            .resend(&challenge, &hasher(), t0() + TimeDelta::milliseconds(59_001))
            .expect("token still valid");
        assert_eq!(issued.code, None);
        assert_eq!(issued.retry_after_seconds, 1);
        assert_eq!(issued.challenge, challenge);
    }

    #[test]
    fn test_resend_after_cooldown_resets_attempts_and_expiry() {
        let (mut challenge, old_code) = issue(t0());
        challenge.attempts = 2;
        let later = t0() + TimeDelta::seconds(120);

        let issued = policy()
            .resend(&challenge, &hasher(), later)
            .expect("token still valid");
        let new_code = issued.code.expect("new code");
        assert_eq!(issued.challenge.attempts, 0);
        assert_eq!(issued.challenge.code_expires_at, later + TimeDelta::seconds(600));
        assert_eq!(issued.challenge.login_token_hash, challenge.login_token_hash);
        assert_eq!(issued.challenge.token_expires_at, challenge.token_expires_at);
        assert!(hasher().verify(UserId::new(7), &new_code, &issued.challenge.code_hash));
        if new_code != old_code {
            assert!(!hasher().verify(UserId::new(7), &old_code, &issued.challenge.code_hash));
        }
    }

    #[test]
    fn test_resend_rejects_expired_token() {
        let (challenge, _) = issue(t0());
        assert_eq!(
            policy().resend(&challenge, &hasher(), t0() + TimeDelta::seconds(900)),
            Err(Rejection::LoginExpired)
        );
    }

    #[test]
    fn test_resend_ignores_cooldown_once_attempts_are_spent() {
        let (mut challenge, _) = issue(t0());
        challenge.attempts = 3;
        let issued = policy()
            .resend(&challenge, &hasher(), t0() + TimeDelta::seconds(10))
            .expect("token still valid");
        assert!(issued.code.is_some());
    }

    #[test]
    fn test_ttl_helpers() {
        assert_eq!(policy().token_ttl_seconds(), 900);
        assert_eq!(policy().code_ttl_minutes(), 10);
        assert_eq!(policy().max_attempts(), 3);
    }

    #[test]
    fn test_well_formed_code() {
        assert!(is_well_formed_code("012345"));
        assert!(is_well_formed_code(" 123456\n"));
        assert!(!is_well_formed_code("12345"));
        assert!(!is_well_formed_code("12345a"));
    }
}
