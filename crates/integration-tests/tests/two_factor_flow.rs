//! Two-factor login challenge, walked through the same steps the auth
//! service takes: begin on password login, resend, verify.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::SecretString;

use apothecary_core::UserId;
use apothecary_integration_tests::TEST_SECRET;
use apothecary_storefront::config::TwoFactorConfig;
use apothecary_storefront::models::TwoFactorChallenge;
use apothecary_storefront::services::auth::two_factor::{
    Rejection, Verdict, generate_login_token, hash_login_token,
};
use apothecary_storefront::services::{CodeHasher, TwoFactorPolicy};

const USER: UserId = UserId::new(11);

fn policy() -> TwoFactorPolicy {
    TwoFactorPolicy::from(TwoFactorConfig {
        code_ttl: Duration::from_secs(600),
        token_ttl: Duration::from_secs(900),
        resend_cooldown: Duration::from_secs(60),
        max_attempts: 5,
    })
}

fn hasher() -> CodeHasher {
    CodeHasher::new(&SecretString::from(TEST_SECRET)).expect("hmac accepts any key length")
}

fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_800_000_000, 0).expect("valid timestamp")
}

/// Verify the way the service does: HMAC check inside the policy.
fn check(challenge: &TwoFactorChallenge, code: &str, now: DateTime<Utc>) -> Verdict {
    let hasher = hasher();
    policy().verify(
        challenge,
        || hasher.verify(challenge.user_id, code, &challenge.code_hash),
        now,
    )
}

fn wrong(code: &str) -> String {
    if code == "000000" { "111111" } else { "000000" }.to_string()
}

#[test]
fn test_login_then_correct_code() {
    let token = generate_login_token();
    let issued = policy().begin(USER, None, &token, &hasher(), start());
    let code = issued.code.clone().expect("first login sends a code");

    assert_eq!(issued.challenge.login_token_hash, hash_login_token(&token));
    assert_eq!(issued.retry_after_seconds, 0);
    assert_eq!(
        check(&issued.challenge, &code, start() + TimeDelta::minutes(3)),
        Verdict::Accept
    );
}

#[test]
fn test_relogin_within_cooldown_keeps_code_but_rotates_token() {
    let first_token = generate_login_token();
    let first = policy().begin(USER, None, &first_token, &hasher(), start());
    let code = first.code.clone().expect("code");

    let second_token = generate_login_token();
    let second = policy().begin(
        USER,
        Some(&first.challenge),
        &second_token,
        &hasher(),
        start() + TimeDelta::seconds(20),
    );

    assert!(second.code.is_none());
    assert_eq!(second.retry_after_seconds, 40);
    assert_ne!(
        second.challenge.login_token_hash,
        first.challenge.login_token_hash
    );
    assert_eq!(
        check(&second.challenge, &code, start() + TimeDelta::seconds(30)),
        Verdict::Accept
    );
}

#[test]
fn test_wrong_codes_until_exhausted() {
    let issued = policy().begin(USER, None, &generate_login_token(), &hasher(), start());
    let bad = wrong(issued.code.as_deref().expect("code"));
    let mut challenge = issued.challenge;
    let now = start() + TimeDelta::seconds(10);

    for expected_remaining in (0..5).rev() {
        match check(&challenge, &bad, now) {
            Verdict::Mismatch {
                attempts,
                remaining,
            } => {
                assert_eq!(remaining, expected_remaining);
                challenge.attempts = attempts;
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    assert_eq!(
        check(&challenge, &bad, now),
        Verdict::Reject {
            rejection: Rejection::AttemptsExhausted,
            discard: true,
        }
    );
}

#[test]
fn test_resend_after_cooldown_resets_attempts_and_old_code_stops_working() {
    let issued = policy().begin(USER, None, &generate_login_token(), &hasher(), start());
    let old_code = issued.code.clone().expect("code");
    let mut challenge = issued.challenge;
    challenge.attempts = 3;

    let early = policy()
        .resend(&challenge, &hasher(), start() + TimeDelta::seconds(59))
        .expect("token still valid");
    assert!(early.code.is_none());
    assert_eq!(early.retry_after_seconds, 1);

    let later = start() + TimeDelta::seconds(61);
    let resent = policy()
        .resend(&challenge, &hasher(), later)
        .expect("token still valid");
    let new_code = resent.code.clone().expect("cooldown elapsed");

    assert_eq!(resent.challenge.attempts, 0);
    assert_eq!(
        resent.challenge.login_token_hash,
        challenge.login_token_hash
    );
    assert_eq!(check(&resent.challenge, &new_code, later), Verdict::Accept);
    if new_code != old_code {
        assert!(matches!(
            check(&resent.challenge, &old_code, later),
            Verdict::Mismatch { .. }
        ));
    }
}

#[test]
fn test_expired_code_then_resend_recovers() {
    let issued = policy().begin(USER, None, &generate_login_token(), &hasher(), start());
    let code = issued.code.clone().expect("code");
    let after_code_ttl = start() + TimeDelta::minutes(11);

    assert_eq!(
        check(&issued.challenge, &code, after_code_ttl),
        Verdict::Reject {
            rejection: Rejection::CodeExpired,
            discard: false,
        }
    );

    let resent = policy()
        .resend(&issued.challenge, &hasher(), after_code_ttl)
        .expect("token outlives the code");
    let fresh = resent.code.clone().expect("new code");
    assert_eq!(
        check(&resent.challenge, &fresh, after_code_ttl),
        Verdict::Accept
    );
}

#[test]
fn test_expired_login_token_ends_the_flow() {
    let issued = policy().begin(USER, None, &generate_login_token(), &hasher(), start());
    let code = issued.code.clone().expect("code");
    let after_token_ttl = start() + TimeDelta::minutes(16);

    assert_eq!(
        policy().resend(&issued.challenge, &hasher(), after_token_ttl),
        Err(Rejection::LoginExpired)
    );
    assert_eq!(
        check(&issued.challenge, &code, after_token_ttl),
        Verdict::Reject {
            rejection: Rejection::LoginExpired,
            discard: true,
        }
    );
}

#[test]
fn test_code_hash_is_bound_to_user() {
    let issued = policy().begin(USER, None, &generate_login_token(), &hasher(), start());
    let code = issued.code.expect("code");
    let hasher = hasher();

    assert!(hasher.verify(USER, &code, &issued.challenge.code_hash));
    assert!(!hasher.verify(UserId::new(12), &code, &issued.challenge.code_hash));
}
