//! Accounts, two-factor challenges and sessions against a migrated database.

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{Request, StatusCode, request::Parts},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use sqlx::PgPool;
use tower_sessions::{MemoryStore, Session};

use apothecary_core::UserRole;
use apothecary_integration_tests::{TEST_SECRET, config};
use apothecary_storefront::config::{EmailConfig, TwoFactorConfig};
use apothecary_storefront::db::{TwoFactorRepository, UserRepository};
use apothecary_storefront::middleware::{RequireAdmin, RequireAuth, set_current_user};
use apothecary_storefront::models::{CurrentUser, TwoFactorChallenge, User, session_keys};
use apothecary_storefront::services::auth::two_factor::{generate_login_token, hash_login_token};
use apothecary_storefront::services::{
    AuthError, AuthService, CodeHasher, EmailService, LoginOutcome, TwoFactorPolicy,
};
use apothecary_storefront::state::AppState;

const PASSWORD: &str = "correct horse battery";

fn policy() -> TwoFactorPolicy {
    TwoFactorPolicy::from(TwoFactorConfig::default())
}

fn hasher() -> CodeHasher {
    CodeHasher::new(&SecretString::from(TEST_SECRET)).expect("hmac accepts any key length")
}

/// SMTP relay on a port nothing listens on.
fn unreachable_smtp() -> EmailService {
    EmailService::new(&EmailConfig {
        smtp_host: "127.0.0.1".to_string(),
        smtp_port: 1,
        smtp_username: "apothecary".to_string(),
        smtp_password: SecretString::from("unused"),
        from_address: "Apothecary <no-reply@example.com>".to_string(),
    })
    .expect("relay config")
}

async fn register(pool: &PgPool, email: &str) -> User {
    let hasher = hasher();
    AuthService::new(pool, policy(), &hasher, None)
        .register(email, PASSWORD, "Test Customer")
        .await
        .expect("register")
}

/// Whole-second timestamp, so it survives a round trip through `TIMESTAMPTZ`.
fn seconds_ago(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(Utc::now().timestamp() - seconds, 0).expect("valid timestamp")
}

fn session() -> Session {
    Session::new(None, Arc::new(MemoryStore::default()), None)
}

fn parts_with(session: &Session) -> Parts {
    let (mut parts, ()) = Request::builder()
        .uri("/api/auth/me")
        .body(())
        .expect("request")
        .into_parts();
    parts.extensions.insert(session.clone());
    parts
}

async fn require_auth(state: &AppState, session: &Session) -> Result<CurrentUser, StatusCode> {
    RequireAuth::from_request_parts(&mut parts_with(session), state)
        .await
        .map(|RequireAuth(user)| user)
        .map_err(|rejection| rejection.into_response().status())
}

async fn require_admin(state: &AppState, session: &Session) -> Result<CurrentUser, StatusCode> {
    RequireAdmin::from_request_parts(&mut parts_with(session), state)
        .await
        .map(|RequireAdmin(user)| user)
        .map_err(|rejection| rejection.into_response().status())
}

// =============================================================================
// Two-factor challenges
// =============================================================================

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_undelivered_code_does_not_start_the_cooldown(pool: PgPool) {
    let user = register(&pool, "ana@example.com").await;
    UserRepository::new(&pool)
        .set_two_factor_enabled(user.id, true)
        .await
        .expect("enable two-factor");

    let hasher = hasher();
    let smtp = unreachable_smtp();
    let failing = AuthService::new(&pool, policy(), &hasher, Some(&smtp));
    let result = failing.login("ana@example.com", PASSWORD).await;
    assert!(matches!(result, Err(AuthError::CodeDelivery(_))));

    let challenges = TwoFactorRepository::new(&pool);
    assert!(
        challenges
            .get_for_user(user.id)
            .await
            .expect("query")
            .is_none()
    );

    // Once mail works again, the very next login sends a code
    let working = AuthService::new(&pool, policy(), &hasher, None);
    match working.login("ana@example.com", PASSWORD).await {
        Ok(LoginOutcome::TwoFactorRequired(pending)) => {
            assert!(pending.code_sent);
            assert_eq!(pending.retry_after_seconds, 0);
        }
        other => panic!("expected a pending challenge, got {other:?}"),
    }
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_undelivered_resend_keeps_the_previous_code(pool: PgPool) {
    let user = register(&pool, "ana@example.com").await;
    let token = generate_login_token();
    let hasher = hasher();
    let previous = TwoFactorChallenge {
        user_id: user.id,
        login_token_hash: hash_login_token(&token),
        token_expires_at: seconds_ago(-600),
        code_hash: hasher.hash(user.id, "482913"),
        code_expires_at: seconds_ago(-300),
        attempts: 1,
        last_sent_at: seconds_ago(120),
    };
    let challenges = TwoFactorRepository::new(&pool);
    challenges.upsert(&previous).await.expect("seed challenge");

    let smtp = unreachable_smtp();
    let result = AuthService::new(&pool, policy(), &hasher, Some(&smtp))
        .resend_two_factor(&token)
        .await;
    assert!(matches!(result, Err(AuthError::CodeDelivery(_))));

    let stored = challenges
        .get_for_user(user.id)
        .await
        .expect("query")
        .expect("challenge kept");
    assert_eq!(stored, previous);
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_exhausted_attempts_discard_the_challenge(pool: PgPool) {
    let user = register(&pool, "ana@example.com").await;
    let token = generate_login_token();
    let hasher = hasher();
    let issued = policy().begin(user.id, None, &token, &hasher, Utc::now());
    let code = issued.code.clone().expect("fresh code");
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let challenges = TwoFactorRepository::new(&pool);
    challenges.upsert(&issued.challenge).await.expect("seed challenge");

    let auth = AuthService::new(&pool, policy(), &hasher, None);
    for remaining in (1..5).rev() {
        let result = auth.verify_two_factor(&token, wrong).await;
        assert!(
            matches!(result, Err(AuthError::InvalidCode { remaining: r }) if r == remaining),
            "{result:?}"
        );
    }
    let result = auth.verify_two_factor(&token, wrong).await;
    assert!(matches!(result, Err(AuthError::AttemptsExhausted)));
    assert!(
        challenges
            .get_for_user(user.id)
            .await
            .expect("query")
            .is_none()
    );

    // The right code is useless once the challenge is gone
    let result = auth.verify_two_factor(&token, &code).await;
    assert!(matches!(result, Err(AuthError::LoginExpired)));
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_challenge_is_consumed_once(pool: PgPool) {
    let user = register(&pool, "ana@example.com").await;
    let token = generate_login_token();
    let issued = policy().begin(user.id, None, &token, &hasher(), Utc::now());

    let challenges = TwoFactorRepository::new(&pool);
    challenges.upsert(&issued.challenge).await.expect("seed challenge");
    let token_hash = hash_login_token(&token);

    let (first, second) = tokio::join!(
        challenges.consume(user.id, &token_hash),
        challenges.consume(user.id, &token_hash)
    );
    let consumed = [first.expect("query"), second.expect("query")];
    assert_eq!(consumed.iter().filter(|won| **won).count(), 1);
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_correct_code_logs_in_and_spends_the_challenge(pool: PgPool) {
    let user = register(&pool, "ana@example.com").await;
    let token = generate_login_token();
    let hasher = hasher();
    let issued = policy().begin(user.id, None, &token, &hasher, Utc::now());
    let code = issued.code.clone().expect("fresh code");
    TwoFactorRepository::new(&pool)
        .upsert(&issued.challenge)
        .await
        .expect("seed challenge");

    let auth = AuthService::new(&pool, policy(), &hasher, None);
    let verified = auth.verify_two_factor(&token, &code).await.expect("verified");
    assert_eq!(verified.id, user.id);

    let replay = auth.verify_two_factor(&token, &code).await;
    assert!(matches!(replay, Err(AuthError::LoginExpired)));
}

// =============================================================================
// Sessions
// =============================================================================

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_demoted_admin_loses_access_immediately(pool: PgPool) {
    let user = register(&pool, "ana@example.com").await;
    let users = UserRepository::new(&pool);
    let admin = users
        .set_role(&user.email, UserRole::Admin)
        .await
        .expect("promote");

    let state = AppState::new(config(), pool.clone()).expect("state");
    let session = session();
    set_current_user(&session, &CurrentUser::from(&admin))
        .await
        .expect("log in");
    assert!(require_admin(&state, &session).await.is_ok());

    users
        .set_role(&user.email, UserRole::Customer)
        .await
        .expect("demote");

    assert_eq!(
        require_admin(&state, &session).await.err(),
        Some(StatusCode::FORBIDDEN)
    );
    let current = require_auth(&state, &session).await.expect("still logged in");
    assert_eq!(current.role, UserRole::Customer);
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_password_change_signs_out_other_sessions(pool: PgPool) {
    let user = register(&pool, "ana@example.com").await;
    let state = AppState::new(config(), pool.clone()).expect("state");

    let laptop = session();
    let phone = session();
    for session in [&laptop, &phone] {
        set_current_user(session, &CurrentUser::from(&user))
            .await
            .expect("log in");
    }

    let hasher = hasher();
    let updated = AuthService::new(&pool, policy(), &hasher, None)
        .change_password(user.id, PASSWORD, "a brand new passphrase")
        .await
        .expect("password changed");
    assert_eq!(updated.session_version, user.session_version + 1);

    // The session that made the change is re-issued under the new version
    set_current_user(&laptop, &CurrentUser::from(&updated))
        .await
        .expect("refresh session");
    assert!(require_auth(&state, &laptop).await.is_ok());

    assert_eq!(
        require_auth(&state, &phone).await.err(),
        Some(StatusCode::UNAUTHORIZED)
    );
    let leftover = phone
        .get::<CurrentUser>(session_keys::CURRENT_USER)
        .await
        .expect("read session");
    assert!(leftover.is_none());
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_deleted_user_session_is_rejected(pool: PgPool) {
    let user = register(&pool, "ana@example.com").await;
    let state = AppState::new(config(), pool.clone()).expect("state");
    let session = session();
    set_current_user(&session, &CurrentUser::from(&user))
        .await
        .expect("log in");

    sqlx::query("DELETE FROM storefront.user WHERE id = $1")
        .bind(user.id)
        .execute(&pool)
        .await
        .expect("delete user");

    assert_eq!(
        require_auth(&state, &session).await.err(),
        Some(StatusCode::UNAUTHORIZED)
    );
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_expired_code_with_attempts_left_can_be_resent(pool: PgPool) {
    let user = register(&pool, "ana@example.com").await;
    let token = generate_login_token();
    let hasher = hasher();
    let challenge = TwoFactorChallenge {
        user_id: user.id,
        login_token_hash: hash_login_token(&token),
        token_expires_at: seconds_ago(-600),
        code_hash: hasher.hash(user.id, "482913"),
        code_expires_at: seconds_ago(10),
        attempts: 5,
        last_sent_at: seconds_ago(700),
    };
    TwoFactorRepository::new(&pool)
        .upsert(&challenge)
        .await
        .expect("seed challenge");

    let auth = AuthService::new(&pool, policy(), &hasher, None);
    let result = auth.verify_two_factor(&token, "482913").await;
    assert!(matches!(result, Err(AuthError::CodeExpired)));

    let pending = auth.resend_two_factor(&token).await.expect("resend");
    assert!(pending.code_sent);
}
