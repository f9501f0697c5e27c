//! Integration tests for Apothecary.
//!
//! Most tests in `tests/` drive the storefront library across module
//! boundaries without a database: the router runs over a lazily-connecting
//! pool, so only paths that stop before the first query are exercised.
//!
//! The `*_db` suites run against a fresh, migrated Postgres database per test
//! (`sqlx::test`) and are ignored by default.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p apothecary-integration-tests
//!
//! # Database suites
//! DATABASE_URL=postgres://localhost/apothecary_test \
//!     cargo test -p apothecary-integration-tests -- --ignored
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use secrecy::SecretString;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

use apothecary_core::{Price, UserId};
use apothecary_storefront::config::{
    AssistantConfig, DeliveryConfig, StorefrontConfig, TwoFactorConfig,
};
use apothecary_storefront::db::{
    CategoryInput, CategoryRepository, ProductInput, ProductRepository, UserRepository,
};
use apothecary_storefront::models::Product;
use apothecary_storefront::routes;
use apothecary_storefront::state::AppState;

/// High-entropy secret accepted by the code hasher.
pub const TEST_SECRET: &str = "k9$Qm2!vR7@pL4#xT8&wZ1*nB5^cF3%h";

/// Configuration with no SMTP and no assistant.
#[must_use]
pub fn config() -> StorefrontConfig {
    StorefrontConfig {
        database_url: SecretString::from("postgres://apothecary@localhost/unused"),
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 3000,
        base_url: "http://localhost:3000".to_string(),
        session_secret: SecretString::from(TEST_SECRET),
        cors_origin: None,
        email: None,
        assistant: None,
        two_factor: TwoFactorConfig::default(),
        delivery: DeliveryConfig::default(),
        product_cache_ttl: Duration::from_secs(300),
        sentry_dsn: None,
        sentry_environment: None,
        sentry_sample_rate: 1.0,
        sentry_traces_sample_rate: 0.0,
        json_logs: false,
    }
}

/// Configuration whose assistant talks to `api_url`.
#[must_use]
pub fn config_with_assistant(api_url: &str) -> StorefrontConfig {
    StorefrontConfig {
        assistant: Some(AssistantConfig {
            api_key: SecretString::from("test-key"),
            api_url: api_url.to_string(),
            model: "test-model".to_string(),
        }),
        ..config()
    }
}

/// A pool that never connects until first used.
///
/// # Panics
///
/// Panics if the hardcoded URL fails to parse.
#[must_use]
pub fn lazy_pool() -> PgPool {
    PgPoolOptions::new()
        .connect_lazy("postgres://apothecary@localhost/unused")
        .expect("lazy pool")
}

/// The API router over the given configuration.
///
/// # Panics
///
/// Panics if the configuration cannot build application state.
#[must_use]
pub fn app(config: StorefrontConfig) -> Router {
    let state = AppState::new(config, lazy_pool()).expect("state");
    routes::routes().with_state(state)
}

/// Send one request and decode the JSON body (`Null` when not JSON).
///
/// # Panics
///
/// Panics if the request cannot be built or the router fails.
pub async fn send(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", "198.51.100.20");
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request");

    let response = app.oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Serve `router` on an ephemeral local port and return its base URL.
///
/// # Panics
///
/// Panics if no local port can be bound.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

// =============================================================================
// Database fixtures
// =============================================================================

/// Insert a customer with an unusable password hash.
///
/// # Panics
///
/// Panics if the insert fails.
pub async fn customer(pool: &PgPool, email: &str) -> UserId {
    let email = apothecary_core::Email::parse(email).expect("email");
    UserRepository::new(pool)
        .create(&email, "not-a-hash", "Test Customer")
        .await
        .expect("create user")
        .id
}

/// Insert an active product priced at 12.50 in a fresh category.
///
/// # Panics
///
/// Panics if an insert fails.
pub async fn product(pool: &PgPool, name: &str, stock: u32) -> Product {
    let slug = name.to_lowercase().replace(' ', "-");
    let category = CategoryRepository::new(pool)
        .create(&CategoryInput {
            name,
            slug: &slug,
            description: None,
        })
        .await
        .expect("create category");

    ProductRepository::new(pool)
        .create(&ProductInput {
            category_id: category.id,
            name: name.to_string(),
            description: None,
            manufacturer: None,
            price: Price::from_cents(1250),
            stock,
            requires_prescription: false,
            image_url: None,
            is_active: true,
        })
        .await
        .expect("create product")
}

/// Current stock of a product, read straight from the table.
///
/// # Panics
///
/// Panics if the product does not exist.
pub async fn stock_of(pool: &PgPool, product: &Product) -> i32 {
    sqlx::query_scalar("SELECT stock FROM storefront.product WHERE id = $1")
        .bind(product.id)
        .fetch_one(pool)
        .await
        .expect("stock")
}
