//! HTTP route handlers for the storefront JSON API.
//!
//! # Route Structure
//!
//! ```text
//! # Auth (rate limited)
//! POST   /api/auth/register              - Create account, logged in
//! POST   /api/auth/login                 - Password step
//! POST   /api/auth/two-factor/verify     - Code step
//! POST   /api/auth/two-factor/resend     - New code after cooldown
//! POST   /api/auth/logout                - End session
//! GET    /api/auth/me                    - Current account
//! PUT    /api/auth/two-factor            - Toggle emailed codes
//! PUT    /api/auth/password              - Change password
//!
//! # Catalog
//! GET    /api/categories                 - All categories with product counts
//! GET    /api/categories/{id}            - One category
//! POST   /api/categories                 - Create (admin)
//! PUT    /api/categories/{id}            - Update (admin)
//! DELETE /api/categories/{id}            - Delete (admin)
//! GET    /api/products                   - Filtered, paginated listing
//! GET    /api/products/{id}              - Product detail
//! POST   /api/products                   - Create (admin)
//! PUT    /api/products/{id}              - Update (admin)
//! DELETE /api/products/{id}              - Delete (admin)
//!
//! # Cart (auth)
//! GET    /api/cart                       - Cart with totals
//! DELETE /api/cart                       - Empty cart
//! POST   /api/cart/items                 - Add product
//! PATCH  /api/cart/items/{item_id}       - Set quantity (0 removes)
//! DELETE /api/cart/items/{item_id}       - Remove line
//!
//! # Orders (auth)
//! POST   /api/orders                     - Checkout
//! GET    /api/orders                     - Own orders
//! GET    /api/orders/{id}                - One order
//! POST   /api/orders/{id}/cancel         - Cancel pending/confirmed order
//! GET    /api/admin/orders               - All orders (admin)
//! PATCH  /api/admin/orders/{id}/status   - Change status (admin)
//!
//! # Assistant (rate limited)
//! POST   /api/assistant/chat             - Ask the shopping assistant
//! ```

pub mod admin;
pub mod assistant;
pub mod auth;
pub mod cart;
pub mod categories;
pub mod orders;
pub mod products;

use axum::{
    Router,
    routing::{get, patch, post, put},
};

use crate::middleware::{assistant_rate_limiter, auth_rate_limiter};
use crate::state::AppState;

/// Create the auth routes router.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/two-factor/verify", post(auth::verify_two_factor))
        .route("/two-factor/resend", post(auth::resend_two_factor))
        .route("/two-factor", put(auth::set_two_factor))
        .route("/password", put(auth::change_password))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
}

/// Create the category routes router.
pub fn category_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(categories::index).post(categories::create))
        .route(
            "/{id}",
            get(categories::show)
                .put(categories::update)
                .delete(categories::delete),
        )
}

/// Create the product routes router.
pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(products::index).post(products::create))
        .route(
            "/{id}",
            get(products::show)
                .put(products::update)
                .delete(products::delete),
        )
}

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show).delete(cart::clear))
        .route("/items", post(cart::add_item))
        .route(
            "/items/{item_id}",
            patch(cart::update_item).delete(cart::remove_item),
        )
}

/// Create the order routes router.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(orders::index).post(orders::place))
        .route("/{id}", get(orders::show))
        .route("/{id}/cancel", post(orders::cancel))
}

/// Create the admin routes router.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(admin::orders))
        .route("/orders/{id}/status", patch(admin::set_order_status))
}

/// Create the assistant routes router.
pub fn assistant_routes() -> Router<AppState> {
    Router::new().route("/chat", post(assistant::chat))
}

/// Create all API routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/api/auth", auth_routes().layer(auth_rate_limiter()))
        .nest("/api/categories", category_routes())
        .nest("/api/products", product_routes())
        .nest("/api/cart", cart_routes())
        .nest("/api/orders", order_routes())
        .nest("/api/admin", admin_routes())
        .nest(
            "/api/assistant",
            assistant_routes().layer(assistant_rate_limiter()),
        )
}
