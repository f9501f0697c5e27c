//! HTTP middleware stack for the storefront API.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, HTTP transaction)
//! 2. `TraceLayer` (request span)
//! 3. Request ID (recorded on the span, echoed in the response)
//! 4. CORS for the frontend origin
//! 5. Session layer (tower-sessions with `PostgreSQL` store)
//! 6. Rate limiting on `/api/auth` and `/api/assistant` (governor)

pub mod auth;
pub mod rate_limit;
pub mod request_id;
pub mod session;

pub use auth::{RequireAdmin, RequireAuth, clear_current_user, set_current_user};
pub use rate_limit::{assistant_rate_limiter, auth_rate_limiter};
pub use request_id::request_id_middleware;
pub use session::create_session_layer;
