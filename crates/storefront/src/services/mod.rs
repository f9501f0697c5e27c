//! Business logic services for the storefront.
//!
//! Services borrow the pool and shared state per request and translate
//! repository results into domain errors. Handlers never talk to
//! repositories directly.
//!
//! # Services
//!
//! - `auth` - Registration, password login, two-factor challenges
//! - `catalog` - Categories and products behind the read cache
//! - `cart` - Cart lines with stock checks
//! - `orders` - Checkout, history, status transitions
//! - `assistant` - Chat-completions proxy
//! - `email` - Transactional email
//! - `cache` - Catalog read cache

pub mod assistant;
pub mod auth;
pub mod cache;
pub mod cart;
pub mod catalog;
pub mod email;
pub mod orders;

pub use assistant::{AssistantClient, AssistantError, AssistantService};
pub use auth::{AuthError, AuthService, CodeHasher, LoginOutcome, PendingChallenge, TwoFactorPolicy};
pub use cache::ProductCache;
pub use cart::{CartError, CartService};
pub use catalog::{CatalogError, CatalogService, CategoryDraft, ProductDraft};
pub use email::{EmailError, EmailService};
pub use orders::{CheckoutDraft, OrderError, OrderService};
