//! Domain models for the storefront.
//!
//! These are validated domain types, separate from the private database row
//! types in `crate::db`. Types that leave the process as JSON derive
//! `Serialize`.

pub mod cart;
pub mod catalog;
pub mod order;
pub mod session;
pub mod two_factor;
pub mod user;

pub use cart::{CartLine, CartView};
pub use catalog::{Category, Page, Product, ProductFilter, ProductSort};
pub use order::{Order, OrderItem, OrderTotals};
pub use session::{CurrentUser, keys as session_keys};
pub use two_factor::TwoFactorChallenge;
pub use user::User;
