//! Core types for Apothecary.
//!
//! Type-safe wrappers for the domain concepts shared across crates.

pub mod email;
pub mod id;
pub mod price;
pub mod status;

pub use email::{Email, EmailError};
pub use id::*;
pub use price::{Price, PriceError};
pub use status::*;
