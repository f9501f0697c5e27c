//! Apothecary Core - Shared domain types.
//!
//! This crate provides the types shared by every Apothecary component:
//! - `storefront` - JSON API for the pharmacy shop
//! - `cli` - Migrations, catalog seeding, and user management
//!
//! # Architecture
//!
//! The core crate contains only types and validation - no I/O, no database
//! queries, no HTTP clients. The optional `postgres` feature adds `sqlx`
//! encode/decode impls so the types can be bound directly in queries.
//!
//! # Modules
//!
//! - [`types`] - Typed ids, emails, prices, and status enums

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
