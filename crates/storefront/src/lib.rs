//! Apothecary storefront library.
//!
//! The JSON API behind the pharmacy shop: catalog, cart, orders, two-factor
//! login and the shopping assistant. The binary in `main.rs` wires these
//! modules into a server; tests drive them directly.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
