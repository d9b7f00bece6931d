//! Inventory API: admin authentication, subscription billing and the
//! inventory read/write endpoints behind them.
//!
//! - Storage: sled trees of JSON rows, one tree per table
//! - Auth: bcrypt password hashes, HS256 access/refresh JWTs
//! - Billing: Stripe webhook verification and entitlement updates
//! - Networking: Axum REST on Tokio

pub mod auth;
pub mod billing;
pub mod config;
pub mod error;
pub mod models;
// REST API module: Axum router, handlers and shared state
pub mod rest;
pub mod session;
pub mod storage;
