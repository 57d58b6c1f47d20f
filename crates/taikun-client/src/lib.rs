//! Taikun platform transport.
//!
//! - [`ApiClient`]: typed JSON calls against `/api/v{n}/…`, bearer header
//!   injection and cancellation
//! - [`AuthManager`]: login, token caching, expiry decoding and refresh
//! - [`pager`]: offset pagination with total-count termination

pub mod auth;
mod client;
pub mod pager;
pub mod types;

pub use auth::{AuthManager, TokenPair, token_expired};
pub use client::ApiClient;
pub use pager::{Page, collect_pages};
pub use types::{Created, LockRequest};
