//! Taikun Reconcile Core Library
//!
//! Shared functionality for the reconciliation crates:
//! - Error taxonomy and exit-code mapping
//! - Configuration resolution and hierarchy
//! - Entity and composite identifiers
//! - Value translations between desired-state and platform forms
//! - Static validation of desired-state records

pub mod config;
pub mod convert;
pub mod error;
pub mod id;
pub mod tracing_init;
pub mod validate;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use id::{CompositeId, EntityId};
pub use validate::Validate;
