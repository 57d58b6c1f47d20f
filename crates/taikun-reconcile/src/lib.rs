//! Taikun reconciliation engine.
//!
//! Drives platform entities toward a caller's desired state:
//! - [`wait`]: read-after-op retries and status polling with deadlines
//! - [`lock`]: unlock, mutate, relock around changes to locked entities
//! - [`binding`]: set-valued relations converged by add/remove deltas
//! - [`resources`]: one reconciler per entity kind
//! - [`project`]: the multi-step project orchestrator
//! - [`kinds`]: kind names and intent dispatch for callers such as the CLI

pub mod binding;
pub mod kinds;
pub mod lock;
pub mod platform;
pub mod project;
pub mod reconciler;
pub mod resources;
pub mod wait;

pub use kinds::{Kind, dispatch};
pub use platform::Platform;
pub use reconciler::{Intent, Observed, Reconciler, Verb, execute};
pub use wait::{Operation, WaitPolicy};
