//! Taikun reconcile CLI library
//!
//! Argument parsing and command execution for the `taikun` binary: one
//! intent per invocation, observed state printed as JSON on stdout.

pub mod args;
pub mod commands;
