//! Harness — guard rails and lifecycle plumbing around command execution.
//!
//! - [`security`]: the static denylist applied to every command before it
//!   reaches the shell
//! - [`shutdown`]: cooperative shutdown coordination for the daemon loops

pub mod security;
pub mod shutdown;
