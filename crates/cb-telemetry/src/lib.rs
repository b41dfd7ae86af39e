//! Logging setup for columba binaries.
//!
//! Every crate in the workspace emits structured events through `tracing`;
//! this crate installs the global subscriber that renders them, either as
//! human-readable lines or as JSON (suitable for Vector / Loki / ELK).

pub mod logging;
