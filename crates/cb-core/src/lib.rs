//! Shared configuration for the columba workspace.

pub mod config;
