//! Columba daemon: mail polling around a persistent shell session.
//!
//! - [`mail`]: the mailbox abstraction and a directory-backed spool
//! - [`worker`]: turns a mail body into commands and a formatted reply
//! - [`scheduler`]: idle/active polling loop with graceful shutdown

pub mod mail;
pub mod scheduler;
pub mod worker;
