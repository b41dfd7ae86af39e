//! Persistent shell sessions for Columba.
//!
//! One interpreter process lives across many commands so that `cd`,
//! exported variables and other shell state carry over between mails.
//! Completion is detected by echoing a per-process sentinel after each
//! command; output is redirected into one artifact file per command.
//!
//! Key components:
//! - [`profile`]: per-platform interpreter capabilities
//! - [`process`]: spawning, health checks and staged termination
//! - [`completion`]: sentinel generation and detection
//! - [`sink`]: artifact naming, reading and truncation
//! - [`session`] and [`executor`]: start/stop, `execute` and `working_dir`
//! - [`handle`]: a cloneable async wrapper for use from tokio

pub mod completion;
pub mod error;
pub mod executor;
pub mod handle;
pub mod pending;
pub mod process;
pub mod profile;
pub mod session;
pub mod sink;
mod workdir;

pub use error::{Result, SessionError};
pub use executor::{CommandResult, CommandStatus};
pub use handle::SessionHandle;
pub use profile::{ShellFamily, ShellProfile};
pub use session::{SessionOptions, ShellSession};
pub use sink::{truncate_output, OutputSink, MAX_OUTPUT_CHARS};
