use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures inside the session subsystem.
///
/// These never cross [`ShellSession::execute`](crate::session::ShellSession::execute);
/// they are folded into an `InternalError` result there.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to spawn shell `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("shell process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("shell session is not running")]
    NotRunning,

    #[error("shell stdin is closed")]
    StdinClosed,

    #[error("shell exited while a command was running")]
    ShellExited,

    #[error("shell cannot parse command: {0}")]
    Syntax(String),

    #[error("artifact {} is outside the output directory", .0.display())]
    ForeignArtifact(PathBuf),

    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
