use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::completion::{wait_for_sentinel, Completion};
use crate::error::{Result, SessionError};
use crate::process::check_syntax;
use crate::session::ShellSession;
use crate::sink::{truncate_output, MAX_OUTPUT_CHARS};

const DRAIN_GRACE: Duration = Duration::from_millis(100);
const DRAIN_MAX: Duration = Duration::from_millis(500);
/// Pause between the sentinel and reading the artifact.
const SETTLE_DELAY: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// CommandStatus / CommandResult
// ---------------------------------------------------------------------------

/// Outcome class of one [`ShellSession::execute`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Success,
    /// Matched the denylist and never reached the shell.
    Blocked,
    /// No completion marker before the deadline. The command may still run.
    Timeout,
    InternalError,
}

impl CommandStatus {
    /// Numeric code reported to mail recipients.
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Blocked => -1,
            Self::Timeout => -2,
            Self::InternalError => -3,
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Success => "success",
            Self::Blocked => "blocked",
            Self::Timeout => "timeout",
            Self::InternalError => "internal_error",
        };
        f.write_str(label)
    }
}

/// What a single command produced. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    output: String,
    error: String,
    status: CommandStatus,
    artifact: Option<PathBuf>,
    exit_code: Option<i32>,
}

impl CommandResult {
    pub(crate) fn success(output: String, artifact: Option<PathBuf>, exit_code: Option<i32>) -> Self {
        Self {
            output,
            error: String::new(),
            status: CommandStatus::Success,
            artifact,
            exit_code,
        }
    }

    pub(crate) fn blocked() -> Self {
        Self {
            output: String::new(),
            error: "Command blocked for security reasons".to_string(),
            status: CommandStatus::Blocked,
            artifact: None,
            exit_code: None,
        }
    }

    pub(crate) fn timeout(output: String, artifact: Option<PathBuf>, after: Duration) -> Self {
        Self {
            output,
            error: format!("Command timed out after {} seconds", after.as_secs_f64()),
            status: CommandStatus::Timeout,
            artifact,
            exit_code: None,
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            error: message.into(),
            status: CommandStatus::InternalError,
            artifact: None,
            exit_code: None,
        }
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn status(&self) -> CommandStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }

    /// Artifact the output was written to, kept for timeouts as well.
    pub fn artifact(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    /// Exit status of the command itself, when the shell reported one.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

impl ShellSession {
    /// Run `command` in the persistent shell and wait up to `timeout` (or
    /// the session default) for it to finish.
    ///
    /// Never fails: every problem is folded into the returned status. The
    /// denylist is consulted before the shell is started, so a blocked
    /// command never spawns a process. A command the shell cannot parse is
    /// rejected as an `InternalError` without reaching the live shell.
    pub fn execute(&mut self, command: &str, timeout: Option<Duration>) -> CommandResult {
        if self.denylist.check(command).is_err() {
            return CommandResult::blocked();
        }
        if command.trim().is_empty() {
            return CommandResult::success(String::new(), None, None);
        }

        let timeout = timeout.unwrap_or(self.options.default_timeout);
        match self.run_command(command, timeout) {
            Ok(result) => result,
            Err(e) => {
                error!(command, "command failed: {e}");
                CommandResult::internal(e.to_string())
            }
        }
    }

    fn run_command(&mut self, command: &str, timeout: Duration) -> Result<CommandResult> {
        self.ensure_running()?;

        let number = self.next_command_number();
        let artifact = self.sink.as_ref().map(|s| s.artifact_path(number));
        let seq = self.next_seq();

        let stale = self.pending()?.drain(DRAIN_GRACE, DRAIN_MAX);
        if stale > 0 {
            debug!(stale, "drained leftover output");
        }

        let line = match &artifact {
            Some(path) => self.profile.redirect(command, path),
            None => self.profile.detach_stdin(command),
        };
        check_syntax(&self.profile, &line)?;
        info!(number, seq, command, "executing");
        self.dispatch(&line)?;
        self.dispatch_sentinel(seq)?;

        let started = Instant::now();
        let completion = wait_for_sentinel(
            self.pending()?,
            &self.profile,
            &self.sentinel,
            seq,
            started + timeout,
        );
        match completion {
            Completion::Finished { output, exit_code } => {
                let text = match (&artifact, &self.sink) {
                    (Some(path), Some(sink)) => {
                        std::thread::sleep(SETTLE_DELAY);
                        sink.read(path)?
                    }
                    _ => output.text(),
                };
                debug!(
                    seq,
                    exit_code,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "command finished"
                );
                Ok(CommandResult::success(
                    truncate_output(&text, MAX_OUTPUT_CHARS),
                    artifact,
                    exit_code,
                ))
            }
            Completion::TimedOut { output } => {
                warn!(seq, timeout_secs = timeout.as_secs_f64(), "command timed out");
                Ok(CommandResult::timeout(
                    truncate_output(&output.text(), MAX_OUTPUT_CHARS),
                    artifact,
                    timeout,
                ))
            }
            Completion::Disconnected { .. } => {
                self.process = None;
                Err(SessionError::ShellExited)
            }
        }
    }

    /// Read an artifact produced earlier by this session, for example
    /// after a timeout once the command has had time to finish.
    pub fn read_artifact(&self, path: &Path) -> Result<String> {
        let sink = self
            .sink
            .as_ref()
            .ok_or_else(|| SessionError::ForeignArtifact(path.to_path_buf()))?;
        let text = sink.read(path)?;
        Ok(truncate_output(&text, MAX_OUTPUT_CHARS))
    }
}
