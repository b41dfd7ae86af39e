use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use cb_core::config::SessionConfig;
use cb_harness::security::CommandDenylist;
use tracing::{debug, info, warn};

use crate::completion::{wait_for_sentinel, Completion, Sentinel};
use crate::error::{Result, SessionError};
use crate::pending::PendingOutput;
use crate::process::ShellProcess;
use crate::profile::ShellProfile;
use crate::sink::OutputSink;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// SessionOptions
// ---------------------------------------------------------------------------

/// Construction-time settings for a [`ShellSession`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub initial_dir: PathBuf,
    /// Where artifacts go. `None` captures output from the shell's stream.
    pub output_dir: Option<PathBuf>,
    pub default_timeout: Duration,
}

impl SessionOptions {
    pub fn new(initial_dir: impl Into<PathBuf>) -> Self {
        Self {
            initial_dir: initial_dir.into(),
            output_dir: None,
            default_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Build options from the `[session]` config table. A missing
    /// `initial_dir` means the daemon's own working directory.
    pub fn from_config(config: &SessionConfig) -> std::io::Result<Self> {
        let initial_dir = match &config.initial_dir {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir()?,
        };
        Ok(Self {
            initial_dir,
            output_dir: config.output_dir.as_ref().map(PathBuf::from),
            default_timeout: Duration::from_secs(config.default_timeout_secs),
        })
    }
}

// ---------------------------------------------------------------------------
// ShellSession
// ---------------------------------------------------------------------------

/// A long-lived interpreter process driven one command at a time.
///
/// Shell state such as the working directory and exported variables
/// persists between commands. The session is not internally synchronized;
/// wrap it in a [`SessionHandle`](crate::handle::SessionHandle) to share it.
#[derive(Debug)]
pub struct ShellSession {
    pub(crate) options: SessionOptions,
    pub(crate) profile: ShellProfile,
    pub(crate) denylist: CommandDenylist,
    pub(crate) sink: Option<OutputSink>,
    pub(crate) process: Option<ShellProcess>,
    pub(crate) sentinel: Sentinel,
    /// Artifact counter, monotonic across restarts.
    pub(crate) commands: u64,
    /// Tag carried by the next sentinel echo.
    seq: u64,
}

impl ShellSession {
    pub fn new(options: SessionOptions) -> Self {
        let sink = options.output_dir.clone().map(OutputSink::new);
        Self {
            options,
            profile: ShellProfile::native(),
            denylist: CommandDenylist::new(),
            sink,
            process: None,
            sentinel: Sentinel::generate(),
            commands: 0,
            seq: 0,
        }
    }

    /// Build a session from the `[session]` config table, adding its
    /// `blocked_patterns` to the built-in denylist.
    pub fn from_config(config: &SessionConfig) -> std::io::Result<Self> {
        let mut denylist = CommandDenylist::new();
        for pattern in &config.blocked_patterns {
            denylist.add_pattern(pattern.as_str());
        }
        Ok(Self::new(SessionOptions::from_config(config)?).with_denylist(denylist))
    }

    pub fn with_profile(mut self, profile: ShellProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_denylist(mut self, denylist: CommandDenylist) -> Self {
        self.denylist = denylist;
        self
    }

    pub fn initial_dir(&self) -> &Path {
        &self.options.initial_dir
    }

    pub fn default_timeout(&self) -> Duration {
        self.options.default_timeout
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.sink.as_ref().map(OutputSink::dir)
    }

    pub fn profile(&self) -> &ShellProfile {
        &self.profile
    }

    /// PID of the live interpreter, if one is running.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(ShellProcess::pid)
    }

    /// Whether an interpreter exists and has not exited.
    pub fn is_running(&mut self) -> bool {
        self.process.as_mut().is_some_and(ShellProcess::is_alive)
    }

    /// Spawn the interpreter if none is alive. No-op while running.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        if let Some(dead) = self.process.take() {
            debug!(pid = dead.pid(), "discarding exited shell");
        }
        if let Some(sink) = &self.sink {
            sink.ensure_dir()?;
        }

        let process = ShellProcess::spawn(&self.profile, &self.options.initial_dir)?;
        self.process = Some(process);
        self.sentinel = Sentinel::generate();
        if let Some(merge) = self.profile.merge_stderr_command {
            self.dispatch(merge)?;
        }

        let cd = self.profile.cd_command(&self.options.initial_dir);
        let seq = self.next_seq();
        self.dispatch(&cd)?;
        self.dispatch_sentinel(seq)?;
        match wait_for_sentinel(
            self.pending()?,
            &self.profile,
            &self.sentinel,
            seq,
            Instant::now() + STARTUP_TIMEOUT,
        ) {
            Completion::Finished { .. } => {}
            Completion::TimedOut { .. } => warn!("shell did not acknowledge startup in time"),
            Completion::Disconnected { .. } => {
                self.process = None;
                return Err(SessionError::ShellExited);
            }
        }
        info!(dir = %self.options.initial_dir.display(), "session ready");
        Ok(())
    }

    /// Terminate the interpreter. Safe to call when nothing is running.
    pub fn stop(&mut self) {
        if let Some(process) = self.process.take() {
            let took = process.terminate(self.profile.exit_command);
            debug!(elapsed_ms = took.as_millis() as u64, "session stopped");
        }
    }

    /// Make sure an interpreter is alive, restarting a dead one once.
    pub(crate) fn ensure_running(&mut self) -> Result<()> {
        if self.process.is_some() && !self.is_running() {
            warn!("shell exited unexpectedly, restarting");
        }
        self.start()
    }

    pub(crate) fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    pub(crate) fn next_command_number(&mut self) -> u64 {
        self.commands += 1;
        self.commands
    }

    pub(crate) fn dispatch(&mut self, line: &str) -> Result<()> {
        let process = self.process.as_mut().ok_or(SessionError::NotRunning)?;
        process.send_line(line)
    }

    pub(crate) fn dispatch_sentinel(&mut self, seq: u64) -> Result<()> {
        let line = self.profile.sentinel_command(self.sentinel.as_str(), seq);
        self.dispatch(&line)
    }

    pub(crate) fn pending(&self) -> Result<&PendingOutput> {
        self.process
            .as_ref()
            .map(ShellProcess::pending)
            .ok_or(SessionError::NotRunning)
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        self.stop();
    }
}
