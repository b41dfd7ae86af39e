use std::io::Write;
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::pending::{spawn_reader, PendingOutput};
use crate::profile::ShellProfile;

const EXIT_POLL: Duration = Duration::from_millis(25);
const STOP_GRACE: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// ShellProcess
// ---------------------------------------------------------------------------

/// One interpreter process with piped stdio and its reader threads.
pub struct ShellProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    pending: PendingOutput,
    stop: Arc<AtomicBool>,
    // Detached: a grandchild holding the pipe open would block a join.
    _readers: Vec<JoinHandle<()>>,
    pid: u32,
}

impl ShellProcess {
    /// Launch `profile`'s interpreter in `cwd` and start draining its
    /// stdout and stderr into one queue.
    pub fn spawn(profile: &ShellProfile, cwd: &Path) -> Result<Self> {
        let mut child = Command::new(profile.program)
            .args(profile.args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SessionError::Spawn {
                program: profile.program.to_string(),
                source,
            })?;
        let pid = child.id();

        match Self::wire(&mut child, profile) {
            Ok((stdin, pending, stop, readers)) => {
                info!(pid, program = profile.program, cwd = %cwd.display(), "shell started");
                Ok(Self {
                    child,
                    stdin: Some(stdin),
                    pending,
                    stop,
                    _readers: readers,
                    pid,
                })
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn wire(
        child: &mut Child,
        profile: &ShellProfile,
    ) -> Result<(ChildStdin, PendingOutput, Arc<AtomicBool>, Vec<JoinHandle<()>>)> {
        let stdin = child.stdin.take().ok_or(SessionError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SessionError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(SessionError::MissingPipe("stderr"))?;

        let (tx, rx) = flume::unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let readers = vec![
            spawn_reader("stdout", stdout, *profile, tx.clone(), stop.clone())?,
            spawn_reader("stderr", stderr, *profile, tx, stop.clone())?,
        ];
        Ok((stdin, PendingOutput::new(rx), stop, readers))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn pending(&self) -> &PendingOutput {
        &self.pending
    }

    /// Alive and still accepting input.
    pub fn is_alive(&mut self) -> bool {
        self.stdin.is_some() && matches!(self.child.try_wait(), Ok(None))
    }

    /// Write one line of input to the interpreter.
    pub fn send_line(&mut self, line: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(SessionError::StdinClosed)?;
        let written = stdin
            .write_all(line.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.flush());
        match written {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                self.stdin = None;
                Err(SessionError::StdinClosed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Shut the interpreter down: exit command, then SIGTERM, then kill.
    /// Returns how long shutdown took.
    pub fn terminate(mut self, exit_command: &str) -> Duration {
        let started = Instant::now();
        let grace = STOP_GRACE;

        if self.send_line(exit_command).is_ok() {
            self.stdin = None;
            if self.wait_for_exit(grace) {
                debug!(pid = self.pid, "shell exited on request");
                return self.finish(started);
            }
        }
        self.stdin = None;

        #[cfg(unix)]
        {
            if let Ok(pid) = libc::pid_t::try_from(self.pid) {
                // SAFETY: pid is our own child, which has not been reaped yet.
                unsafe {
                    libc::kill(pid, libc::SIGTERM);
                }
                if self.wait_for_exit(grace) {
                    debug!(pid = self.pid, "shell exited on SIGTERM");
                    return self.finish(started);
                }
            }
        }

        warn!(pid = self.pid, "shell did not exit, killing");
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.finish(started)
    }

    fn finish(self, started: Instant) -> Duration {
        self.stop.store(true, Ordering::Relaxed);
        info!(pid = self.pid, "shell stopped");
        started.elapsed()
    }

    fn wait_for_exit(&mut self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return true,
                Ok(None) if Instant::now() < deadline => std::thread::sleep(EXIT_POLL),
                Ok(None) => return false,
                // Already reaped elsewhere.
                Err(_) => return true,
            }
        }
    }
}

impl std::fmt::Debug for ShellProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellProcess")
            .field("pid", &self.pid)
            .field("stdin_open", &self.stdin.is_some())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Drop for ShellProcess {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if matches!(self.child.try_wait(), Ok(None)) {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Parse `line` with the profile's syntax checker without running it.
///
/// A line the interpreter cannot parse would leave the live shell waiting
/// for more input, swallowing the sentinel and every later command.
pub fn check_syntax(profile: &ShellProfile, line: &str) -> Result<()> {
    let Some((program, args)) = profile.syntax_check else {
        return Ok(());
    };
    let out = Command::new(program)
        .args(args)
        .arg(line)
        .stdin(Stdio::null())
        .output()?;
    if out.status.success() {
        return Ok(());
    }
    let reason = profile.decode(&out.stderr).trim().to_string();
    debug!(status = ?out.status.code(), %reason, "rejected unparsable command");
    Err(SessionError::Syntax(reason))
}
