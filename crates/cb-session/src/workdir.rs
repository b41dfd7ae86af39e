use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::completion::{wait_for_sentinel, CapturedOutput, Completion};
use crate::error::Result;
use crate::session::ShellSession;

const PWD_TIMEOUT: Duration = Duration::from_secs(2);
const PWD_DRAIN_GRACE: Duration = Duration::from_millis(50);
const PWD_DRAIN_MAX: Duration = Duration::from_millis(300);

impl ShellSession {
    /// Ask the live shell for its current directory.
    ///
    /// Falls back to the initial directory when the shell is not running or
    /// does not answer in time.
    pub fn working_dir(&mut self) -> PathBuf {
        if !self.is_running() {
            return self.options.initial_dir.clone();
        }
        match self.query_working_dir() {
            Ok(Some(dir)) => dir,
            Ok(None) => {
                debug!("no directory reported, using initial directory");
                self.options.initial_dir.clone()
            }
            Err(e) => {
                warn!("working directory query failed: {e}");
                self.options.initial_dir.clone()
            }
        }
    }

    fn query_working_dir(&mut self) -> Result<Option<PathBuf>> {
        self.pending()?.drain(PWD_DRAIN_GRACE, PWD_DRAIN_MAX);

        let seq = self.next_seq();
        let pwd = self.profile.pwd_command;
        self.dispatch(pwd)?;
        self.dispatch_sentinel(seq)?;

        let completion = wait_for_sentinel(
            self.pending()?,
            &self.profile,
            &self.sentinel,
            seq,
            Instant::now() + PWD_TIMEOUT,
        );
        match completion {
            Completion::Finished { output, .. } => Ok(self.last_directory_line(&output)),
            Completion::TimedOut { .. } => {
                warn!("shell did not answer the working directory query");
                Ok(None)
            }
            Completion::Disconnected { .. } => {
                self.process = None;
                Ok(None)
            }
        }
    }

    fn last_directory_line(&self, output: &CapturedOutput) -> Option<PathBuf> {
        let pwd = self.profile.pwd_command;
        output
            .lines
            .iter()
            .chain(std::iter::once(&output.tail))
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .filter(|line| !self.profile.is_input_echo(line, pwd))
            .filter(|line| self.sentinel.parse(line).is_none())
            .last()
            .map(PathBuf::from)
    }
}
