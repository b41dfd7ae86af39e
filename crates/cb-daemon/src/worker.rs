use std::time::Duration;

use cb_session::{CommandResult, SessionHandle};
use tracing::info;

/// Runs the command lines of one mail body through the shared session and
/// renders the replies.
#[derive(Debug, Clone)]
pub struct Worker {
    session: SessionHandle,
    timeout: Option<Duration>,
}

impl Worker {
    pub fn new(session: SessionHandle) -> Self {
        Self {
            session,
            timeout: None,
        }
    }

    /// Override the session's default per-command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Execute every command in `body` in order and build the reply text.
    pub async fn handle_body(&self, body: &str) -> String {
        let commands = command_lines(body);
        if commands.is_empty() {
            return "No commands found in message.".to_string();
        }

        let mut sections = Vec::with_capacity(commands.len() + 1);
        for command in commands {
            let result = self.session.execute(command, self.timeout).await;
            info!(command, status = %result.status(), "command handled");
            sections.push(format_result(command, &result));
        }

        let cwd = self.session.working_dir().await;
        sections.push(format!("[Working Directory]\n{}", cwd.display()));
        sections.join("\n\n")
    }
}

/// Lines worth executing: trimmed, non-empty, not `#` comments.
pub fn command_lines(body: &str) -> Vec<&str> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

/// Render one command and its result.
///
/// The exit code is the shell's own status when it was reported, otherwise
/// the numeric status code.
pub fn format_result(command: &str, result: &CommandResult) -> String {
    let code = result
        .exit_code()
        .unwrap_or_else(|| result.status().code());

    let mut parts = vec![format!("$ {command}"), format!("[Exit Code: {code}]")];
    let stdout = result.output().trim();
    if !stdout.is_empty() {
        parts.push(format!("[STDOUT]\n{stdout}"));
    }
    let stderr = result.error().trim();
    if !stderr.is_empty() {
        parts.push(format!("[STDERR]\n{stderr}"));
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let body = "# status check\n\n  uptime  \n#ls\ndf -h\n";
        assert_eq!(command_lines(body), vec!["uptime", "df -h"]);
        assert!(command_lines("\n# only a comment\n").is_empty());
    }
}
