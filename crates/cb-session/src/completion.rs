use std::time::Instant;

use tracing::{debug, trace};
use uuid::Uuid;

use crate::pending::PendingOutput;
use crate::profile::ShellProfile;

// ---------------------------------------------------------------------------
// Sentinel
// ---------------------------------------------------------------------------

/// Marker echoed after every command so the reader knows its output ended.
///
/// A fresh value is generated for each shell process, so a marker from a
/// previous process can never be mistaken for the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinel(String);

impl Sentinel {
    pub fn generate() -> Self {
        Self(format!("__COLUMBA_DONE_{}__", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a line that may carry this sentinel.
    ///
    /// Returns `None` when the sentinel is absent.
    pub fn parse<'a>(&self, line: &'a str) -> Option<SentinelLine<'a>> {
        let idx = line.find(self.0.as_str())?;
        let prefix = &line[..idx];
        let mut fields = line[idx + self.0.len()..].split_whitespace();
        let seq = fields.next().and_then(|s| s.parse::<u64>().ok());
        let exit_code = fields.next().and_then(|s| s.parse::<i32>().ok());
        Some(SentinelLine {
            prefix,
            seq,
            exit_code,
        })
    }
}

impl std::fmt::Display for Sentinel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A line of shell output that contains the sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelLine<'a> {
    /// Text printed before the sentinel on the same line, typically the
    /// unterminated last line of the command's own output.
    pub prefix: &'a str,
    pub seq: Option<u64>,
    pub exit_code: Option<i32>,
}

impl SentinelLine<'_> {
    /// Whether the line looks like the sentinel command itself, as echoed by
    /// an interpreter that repeats its input.
    pub fn is_command_echo(&self) -> bool {
        self.prefix
            .trim_end_matches([' ', '"', '\''])
            .to_ascii_lowercase()
            .ends_with("echo")
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Lines observed before the sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub lines: Vec<String>,
    /// Output without a trailing newline that shared a line with the
    /// sentinel.
    pub tail: String,
}

impl CapturedOutput {
    /// Reassemble the captured text, one `\n` per complete line.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(&self.tail);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The sentinel for this command was seen.
    Finished {
        output: CapturedOutput,
        exit_code: Option<i32>,
    },
    /// `deadline` passed first. The command may still be running.
    TimedOut { output: CapturedOutput },
    /// Every reader hung up, so the shell is gone.
    Disconnected { output: CapturedOutput },
}

/// Read `pending` until the sentinel tagged with `seq` shows up or
/// `deadline` passes.
///
/// Sentinel lines tagged with an older sequence number belong to commands
/// that previously timed out; they and everything collected before them
/// are discarded. Echoed sentinel commands are only skipped for
/// interpreters that repeat their input.
pub fn wait_for_sentinel(
    pending: &PendingOutput,
    profile: &ShellProfile,
    sentinel: &Sentinel,
    seq: u64,
    deadline: Instant,
) -> Completion {
    let mut output = CapturedOutput::default();
    loop {
        let line = match pending.recv_deadline(deadline) {
            Ok(line) => line,
            Err(flume::RecvTimeoutError::Timeout) => {
                debug!(seq, lines = output.lines.len(), "sentinel not seen before deadline");
                return Completion::TimedOut { output };
            }
            Err(flume::RecvTimeoutError::Disconnected) => {
                return Completion::Disconnected { output };
            }
        };

        let Some(mark) = sentinel.parse(&line) else {
            output.lines.push(line);
            continue;
        };

        if profile.echoes_input && mark.is_command_echo() {
            trace!("skipping echoed sentinel command");
            continue;
        }

        match mark.seq {
            Some(tag) if tag < seq => {
                debug!(stale = tag, current = seq, "discarding output of an earlier command");
                output.lines.clear();
            }
            _ => {
                output.tail = mark.prefix.to_string();
                return Completion::Finished {
                    output,
                    exit_code: mark.exit_code,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pending_with(lines: &[&str]) -> (flume::Sender<String>, PendingOutput) {
        let (tx, rx) = flume::unbounded();
        for line in lines {
            tx.send(line.to_string()).expect("send");
        }
        (tx, PendingOutput::new(rx))
    }

    fn posix() -> ShellProfile {
        ShellProfile::for_platform("linux")
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_millis(200)
    }

    #[test]
    fn sentinels_are_unique_per_generation() {
        let a = Sentinel::generate();
        let b = Sentinel::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("__COLUMBA_DONE_"));
        assert!(a.as_str().ends_with("__"));
    }

    #[test]
    fn parse_reads_seq_and_status() {
        let s = Sentinel::generate();
        let line = format!("{s} 7 127");
        let mark = s.parse(&line).expect("sentinel");
        assert_eq!(mark.seq, Some(7));
        assert_eq!(mark.exit_code, Some(127));
        assert_eq!(mark.prefix, "");
        assert!(!mark.is_command_echo());
    }

    #[test]
    fn parse_flags_echoed_command() {
        let s = Sentinel::generate();
        let line = format!(r"C:\work>echo {s} 3 %ERRORLEVEL%");
        let mark = s.parse(&line).expect("sentinel");
        assert!(mark.is_command_echo());
        assert_eq!(mark.exit_code, None);
    }

    #[test]
    fn parse_ignores_unrelated_lines() {
        let s = Sentinel::generate();
        assert!(s.parse("__COLUMBA_DONE_other__ 1 0").is_none());
    }

    #[test]
    fn collects_lines_before_sentinel() {
        let s = Sentinel::generate();
        let end = format!("{s} 1 0");
        let (_tx, pending) = pending_with(&["a", "b", &end, "after"]);
        match wait_for_sentinel(&pending, &posix(), &s, 1, soon()) {
            Completion::Finished { output, exit_code } => {
                assert_eq!(output.text(), "a\nb\n");
                assert_eq!(exit_code, Some(0));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn keeps_unterminated_prefix_as_tail() {
        let s = Sentinel::generate();
        let end = format!("no newline{s} 2 0");
        let (_tx, pending) = pending_with(&["first", &end]);
        match wait_for_sentinel(&pending, &posix(), &s, 2, soon()) {
            Completion::Finished { output, .. } => {
                assert_eq!(output.text(), "first\nno newline");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn stale_sentinel_resets_capture() {
        let s = Sentinel::generate();
        let stale = format!("{s} 4 0");
        let done = format!("{s} 5 1");
        let (_tx, pending) = pending_with(&["late output", &stale, "fresh", &done]);
        match wait_for_sentinel(&pending, &posix(), &s, 5, soon()) {
            Completion::Finished { output, exit_code } => {
                assert_eq!(output.lines, vec!["fresh".to_string()]);
                assert_eq!(exit_code, Some(1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn echo_word_before_sentinel_is_output_on_posix() {
        let s = Sentinel::generate();
        let end = format!("please echo{s} 1 0");
        let (_tx, pending) = pending_with(&[&end]);
        match wait_for_sentinel(&pending, &posix(), &s, 1, soon()) {
            Completion::Finished { output, exit_code } => {
                assert_eq!(output.text(), "please echo");
                assert_eq!(exit_code, Some(0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn echoing_interpreter_skips_its_sentinel_command() {
        let s = Sentinel::generate();
        let echoed = format!(r"C:\work>echo {s} 1 %ERRORLEVEL%");
        let done = format!("{s} 1 0");
        let (_tx, pending) = pending_with(&["out", &echoed, &done]);
        let cmd = ShellProfile::for_platform("windows");
        match wait_for_sentinel(&pending, &cmd, &s, 1, soon()) {
            Completion::Finished { output, exit_code } => {
                assert_eq!(output.text(), "out\n");
                assert_eq!(exit_code, Some(0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn timeout_returns_partial_output() {
        let s = Sentinel::generate();
        let (_tx, pending) = pending_with(&["partial"]);
        let deadline = Instant::now() + Duration::from_millis(50);
        match wait_for_sentinel(&pending, &posix(), &s, 1, deadline) {
            Completion::TimedOut { output } => assert_eq!(output.text(), "partial\n"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn disconnect_is_reported() {
        let s = Sentinel::generate();
        let (tx, pending) = pending_with(&["x"]);
        drop(tx);
        assert!(matches!(
            wait_for_sentinel(&pending, &posix(), &s, 1, soon()),
            Completion::Disconnected { .. }
        ));
    }
}
