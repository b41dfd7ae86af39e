use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SessionError};

/// Character budget for output returned to callers.
pub const MAX_OUTPUT_CHARS: usize = 4096;

// ---------------------------------------------------------------------------
// OutputSink
// ---------------------------------------------------------------------------

/// Directory that receives one artifact file per executed command.
#[derive(Debug, Clone)]
pub struct OutputSink {
    dir: PathBuf,
}

impl OutputSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Fresh artifact path for command number `counter`.
    ///
    /// The random token keeps names distinct even if the counter is reset by
    /// a new session in the same second.
    pub fn artifact_path(&self, counter: u64) -> PathBuf {
        let token = Uuid::new_v4().simple().to_string();
        self.dir
            .join(artifact_file_name(Local::now(), counter, &token[..8]))
    }

    /// Whether `path` names a file directly inside this sink.
    pub fn owns(&self, path: &Path) -> bool {
        path.parent() == Some(self.dir.as_path())
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("cmd_output_") && n.ends_with(".txt"))
    }

    /// Read a finished artifact. A file the shell never created reads as
    /// empty, which happens when redirection itself failed.
    pub fn read(&self, path: &Path) -> Result<String> {
        if !self.owns(path) {
            return Err(SessionError::ForeignArtifact(path.to_path_buf()));
        }
        match std::fs::read(path) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "artifact missing, treating as empty");
                Ok(String::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// `cmd_output_<YYYYMMDD_HHMMSS>_<counter>_<token>.txt`
pub fn artifact_file_name(at: DateTime<Local>, counter: u64, token: &str) -> String {
    format!(
        "cmd_output_{}_{}_{}.txt",
        at.format("%Y%m%d_%H%M%S"),
        counter,
        token
    )
}

/// Cut `output` to `max_chars` characters, noting the original length.
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    let total = output.chars().count();
    if total <= max_chars {
        return output.to_string();
    }
    let mut cut: String = output.chars().take(max_chars).collect();
    cut.push_str(&format!("\n... [truncated, total {total} chars]"));
    cut
}
