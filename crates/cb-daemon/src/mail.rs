use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A message picked up from the inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMail {
    #[serde(default)]
    pub id: String,
    pub from: String,
    #[serde(default)]
    pub subject: String,
    pub body: String,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl InboundMail {
    pub fn new(from: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            subject: String::new(),
            body: body.into(),
            received_at: Utc::now(),
        }
    }
}

/// A reply to be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail spool I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("mail transport error: {0}")]
    Transport(String),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> MailError + '_ {
    move |source| MailError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Mailbox
// ---------------------------------------------------------------------------

/// Where commands come from and replies go.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Unread messages from authorized senders. Returned messages are marked
    /// as seen and will not be returned again.
    async fn fetch_unread(&self) -> Result<Vec<InboundMail>, MailError>;

    async fn send(&self, mail: OutboundMail) -> Result<(), MailError>;
}

/// Extract the bare address from `Name <addr>` or `addr`, lowercased.
pub fn sender_address(from: &str) -> String {
    let from = from.trim();
    let addr = match (from.rfind('<'), from.rfind('>')) {
        (Some(open), Some(close)) if open < close => &from[open + 1..close],
        _ => from,
    };
    addr.trim().to_lowercase()
}

pub fn is_allowed_sender(from: &str, allowed: &[String]) -> bool {
    let addr = sender_address(from);
    !addr.is_empty() && allowed.iter().any(|a| sender_address(a) == addr)
}

// ---------------------------------------------------------------------------
// SpoolMailbox
// ---------------------------------------------------------------------------

/// Directory-backed mailbox.
///
/// ```text
/// <root>/inbox/*.json           unread
/// <root>/inbox/seen/*.json      handed out
/// <root>/inbox/rejected/*.json  unauthorized or unreadable
/// <root>/outbox/<uuid>.json     replies
/// ```
#[derive(Debug, Clone)]
pub struct SpoolMailbox {
    root: PathBuf,
    allowed_senders: Vec<String>,
}

impl SpoolMailbox {
    pub fn new(root: impl Into<PathBuf>, allowed_senders: Vec<String>) -> Self {
        Self {
            root: root.into(),
            allowed_senders,
        }
    }

    pub fn inbox(&self) -> PathBuf {
        self.root.join("inbox")
    }

    pub fn outbox(&self) -> PathBuf {
        self.root.join("outbox")
    }

    /// Create the spool layout if missing.
    pub async fn ensure_layout(&self) -> Result<(), MailError> {
        for dir in [
            self.inbox(),
            self.inbox().join("seen"),
            self.inbox().join("rejected"),
            self.outbox(),
        ] {
            tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;
        }
        Ok(())
    }

    /// Drop a message into the inbox, as a mail fetcher would.
    pub async fn deliver(&self, mail: &InboundMail) -> Result<PathBuf, MailError> {
        self.ensure_layout().await?;
        let id = Uuid::new_v4();
        let tmp = self.inbox().join(format!(".{id}.tmp"));
        let path = self.inbox().join(format!("{id}.json"));
        let bytes = serde_json::to_vec_pretty(mail)?;
        tokio::fs::write(&tmp, bytes).await.map_err(io_err(&tmp))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err(&path))?;
        Ok(path)
    }

    async fn move_into(&self, path: &Path, folder: &str) -> Result<(), MailError> {
        let Some(name) = path.file_name() else {
            return Ok(());
        };
        let target = self.inbox().join(folder).join(name);
        tokio::fs::rename(path, &target).await.map_err(io_err(path))
    }

    async fn unread_paths(&self) -> Result<Vec<PathBuf>, MailError> {
        let inbox = self.inbox();
        let mut entries = tokio::fs::read_dir(&inbox).await.map_err(io_err(&inbox))?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err(&inbox))? {
            let path = entry.path();
            let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
            if is_file && path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

#[async_trait]
impl Mailbox for SpoolMailbox {
    async fn fetch_unread(&self) -> Result<Vec<InboundMail>, MailError> {
        self.ensure_layout().await?;
        let mut accepted = Vec::new();

        for path in self.unread_paths().await? {
            let bytes = tokio::fs::read(&path).await.map_err(io_err(&path))?;
            let mut mail: InboundMail = match serde_json::from_slice(&bytes) {
                Ok(mail) => mail,
                Err(e) => {
                    warn!(path = %path.display(), "unreadable message: {e}");
                    self.move_into(&path, "rejected").await?;
                    continue;
                }
            };
            if mail.id.is_empty() {
                mail.id = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
            }

            if !is_allowed_sender(&mail.from, &self.allowed_senders) {
                warn!(from = %mail.from, id = %mail.id, "rejecting mail from unauthorized sender");
                self.move_into(&path, "rejected").await?;
                continue;
            }

            self.move_into(&path, "seen").await?;
            debug!(from = %mail.from, id = %mail.id, "accepted mail");
            accepted.push(mail);
        }
        Ok(accepted)
    }

    async fn send(&self, mail: OutboundMail) -> Result<(), MailError> {
        self.ensure_layout().await?;
        let id = Uuid::new_v4();
        let tmp = self.outbox().join(format!(".{id}.tmp"));
        let path = self.outbox().join(format!("{id}.json"));
        let bytes = serde_json::to_vec_pretty(&mail)?;
        tokio::fs::write(&tmp, bytes).await.map_err(io_err(&tmp))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err(&path))?;
        info!(to = %mail.to, path = %path.display(), "reply queued");
        Ok(())
    }
}
