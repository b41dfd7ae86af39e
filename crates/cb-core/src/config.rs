use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Top-level configuration loaded from `~/.columba/config.toml`.
///
/// Every section is optional in the file; missing keys fall back to the
/// defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub mail: MailConfig,
}

impl Config {
    /// Load config from `~/.columba/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            debug!(path = %path.display(), "no config file, using defaults");
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        debug!(path = %path.display(), "config loaded");
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.general.validate()?;
        self.session.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }

    /// `~/.columba/config.toml`, or `./.columba/config.toml` without a home dir.
    pub fn default_path() -> PathBuf {
        Self::data_dir().join("config.toml")
    }

    /// Root directory for columba state (`~/.columba`).
    pub fn data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".columba")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON log lines instead of the human-readable format.
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

impl GeneralConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::Validation(
                "general.log_level must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_project_name() -> String {
    "columba".into()
}
fn default_log_level() -> String {
    "info".into()
}

/// Settings for the persistent shell session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Directory the shell starts in. Defaults to the process's current directory.
    #[serde(default)]
    pub initial_dir: Option<String>,
    /// Directory command output artifacts are written to. When unset, output
    /// is captured from the shell's stream instead.
    #[serde(default = "default_output_dir")]
    pub output_dir: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Extra denylist patterns on top of the built-in set.
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_dir: None,
            output_dir: default_output_dir(),
            default_timeout_secs: default_timeout_secs(),
            blocked_patterns: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_secs == 0 || self.default_timeout_secs > 86_400 {
            return Err(ConfigError::Validation(
                "session.default_timeout_secs must be between 1 and 86400".to_string(),
            ));
        }
        if let Some(dir) = &self.initial_dir {
            if dir.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "session.initial_dir must not be empty when set".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn default_output_dir() -> Option<String> {
    Some(
        Config::data_dir()
            .join("output")
            .to_string_lossy()
            .into_owned(),
    )
}
fn default_timeout_secs() -> u64 {
    30
}

/// Idle/active polling cadence for the mail scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_idle")]
    pub poll_interval_idle_secs: u64,
    #[serde(default = "default_poll_active")]
    pub poll_interval_active_secs: u64,
    /// Seconds without mail before falling back from active to idle polling.
    #[serde(default = "default_active_timeout")]
    pub active_timeout_secs: u64,
    /// Keep the shell session alive across idle periods.
    #[serde(default)]
    pub session_persistence: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_idle_secs: default_poll_idle(),
            poll_interval_active_secs: default_poll_active(),
            active_timeout_secs: default_active_timeout(),
            session_persistence: false,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_idle_secs == 0 || self.poll_interval_active_secs == 0 {
            return Err(ConfigError::Validation(
                "scheduler poll intervals must be at least 1 second".to_string(),
            ));
        }
        if self.poll_interval_active_secs > self.poll_interval_idle_secs {
            return Err(ConfigError::Validation(format!(
                "scheduler.poll_interval_active_secs ({}) must not exceed poll_interval_idle_secs ({})",
                self.poll_interval_active_secs, self.poll_interval_idle_secs
            )));
        }
        Ok(())
    }
}

fn default_poll_idle() -> u64 {
    60
}
fn default_poll_active() -> u64 {
    5
}
fn default_active_timeout() -> u64 {
    300
}

/// Mailbox settings. Credentials for a remote transport are never stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Directory holding `inbox/` and `outbox/` for the spool mailbox.
    #[serde(default = "default_spool_dir")]
    pub spool_dir: String,
    /// Sender addresses whose mail is executed. Empty means nobody.
    #[serde(default)]
    pub allowed_senders: Vec<String>,
    #[serde(default = "default_reply_subject")]
    pub reply_subject: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            spool_dir: default_spool_dir(),
            allowed_senders: Vec::new(),
            reply_subject: default_reply_subject(),
        }
    }
}

fn default_spool_dir() -> String {
    Config::data_dir()
        .join("mail")
        .to_string_lossy()
        .into_owned()
}
fn default_reply_subject() -> String {
    "Columba Agent Info".into()
}
