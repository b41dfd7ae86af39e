use tracing::warn;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecurityError {
    #[error("command blocked: matches dangerous pattern `{pattern}`")]
    BlockedCommand { pattern: String },
}

/// Patterns rejected by [`CommandDenylist::new`].
pub const DEFAULT_DANGEROUS_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "format",
    "del /f /s /q",
    "mkfs",
    "dd if=/dev/zero of=/dev/",
    "dd if=/dev/urandom of=/dev/",
    ":(){:|:&};:",
    ":(){ :|:& };:",
];

// ===========================================================================
// CommandDenylist
// ===========================================================================

/// Rejects shell commands containing known-destructive fragments.
///
/// Matching is a case-insensitive substring test against the raw command
/// text. This is a best-effort guard against accidents, not a sandbox:
/// quoting, variables, or aliases trivially get around it.
#[derive(Debug, Clone)]
pub struct CommandDenylist {
    patterns: Vec<String>,
}

impl Default for CommandDenylist {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandDenylist {
    pub fn new() -> Self {
        Self::with_patterns(DEFAULT_DANGEROUS_PATTERNS.iter().copied())
    }

    /// Build a denylist from an explicit pattern set.
    pub fn with_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.into().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Add a dangerous pattern.
    pub fn add_pattern(&mut self, pattern: impl Into<String>) {
        let pattern = pattern.into().to_lowercase();
        if !pattern.is_empty() && !self.patterns.contains(&pattern) {
            self.patterns.push(pattern);
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// The first pattern found in `command`, if any.
    pub fn matched_pattern(&self, command: &str) -> Option<&str> {
        let lower = command.to_lowercase();
        self.patterns
            .iter()
            .find(|p| lower.contains(p.as_str()))
            .map(String::as_str)
    }

    /// Validate a command before it reaches the shell.
    pub fn check(&self, command: &str) -> Result<(), SecurityError> {
        match self.matched_pattern(command) {
            Some(pattern) => {
                warn!(command, pattern, "blocked dangerous command");
                Err(SecurityError::BlockedCommand {
                    pattern: pattern.to_string(),
                })
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_are_stored_lowercase() {
        let list = CommandDenylist::with_patterns(["SHUTDOWN -H", ""]);
        assert_eq!(list.patterns(), &["shutdown -h".to_string()]);
    }

    #[test]
    fn add_pattern_deduplicates() {
        let mut list = CommandDenylist::with_patterns(Vec::<String>::new());
        list.add_pattern("reboot");
        list.add_pattern("REBOOT");
        assert_eq!(list.patterns().len(), 1);
    }
}
