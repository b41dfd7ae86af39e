use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::warn;

use crate::error::{Result, SessionError};
use crate::executor::CommandResult;
use crate::session::ShellSession;

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Cloneable async front for one [`ShellSession`].
///
/// Calls are serialized by a mutex and run on tokio's blocking pool, so one
/// command is in flight per session and async callers never block a worker.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<ShellSession>>,
    initial_dir: PathBuf,
}

impl SessionHandle {
    pub fn new(session: ShellSession) -> Self {
        let initial_dir = session.initial_dir().to_path_buf();
        Self {
            inner: Arc::new(Mutex::new(session)),
            initial_dir,
        }
    }

    pub fn initial_dir(&self) -> &Path {
        &self.initial_dir
    }

    fn lock(session: &Mutex<ShellSession>) -> MutexGuard<'_, ShellSession> {
        session.lock().unwrap_or_else(|e| {
            warn!("session lock was poisoned, recovering");
            e.into_inner()
        })
    }

    async fn with_session<T, F>(&self, f: F) -> std::result::Result<T, tokio::task::JoinError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ShellSession) -> T + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut session = Self::lock(&inner);
            f(&mut session)
        })
        .await
    }

    pub async fn execute(&self, command: impl Into<String>, timeout: Option<Duration>) -> CommandResult {
        let command = command.into();
        match self.with_session(move |s| s.execute(&command, timeout)).await {
            Ok(result) => result,
            Err(e) => CommandResult::internal(format!("session task failed: {e}")),
        }
    }

    pub async fn working_dir(&self) -> PathBuf {
        match self.with_session(|s| s.working_dir()).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!("working directory task failed: {e}");
                self.initial_dir.clone()
            }
        }
    }

    pub async fn start(&self) -> Result<()> {
        self.with_session(|s| s.start())
            .await
            .map_err(|e| SessionError::Task(e.to_string()))?
    }

    pub async fn stop(&self) {
        if let Err(e) = self.with_session(|s| s.stop()).await {
            warn!("session stop task failed: {e}");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.with_session(|s| s.is_running()).await.unwrap_or(false)
    }

    pub async fn read_artifact(&self, path: impl Into<PathBuf>) -> Result<String> {
        let path = path.into();
        self.with_session(move |s| s.read_artifact(&path))
            .await
            .map_err(|e| SessionError::Task(e.to_string()))?
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("initial_dir", &self.initial_dir)
            .field("handles", &Arc::strong_count(&self.inner))
            .finish()
    }
}
