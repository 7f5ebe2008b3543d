//! State backend trait and error types

use async_trait::async_trait;
use thiserror::Error;

use crate::lock::LockInfo;
use crate::state::StateFile;
use crate::workspace::Warning;

/// Errors that can occur when interacting with a state backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// Configuration error
    #[error("Backend configuration error: {0}")]
    Configuration(String),

    /// The backend type is not supported
    #[error("Unsupported backend type: {0}")]
    UnsupportedBackend(String),

    /// The backend could not be reached
    #[error("Failed to connect to backend: {0}")]
    Connect(String),

    /// Fetching or decoding the stored state failed
    #[error("Failed to refresh state: {0}")]
    Refresh(String),

    /// An operation that needs a cached state was called before a successful read
    #[error("{0} called before a successful read")]
    Precondition(&'static str),

    /// The state is locked by another process
    #[error("State is locked{}", describe_holder(.holder.as_deref()))]
    Locked { holder: Option<Box<LockInfo>> },

    /// The lock table could not be asked for a lock
    #[error("Failed to acquire lock: {0}")]
    Lock(String),

    /// The lock was not found (for release/force-unlock operations)
    #[error("Lock not found: {0}")]
    LockNotFound(String),

    /// Lock ID mismatch when trying to release
    #[error("Lock ID mismatch: expected {expected}, got {actual}")]
    LockMismatch { expected: String, actual: String },

    /// State lineage mismatch (prevents accidental state overwrites)
    #[error("State lineage mismatch: expected {expected}, got {actual}")]
    LineageMismatch { expected: String, actual: String },

    /// Durable write of the state failed
    #[error("Failed to write state: {0}")]
    Write(String),

    /// Releasing the lock after a persist failed
    #[error("Failed to release lock: {0}")]
    Unlock(String),

    /// The write failed and the lock could not be released afterwards
    #[error("{write}; {unlock}")]
    WriteAndUnlock {
        write: Box<BackendError>,
        unlock: Box<BackendError>,
    },
}

fn describe_holder(holder: Option<&LockInfo>) -> String {
    match holder {
        Some(lock) => format!(
            " by {} (lock ID: {}, operation: {}, created: {})",
            lock.who, lock.id, lock.operation, lock.created
        ),
        None => String::new(),
    }
}

impl BackendError {
    /// Create a Locked error from the holder's LockInfo
    pub fn locked(lock: &LockInfo) -> Self {
        Self::Locked {
            holder: Some(Box::new(lock.clone())),
        }
    }

    /// Create an unsupported backend error
    pub fn unsupported_backend(backend_type: impl Into<String>) -> Self {
        Self::UnsupportedBackend(backend_type.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Classify a failed lock release as an unlock error
    pub fn into_unlock(self) -> Self {
        match self {
            Self::Unlock(_) => self,
            other => Self::Unlock(other.to_string()),
        }
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// The Read/Write/Persist contract shared by all backends
///
/// A backend value is a session: `read` caches a snapshot, `write` stages a
/// replacement in memory and `persist` makes the staged state durable.
#[async_trait]
pub trait StateBackend: Send {
    /// Fetch the durable state of a workspace and cache it on the handle.
    ///
    /// No names selects the default workspace. Only the first name is used
    /// if several are given; the rest are ignored with a warning.
    async fn read(&mut self, workspaces: &[&str]) -> BackendResult<StateFile>;

    /// Stage a new state in memory. No I/O is performed.
    fn write(&mut self, state: StateFile) -> BackendResult<()>;

    /// Stage a new state even if its lineage differs from the one read.
    ///
    /// Used to promote state between locations; still requires a prior read.
    fn force_write(&mut self, state: StateFile) -> BackendResult<()>;

    /// Durably store the staged state (or the cached one if nothing is staged)
    async fn persist(&mut self) -> BackendResult<()>;

    /// Workspace selected by the last successful read
    fn workspace(&self) -> Option<&str>;

    /// Warnings raised by the most recent read
    fn warnings(&self) -> &[Warning];
}

/// Object storage used by remote backends
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object. Returns `None` if it does not exist.
    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>>;

    /// Store an object, optionally with server-side encryption
    async fn put(&self, key: &str, body: Vec<u8>, encrypt: bool) -> BackendResult<()>;
}

/// Cached and staged state of a handle after a successful read
#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub workspace: String,
    pub current: StateFile,
    pub staged: Option<StateFile>,
}

impl Session {
    pub fn new(workspace: impl Into<String>, current: StateFile) -> Self {
        Self {
            workspace: workspace.into(),
            current,
            staged: None,
        }
    }

    /// Replace the staged state, refusing a state from another lineage
    pub fn stage(&mut self, state: StateFile) -> BackendResult<()> {
        if !self.current.is_initial()
            && !state.is_initial()
            && state.lineage != self.current.lineage
        {
            return Err(BackendError::LineageMismatch {
                expected: self.current.lineage.clone(),
                actual: state.lineage,
            });
        }
        self.replace(state);
        Ok(())
    }

    /// Replace the staged state without comparing lineages
    pub fn replace(&mut self, state: StateFile) {
        self.staged = Some(state);
    }

    /// The state a persist should store, with a lineage assigned
    pub fn pending(&self) -> StateFile {
        let mut state = self.staged.as_ref().unwrap_or(&self.current).clone();
        state.ensure_lineage();
        state
    }

    /// Record a persisted state as the new durable snapshot
    pub fn commit(&mut self, state: StateFile) {
        self.current = state;
        self.staged = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockInfo;

    #[test]
    fn test_backend_error_locked() {
        let lock = LockInfo::new("persist", "bucket/key");
        let error = BackendError::locked(&lock);

        match &error {
            BackendError::Locked { holder } => {
                assert_eq!(holder.as_deref(), Some(&lock));
            }
            _ => panic!("Expected Locked error"),
        }
        assert!(error.to_string().contains(&lock.id));
        assert!(error.to_string().contains(&lock.who));
    }

    #[test]
    fn test_backend_error_display() {
        let error = BackendError::unsupported_backend("azure");
        assert_eq!(error.to_string(), "Unsupported backend type: azure");

        let error = BackendError::Locked { holder: None };
        assert_eq!(error.to_string(), "State is locked");

        let error = BackendError::Precondition("write");
        assert_eq!(error.to_string(), "write called before a successful read");
    }

    #[test]
    fn test_write_and_unlock_display_mentions_both() {
        let error = BackendError::WriteAndUnlock {
            write: Box::new(BackendError::Write("access denied".to_string())),
            unlock: Box::new(BackendError::Unlock("table unavailable".to_string())),
        };
        let message = error.to_string();
        assert!(message.contains("Failed to write state: access denied"));
        assert!(message.contains("Failed to release lock: table unavailable"));
    }

    #[test]
    fn test_into_unlock() {
        let error = BackendError::LockNotFound("abc".to_string()).into_unlock();
        assert_eq!(error.to_string(), "Failed to release lock: Lock not found: abc");

        let error = BackendError::Unlock("gone".to_string()).into_unlock();
        assert_eq!(error.to_string(), "Failed to release lock: gone");
    }

    #[test]
    fn test_session_rejects_foreign_lineage() {
        let mut session = Session::new("default", StateFile::with_lineage("a"));
        let result = session.stage(StateFile::with_lineage("b"));
        assert!(matches!(result, Err(BackendError::LineageMismatch { .. })));
        assert!(session.staged.is_none());

        session.stage(StateFile::with_lineage("a")).unwrap();
        assert!(session.staged.is_some());
    }

    #[test]
    fn test_session_replace_skips_lineage_check() {
        let mut session = Session::new("default", StateFile::with_lineage("a"));
        session.replace(StateFile::with_lineage("b"));
        assert_eq!(session.pending().lineage, "b");
    }

    #[test]
    fn test_session_pending_assigns_lineage() {
        let session = Session::new("default", StateFile::empty());
        let pending = session.pending();
        assert!(!pending.is_initial());
        // The cached snapshot itself is left untouched
        assert!(session.current.is_initial());
    }
}
