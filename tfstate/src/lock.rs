//! Lock information and scoped lock acquisition

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{BackendError, BackendResult};

/// Information about a state lock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique identifier for this lock
    pub id: String,
    /// The operation being performed (e.g., "persist", "push")
    pub operation: String,
    /// Who acquired the lock (username@hostname)
    pub who: String,
    /// When the lock was created
    pub created: DateTime<Utc>,
    /// Lock-table key the lock is held on (bucket/object key)
    pub path: String,
}

impl LockInfo {
    /// Create a new lock for an operation on a lock-table key
    pub fn new(operation: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            who: get_lock_owner(),
            created: Utc::now(),
            path: path.into(),
        }
    }
}

/// Get the lock owner string (username@hostname)
fn get_lock_owner() -> String {
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{}@{}", username, hostname)
}

/// A mutual-exclusion table keyed by lock path
#[async_trait]
pub trait LockTable: Send + Sync {
    /// Create the entry for `info.path`.
    ///
    /// Returns the lock id on success. Fails with `BackendError::Locked` if
    /// another holder already owns the path.
    async fn acquire(&self, info: &LockInfo) -> BackendResult<String>;

    /// Delete the entry for `path` if it is held under `lock_id`
    async fn release(&self, path: &str, lock_id: &str) -> BackendResult<()>;
}

/// A held lock. Release it with [`LockGuard::release`]; a guard dropped
/// without being released (early return, panic, or a cancelled future)
/// releases the lock on a background task of the current tokio runtime.
pub struct LockGuard {
    table: Arc<dyn LockTable>,
    info: LockInfo,
    lock_id: Option<String>,
}

impl LockGuard {
    /// Acquire the lock for `path` on behalf of `operation`
    pub async fn acquire(
        table: Arc<dyn LockTable>,
        path: impl Into<String>,
        operation: &str,
    ) -> BackendResult<Self> {
        let info = LockInfo::new(operation, path);
        let lock_id = table.acquire(&info).await?;
        log::debug!("Acquired lock {} on {}", lock_id, info.path);

        Ok(Self {
            table,
            info,
            lock_id: Some(lock_id),
        })
    }

    /// Information recorded for this lock
    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Lock id returned by the table
    pub fn lock_id(&self) -> Option<&str> {
        self.lock_id.as_deref()
    }

    /// Release the lock, reporting any failure to do so.
    ///
    /// The release runs as its own task and is attempted exactly once: if
    /// the caller is cancelled while waiting, the release still completes.
    pub async fn release(mut self) -> BackendResult<()> {
        let Some(lock_id) = self.lock_id.take() else {
            return Ok(());
        };

        let table = Arc::clone(&self.table);
        let path = self.info.path.clone();
        let task = tokio::spawn(async move {
            let result = table.release(&path, &lock_id).await;
            if result.is_ok() {
                log::debug!("Released lock {} on {}", lock_id, path);
            }
            result
        });

        task.await
            .map_err(|e| BackendError::Unlock(format!("Release task failed: {}", e)))?
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(lock_id) = self.lock_id.take() else {
            return;
        };
        let path = self.info.path.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                log::warn!(
                    "Releasing lock {} on {} after an interrupted operation",
                    lock_id,
                    path
                );
                let table = Arc::clone(&self.table);
                handle.spawn(async move {
                    if let Err(e) = table.release(&path, &lock_id).await {
                        log::error!("Failed to release lock {} on {}: {}", lock_id, path, e);
                    }
                });
            }
            Err(_) => {
                log::error!(
                    "Lock {} on {} was not released: no async runtime available",
                    lock_id,
                    path
                );
            }
        }
    }
}
