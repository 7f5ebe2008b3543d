//! In-memory object store and lock table
//!
//! Useful for tests and for embedding the S3 backend's protocol without AWS.
//! Both types can be told to fail so that error paths can be exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::backend::{BackendError, BackendResult, ObjectStore};
use crate::lock::{LockInfo, LockTable};

/// An object as stored by [`MemoryObjectStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub encrypted: bool,
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    fail_puts: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an object directly
    pub fn insert(&self, key: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.objects().insert(
            key.into(),
            StoredObject {
                body: body.into(),
                encrypted: false,
            },
        );
    }

    /// Get a stored object
    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects().get(key).cloned()
    }

    /// Make subsequent puts fail
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        Ok(self.objects().get(key).map(|o| o.body.clone()))
    }

    async fn put(&self, key: &str, body: Vec<u8>, encrypt: bool) -> BackendResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(BackendError::Write(format!("put of {} rejected", key)));
        }
        self.objects().insert(
            key.to_string(),
            StoredObject {
                body,
                encrypted: encrypt,
            },
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryLockTable {
    locks: Mutex<HashMap<String, LockInfo>>,
    fail_releases: AtomicBool,
    release_attempts: AtomicUsize,
}

impl MemoryLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<String, LockInfo>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current holder of the lock on `path`
    pub fn holder(&self, path: &str) -> Option<LockInfo> {
        self.locks().get(path).cloned()
    }

    /// Number of locks currently held
    pub fn held(&self) -> usize {
        self.locks().len()
    }

    /// Make subsequent releases fail without removing the lock
    pub fn fail_releases(&self, fail: bool) {
        self.fail_releases.store(fail, Ordering::SeqCst);
    }

    /// Number of release calls seen so far
    pub fn release_attempts(&self) -> usize {
        self.release_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LockTable for MemoryLockTable {
    async fn acquire(&self, info: &LockInfo) -> BackendResult<String> {
        let mut locks = self.locks();
        if let Some(existing) = locks.get(&info.path) {
            return Err(BackendError::locked(existing));
        }
        locks.insert(info.path.clone(), info.clone());
        Ok(info.id.clone())
    }

    async fn release(&self, path: &str, lock_id: &str) -> BackendResult<()> {
        self.release_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_releases.load(Ordering::SeqCst) {
            return Err(BackendError::Unlock(format!(
                "release of {} on {} rejected",
                lock_id, path
            )));
        }

        let mut locks = self.locks();
        match locks.get(path) {
            None => Err(BackendError::LockNotFound(lock_id.to_string())),
            Some(existing) if existing.id != lock_id => Err(BackendError::LockMismatch {
                expected: lock_id.to_string(),
                actual: existing.id.clone(),
            }),
            Some(_) => {
                locks.remove(path);
                Ok(())
            }
        }
    }
}
