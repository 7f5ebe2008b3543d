//! S3 backend for state storage
//!
//! Each workspace is one object in the bucket. Persisting takes a lock in the
//! lock table for the duration of the write.

use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::{BackendError, BackendResult, ObjectStore, Session, StateBackend};
use crate::backends::aws::{DynamoLockTable, S3ObjectStore, load_sdk_config};
use crate::codec;
use crate::config::{BackendConfig, S3Config};
use crate::lock::{LockGuard, LockTable};
use crate::state::StateFile;
use crate::workspace::{self, DEFAULT_WORKSPACE, Warning};

/// Operation recorded in the lock while persisting
pub const PERSIST_OPERATION: &str = "persist";

/// S3-based state backend
pub struct S3Backend {
    config: S3Config,
    store: Arc<dyn ObjectStore>,
    locks: Arc<dyn LockTable>,
    session: Option<Session>,
    warnings: Vec<Warning>,
}

impl S3Backend {
    /// Create a new S3Backend from configuration
    pub async fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        Self::connect(S3Config::from_backend_config(config)?).await
    }

    /// Validate the settings and build the AWS clients.
    ///
    /// No request is sent until the first read.
    pub async fn connect(config: S3Config) -> BackendResult<Self> {
        config.validate()?;

        let sdk_config = load_sdk_config(&config).await;
        let store = S3ObjectStore::new(&sdk_config, &config);
        let locks = DynamoLockTable::new(&sdk_config, config.lock_table.clone());

        Self::with_transports(config, Arc::new(store), Arc::new(locks))
    }

    /// Create a backend on top of the given object store and lock table
    pub fn with_transports(
        config: S3Config,
        store: Arc<dyn ObjectStore>,
        locks: Arc<dyn LockTable>,
    ) -> BackendResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            store,
            locks,
            session: None,
            warnings: Vec::new(),
        })
    }

    /// Object key holding the state of a workspace
    pub fn object_key(&self, workspace: &str) -> String {
        if workspace == DEFAULT_WORKSPACE {
            self.config.key.clone()
        } else {
            format!(
                "{}/{}/{}",
                self.config.workspace_key_prefix, workspace, self.config.key
            )
        }
    }

    /// Lock-table key guarding an object
    pub fn lock_path(&self, object_key: &str) -> String {
        format!("{}/{}", self.config.bucket, object_key)
    }

    /// Release a lock left behind on a workspace, e.g. by a crashed process.
    ///
    /// The lock id must match the one currently held.
    pub async fn force_unlock(&self, workspace: &str, lock_id: &str) -> BackendResult<()> {
        workspace::validate_name(workspace)?;
        let path = self.lock_path(&self.object_key(workspace));
        log::warn!("Force-releasing lock {} on {}", lock_id, path);
        self.locks.release(&path, lock_id).await
    }
}

#[async_trait]
impl StateBackend for S3Backend {
    async fn read(&mut self, workspaces: &[&str]) -> BackendResult<StateFile> {
        self.warnings.clear();
        let (name, warning) = workspace::resolve(workspaces);
        if let Some(warning) = warning {
            log::warn!("{}", warning);
            self.warnings.push(warning);
        }
        workspace::validate_name(&name)?;

        let object_key = self.object_key(&name);
        let state = match self.store.get(&object_key).await? {
            Some(bytes) => codec::decode(&bytes)?.unwrap_or_default(),
            None => {
                log::debug!(
                    "No state at s3://{}/{}, starting a new lineage",
                    self.config.bucket,
                    object_key
                );
                StateFile::empty()
            }
        };

        self.session = Some(Session::new(name, state.clone()));
        Ok(state)
    }

    fn write(&mut self, state: StateFile) -> BackendResult<()> {
        self.session
            .as_mut()
            .ok_or(BackendError::Precondition("write"))?
            .stage(state)
    }

    fn force_write(&mut self, state: StateFile) -> BackendResult<()> {
        log::warn!(
            "Staging state with lineage {} without a lineage check",
            state.lineage
        );
        self.session
            .as_mut()
            .ok_or(BackendError::Precondition("write"))?
            .replace(state);
        Ok(())
    }

    async fn persist(&mut self) -> BackendResult<()> {
        let session = self
            .session
            .as_ref()
            .ok_or(BackendError::Precondition("persist"))?;
        let object_key = self.object_key(&session.workspace);
        let state = session.pending();
        let body = codec::encode(&state)?;

        let guard = LockGuard::acquire(
            Arc::clone(&self.locks),
            self.lock_path(&object_key),
            PERSIST_OPERATION,
        )
        .await?;

        let written = self.store.put(&object_key, body, self.config.encrypt).await;
        let released = guard.release().await.map_err(BackendError::into_unlock);

        match (written, released) {
            (Ok(()), released) => {
                log::debug!(
                    "Persisted state to s3://{}/{} (serial {})",
                    self.config.bucket,
                    object_key,
                    state.serial
                );
                if let Some(session) = self.session.as_mut() {
                    session.commit(state);
                }
                released
            }
            (Err(write), Ok(())) => Err(write),
            (Err(write), Err(unlock)) => Err(BackendError::WriteAndUnlock {
                write: Box::new(write),
                unlock: Box::new(unlock),
            }),
        }
    }

    fn workspace(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.workspace.as_str())
    }

    fn warnings(&self) -> &[Warning] {
        &self.warnings
    }
}
