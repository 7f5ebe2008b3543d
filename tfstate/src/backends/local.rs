//! Local file backend for state storage
//!
//! State is read from one file and persisted either back to it or to a
//! separate output file. There is no locking: a single writer is assumed.

use async_trait::async_trait;
use std::path::Path;

use crate::backend::{BackendError, BackendResult, Session, StateBackend};
use crate::codec;
use crate::config::{BackendConfig, LocalConfig};
use crate::state::StateFile;
use crate::workspace::{DEFAULT_WORKSPACE, Warning};

/// Local file backend for development and simple use cases
pub struct LocalBackend {
    config: LocalConfig,
    session: Option<Session>,
    warnings: Vec<Warning>,
}

impl LocalBackend {
    pub fn new(config: LocalConfig) -> Self {
        Self {
            config,
            session: None,
            warnings: Vec::new(),
        }
    }

    /// Create a LocalBackend reading and persisting a single file
    pub fn with_path(path: impl Into<std::path::PathBuf>) -> Self {
        Self::new(LocalConfig::new(path))
    }

    /// Create a LocalBackend from configuration
    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        Ok(Self::new(LocalConfig::from_backend_config(config)?))
    }

    /// Get the state file path
    pub fn state_path(&self) -> &Path {
        &self.config.path
    }

    /// Get the path persist writes to
    pub fn output_path(&self) -> &Path {
        self.config.output_path()
    }

    fn read_file(&self) -> BackendResult<StateFile> {
        let path = self.state_path();
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StateFile::empty()),
            Err(e) => {
                return Err(BackendError::Refresh(format!(
                    "Failed to read state file {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        Ok(codec::decode(&bytes)?.unwrap_or_default())
    }

    fn write_file(&self, state: &StateFile) -> BackendResult<()> {
        let path = self.output_path();
        let content = codec::encode(state)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                BackendError::Write(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        std::fs::write(path, content).map_err(|e| {
            BackendError::Write(format!(
                "Failed to write state file {}: {}",
                path.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl StateBackend for LocalBackend {
    async fn read(&mut self, workspaces: &[&str]) -> BackendResult<StateFile> {
        self.warnings.clear();
        if workspaces.iter().any(|name| *name != DEFAULT_WORKSPACE) {
            let warning = Warning::WorkspacesUnsupported {
                requested: workspaces.iter().map(|s| s.to_string()).collect(),
            };
            log::warn!("{}", warning);
            self.warnings.push(warning);
        }

        let state = self.read_file()?;
        log::debug!(
            "Read state from {} (serial {})",
            self.state_path().display(),
            state.serial
        );
        self.session = Some(Session::new(DEFAULT_WORKSPACE, state.clone()));
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
        let state = self
            .session
            .as_ref()
            .ok_or(BackendError::Precondition("persist"))?
            .pending();

        self.write_file(&state)?;
        log::debug!(
            "Persisted state to {} (serial {})",
            self.output_path().display(),
            state.serial
        );

        if let Some(session) = self.session.as_mut() {
            session.commit(state);
        }
        Ok(())
    }

    fn workspace(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.workspace.as_str())
    }

    fn warnings(&self) -> &[Warning] {
        &self.warnings
    }
}
