//! Backend implementations for state storage

pub mod aws;
mod local;
pub mod memory;
mod s3;

pub use local::LocalBackend;
pub use s3::{PERSIST_OPERATION, S3Backend};

use async_trait::async_trait;

use crate::backend::{BackendError, BackendResult, StateBackend};
use crate::config::{BackendConfig, LocalConfig, S3Config};
use crate::state::StateFile;
use crate::workspace::Warning;

/// A configured state backend of any supported kind
pub enum Backend {
    Local(LocalBackend),
    S3(S3Backend),
}

/// Create a backend from configuration
///
/// This function dispatches to the appropriate backend implementation
/// based on the backend_type in the configuration.
pub async fn create_backend(config: &BackendConfig) -> BackendResult<Backend> {
    match config.backend_type.as_str() {
        LocalConfig::TYPE => Ok(Backend::Local(LocalBackend::from_config(config)?)),
        S3Config::TYPE => Ok(Backend::S3(S3Backend::from_config(config).await?)),
        other => Err(BackendError::unsupported_backend(other)),
    }
}

impl Backend {
    /// Backend type name
    pub fn backend_type(&self) -> &'static str {
        match self {
            Backend::Local(_) => LocalConfig::TYPE,
            Backend::S3(_) => S3Config::TYPE,
        }
    }
}

#[async_trait]
impl StateBackend for Backend {
    async fn read(&mut self, workspaces: &[&str]) -> BackendResult<StateFile> {
        match self {
            Backend::Local(backend) => backend.read(workspaces).await,
            Backend::S3(backend) => backend.read(workspaces).await,
        }
    }

    fn write(&mut self, state: StateFile) -> BackendResult<()> {
        match self {
            Backend::Local(backend) => backend.write(state),
            Backend::S3(backend) => backend.write(state),
        }
    }

    fn force_write(&mut self, state: StateFile) -> BackendResult<()> {
        match self {
            Backend::Local(backend) => backend.force_write(state),
            Backend::S3(backend) => backend.force_write(state),
        }
    }

    async fn persist(&mut self) -> BackendResult<()> {
        match self {
            Backend::Local(backend) => backend.persist().await,
            Backend::S3(backend) => backend.persist().await,
        }
    }

    fn workspace(&self) -> Option<&str> {
        match self {
            Backend::Local(backend) => backend.workspace(),
            Backend::S3(backend) => backend.workspace(),
        }
    }

    fn warnings(&self) -> &[Warning] {
        match self {
            Backend::Local(backend) => backend.warnings(),
            Backend::S3(backend) => backend.warnings(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_backend() {
        let config = BackendConfig::new("unsupported");

        let result = create_backend(&config).await;
        if let Err(BackendError::UnsupportedBackend(name)) = result {
            assert_eq!(name, "unsupported");
        } else {
            panic!("Expected UnsupportedBackend error");
        }
    }

    #[tokio::test]
    async fn test_create_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.tfstate");
        let config = BackendConfig::new("local").with("path", path.to_string_lossy().into_owned());

        let mut backend = create_backend(&config).await.unwrap();
        assert_eq!(backend.backend_type(), "local");
        assert!(backend.read(&[]).await.unwrap().is_initial());
    }

    #[tokio::test]
    async fn test_create_s3_backend_validates_first() {
        let config = BackendConfig::new("s3").with("bucket", "state");

        let result = create_backend(&config).await;
        assert!(matches!(result, Err(BackendError::Configuration(_))));
    }
}
