//! Infrastructure state storage
//!
//! This crate reads, stages and persists an infrastructure state document
//! through one contract, whether the state lives in a local file or in S3
//! guarded by a DynamoDB lock table.
//!
//! # Overview
//!
//! - **StateFile**: the versioned state snapshot
//! - **StateBackend**: the Read/Write/Persist contract
//! - **Backend**: the closed set of backends (local, s3)
//! - **LockInfo** / **LockGuard**: locks held while persisting remote state
//!
//! # Example
//!
//! ```no_run
//! use tfstate::{BackendConfig, StateBackend, create_backend};
//!
//! # async fn run() -> tfstate::BackendResult<()> {
//! let config = BackendConfig::new("s3")
//!     .with("region", "us-west-2")
//!     .with("bucket", "my-state-bucket")
//!     .with("key", "prod.tfstate")
//!     .with("lock_table", "state-locks")
//!     .with("encrypt", true);
//!
//! let mut backend = create_backend(&config).await?;
//!
//! let mut state = backend.read(&[]).await?;
//! state.increment_serial();
//! backend.write(state)?;
//!
//! // Locks, writes and unlocks
//! backend.persist().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod backends;
pub mod codec;
pub mod config;
pub mod lock;
pub mod state;
pub mod workspace;

// Re-export main types for convenience
pub use backend::{BackendError, BackendResult, ObjectStore, StateBackend};
pub use backends::{Backend, LocalBackend, S3Backend, create_backend};
pub use config::{BackendConfig, LocalConfig, S3Config};
pub use lock::{LockGuard, LockInfo, LockTable};
pub use state::StateFile;
pub use workspace::{DEFAULT_WORKSPACE, Warning};
