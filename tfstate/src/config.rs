//! Backend configuration
//!
//! [`BackendConfig`] is the untyped form (a backend type plus an attribute
//! map) as read from a config file. [`LocalConfig`] and [`S3Config`] are the
//! validated, typed settings of each backend and convert back to the map with
//! an explicit list of exported attributes.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::backend::{BackendError, BackendResult};

/// Configuration for a state backend
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BackendConfig {
    /// Backend type (e.g., "s3", "local")
    #[serde(rename = "backend")]
    pub backend_type: String,
    /// Backend-specific attributes
    #[serde(flatten)]
    pub attributes: HashMap<String, Value>,
}

impl BackendConfig {
    /// Create an empty configuration for a backend type
    pub fn new(backend_type: impl Into<String>) -> Self {
        Self {
            backend_type: backend_type.into(),
            attributes: HashMap::new(),
        }
    }

    /// Set an attribute
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Parse a TOML document such as
    ///
    /// ```toml
    /// backend = "s3"
    /// bucket = "my-state"
    /// key = "prod.tfstate"
    /// ```
    pub fn from_toml_str(content: &str) -> BackendResult<Self> {
        toml::from_str(content)
            .map_err(|e| BackendError::configuration(format!("Invalid backend config: {}", e)))
    }

    /// Load a TOML configuration file
    pub fn from_file(path: &Path) -> BackendResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BackendError::configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Get a string attribute. Empty strings count as unset.
    pub fn get_string(&self, key: &str) -> BackendResult<Option<String>> {
        match self.attributes.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(BackendError::configuration(format!(
                "Attribute {} must be a string, got {}",
                key, other
            ))),
        }
    }

    /// Get a string attribute that must be set
    pub fn require_string(&self, key: &str) -> BackendResult<String> {
        self.get_string(key)?.ok_or_else(|| {
            BackendError::configuration(format!("Missing required attribute: {}", key))
        })
    }

    /// Get a boolean attribute with a default value
    pub fn get_bool_or(&self, key: &str, default: bool) -> BackendResult<bool> {
        match self.attributes.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(BackendError::configuration(format!(
                "Attribute {} must be a boolean, got {}",
                key, other
            ))),
        }
    }

    fn expect_type(&self, backend_type: &str) -> BackendResult<()> {
        if self.backend_type == backend_type {
            Ok(())
        } else {
            Err(BackendError::configuration(format!(
                "Expected a {} backend config, got {:?}",
                backend_type, self.backend_type
            )))
        }
    }
}

/// Settings of the local file backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConfig {
    /// File the state is read from
    pub path: PathBuf,
    /// File the state is persisted to, if different from `path`
    pub persist_path: Option<PathBuf>,
}

impl LocalConfig {
    /// Backend type name
    pub const TYPE: &'static str = "local";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            persist_path: None,
        }
    }

    /// Persist to a different file than the one read from
    pub fn with_persist_path(mut self, persist_path: impl Into<PathBuf>) -> Self {
        self.persist_path = Some(persist_path.into());
        self
    }

    /// The file persist writes to
    pub fn output_path(&self) -> &Path {
        self.persist_path.as_deref().unwrap_or(&self.path)
    }

    pub fn from_backend_config(config: &BackendConfig) -> BackendResult<Self> {
        config.expect_type(Self::TYPE)?;

        let path = config.require_string("path")?;
        let persist_path = config.get_string("persist_path")?.map(PathBuf::from);

        Ok(Self {
            path: PathBuf::from(path),
            persist_path,
        })
    }

    pub fn to_backend_config(&self) -> BackendConfig {
        let mut config =
            BackendConfig::new(Self::TYPE).with("path", self.path.to_string_lossy().into_owned());
        if let Some(persist_path) = &self.persist_path {
            config = config.with("persist_path", persist_path.to_string_lossy().into_owned());
        }
        config
    }
}

/// Settings of the S3 backend
#[derive(Clone, PartialEq, Eq)]
pub struct S3Config {
    pub region: String,
    pub bucket: String,
    /// Object key of the default workspace's state
    pub key: String,
    /// DynamoDB table holding state locks
    pub lock_table: String,
    /// Request server-side encryption for written state
    pub encrypt: bool,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Role to assume for all requests
    pub role_arn: Option<String>,
    /// Prefix of the object keys of non-default workspaces
    pub workspace_key_prefix: String,
    /// Custom endpoint for S3-compatible stores
    pub endpoint: Option<String>,
}

impl S3Config {
    /// Backend type name
    pub const TYPE: &'static str = "s3";
    pub const DEFAULT_WORKSPACE_KEY_PREFIX: &'static str = "env:";

    pub fn new(
        region: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        lock_table: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            bucket: bucket.into(),
            key: key.into(),
            lock_table: lock_table.into(),
            encrypt: false,
            access_key: None,
            secret_key: None,
            role_arn: None,
            workspace_key_prefix: Self::DEFAULT_WORKSPACE_KEY_PREFIX.to_string(),
            endpoint: None,
        }
    }

    pub fn with_encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }

    pub fn with_static_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    pub fn with_role_arn(mut self, role_arn: impl Into<String>) -> Self {
        self.role_arn = Some(role_arn.into());
        self
    }

    /// Check that all required settings are present and consistent
    pub fn validate(&self) -> BackendResult<()> {
        for (name, value) in [
            ("region", &self.region),
            ("bucket", &self.bucket),
            ("key", &self.key),
            ("lock_table", &self.lock_table),
            ("workspace_key_prefix", &self.workspace_key_prefix),
        ] {
            if value.is_empty() {
                return Err(BackendError::configuration(format!(
                    "Missing required attribute: {}",
                    name
                )));
            }
        }

        if self.key.starts_with('/') || self.key.ends_with('/') {
            return Err(BackendError::configuration(
                "Attribute key must not start or end with '/'",
            ));
        }

        match (&self.access_key, &self.secret_key) {
            (Some(_), None) => Err(BackendError::configuration(
                "access_key is set but secret_key is missing",
            )),
            (None, Some(_)) => Err(BackendError::configuration(
                "secret_key is set but access_key is missing",
            )),
            _ => Ok(()),
        }
    }

    pub fn from_backend_config(config: &BackendConfig) -> BackendResult<Self> {
        config.expect_type(Self::TYPE)?;

        let s3 = Self {
            region: config.require_string("region")?,
            bucket: config.require_string("bucket")?,
            key: config.require_string("key")?,
            lock_table: config.require_string("lock_table")?,
            encrypt: config.get_bool_or("encrypt", false)?,
            access_key: config.get_string("access_key")?,
            secret_key: config.get_string("secret_key")?,
            role_arn: config.get_string("role_arn")?,
            workspace_key_prefix: config
                .get_string("workspace_key_prefix")?
                .unwrap_or_else(|| Self::DEFAULT_WORKSPACE_KEY_PREFIX.to_string()),
            endpoint: config.get_string("endpoint")?,
        };
        s3.validate()?;
        Ok(s3)
    }

    /// Export the settings as a backend config. Unset optional settings are
    /// left out of the map.
    pub fn to_backend_config(&self) -> BackendConfig {
        let mut config = BackendConfig::new(Self::TYPE)
            .with("region", self.region.clone())
            .with("bucket", self.bucket.clone())
            .with("key", self.key.clone())
            .with("lock_table", self.lock_table.clone())
            .with("encrypt", self.encrypt)
            .with("workspace_key_prefix", self.workspace_key_prefix.clone());

        for (name, value) in [
            ("access_key", &self.access_key),
            ("secret_key", &self.secret_key),
            ("role_arn", &self.role_arn),
            ("endpoint", &self.endpoint),
        ] {
            if let Some(value) = value {
                config = config.with(name, value.clone());
            }
        }
        config
    }
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("lock_table", &self.lock_table)
            .field("encrypt", &self.encrypt)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("role_arn", &self.role_arn)
            .field("workspace_key_prefix", &self.workspace_key_prefix)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn s3_config() -> BackendConfig {
        BackendConfig::new("s3")
            .with("region", "us-west-2")
            .with("bucket", "state-bucket")
            .with("key", "prod.tfstate")
            .with("lock_table", "state-locks")
    }

    fn keys(config: &BackendConfig) -> BTreeSet<&str> {
        config.attributes.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_s3_from_backend_config() {
        let config = S3Config::from_backend_config(&s3_config().with("encrypt", true)).unwrap();
        assert_eq!(config.region, "us-west-2");
        assert_eq!(config.bucket, "state-bucket");
        assert_eq!(config.key, "prod.tfstate");
        assert_eq!(config.lock_table, "state-locks");
        assert!(config.encrypt);
        assert_eq!(config.workspace_key_prefix, "env:");
        assert!(config.access_key.is_none());
    }

    #[test]
    fn test_s3_missing_required_attribute() {
        let mut config = s3_config();
        config.attributes.remove("lock_table");

        let err = S3Config::from_backend_config(&config).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Backend configuration error: Missing required attribute: lock_table"
        );
    }

    #[test]
    fn test_s3_empty_string_is_missing() {
        let err = S3Config::from_backend_config(&s3_config().with("bucket", "")).unwrap_err();
        assert!(matches!(err, BackendError::Configuration(_)));
    }

    #[test]
    fn test_s3_wrong_attribute_type() {
        let err =
            S3Config::from_backend_config(&s3_config().with("encrypt", "yes")).unwrap_err();
        assert!(err.to_string().contains("encrypt must be a boolean"));
    }

    #[test]
    fn test_s3_credentials_must_be_paired() {
        let err = S3Config::from_backend_config(&s3_config().with("access_key", "AKIA"))
            .unwrap_err();
        assert!(err.to_string().contains("secret_key is missing"));
    }

    #[test]
    fn test_wrong_backend_type() {
        let err = LocalConfig::from_backend_config(&s3_config()).unwrap_err();
        assert!(matches!(err, BackendError::Configuration(_)));
    }

    #[test]
    fn test_s3_export_leaves_out_unset_fields() {
        let exported = S3Config::new("us-west-2", "bucket", "key", "locks").to_backend_config();
        assert_eq!(exported.backend_type, "s3");
        assert_eq!(
            keys(&exported),
            BTreeSet::from([
                "region",
                "bucket",
                "key",
                "lock_table",
                "encrypt",
                "workspace_key_prefix",
            ])
        );
    }

    #[test]
    fn test_s3_export_includes_set_fields() {
        let config = S3Config::new("us-west-2", "bucket", "key", "locks")
            .with_encrypt(true)
            .with_static_credentials("AKIA", "secret")
            .with_role_arn("arn:aws:iam::123456789012:role/state");
        let exported = config.to_backend_config();

        assert_eq!(exported.attributes["encrypt"], Value::Bool(true));
        assert_eq!(exported.attributes["access_key"], Value::from("AKIA"));
        assert_eq!(exported.attributes["secret_key"], Value::from("secret"));
        assert_eq!(
            exported.attributes["role_arn"],
            Value::from("arn:aws:iam::123456789012:role/state")
        );
        assert!(!exported.attributes.contains_key("endpoint"));
        assert_eq!(S3Config::from_backend_config(&exported).unwrap(), config);
    }

    #[test]
    fn test_s3_debug_redacts_secret() {
        let config = S3Config::new("us-west-2", "bucket", "key", "locks")
            .with_static_credentials("AKIA", "very-secret");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_local_requires_path() {
        let err = LocalConfig::from_backend_config(&BackendConfig::new("local")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Backend configuration error: Missing required attribute: path"
        );

        let config =
            LocalConfig::from_backend_config(&BackendConfig::new("local").with("path", "a.state"))
                .unwrap();
        assert_eq!(config.path, PathBuf::from("a.state"));
        assert_eq!(config.output_path(), Path::new("a.state"));
    }

    #[test]
    fn test_local_export() {
        let config = LocalConfig::new("a.state");
        assert_eq!(
            keys(&config.to_backend_config()),
            BTreeSet::from(["path"])
        );

        let config = config.with_persist_path("b.state");
        assert_eq!(config.output_path(), Path::new("b.state"));
        assert_eq!(
            keys(&config.to_backend_config()),
            BTreeSet::from(["path", "persist_path"])
        );
    }

    #[test]
    fn test_from_toml_str() {
        let config = BackendConfig::from_toml_str(
            r#"
            backend = "s3"
            region = "eu-west-1"
            bucket = "state"
            key = "net.tfstate"
            lock_table = "locks"
            encrypt = true
            "#,
        )
        .unwrap();

        assert_eq!(config.backend_type, "s3");
        let s3 = S3Config::from_backend_config(&config).unwrap();
        assert!(s3.encrypt);
        assert_eq!(s3.region, "eu-west-1");
    }

    #[test]
    fn test_from_toml_str_requires_backend() {
        let err = BackendConfig::from_toml_str("path = \"x\"").unwrap_err();
        assert!(matches!(err, BackendError::Configuration(_)));
    }
}
