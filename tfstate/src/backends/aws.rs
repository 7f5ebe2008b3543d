//! AWS transports for the S3 backend: S3 for state objects and a DynamoDB
//! table for locks.
//!
//! The lock table uses the same layout as Terraform's S3 backend: a string
//! hash key `LockID` holding `bucket/key`, and an `Info` attribute with the
//! JSON-encoded [`LockInfo`].

use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ServerSideEncryption;

use crate::backend::{BackendError, BackendResult, ObjectStore};
use crate::config::S3Config;
use crate::lock::{LockInfo, LockTable};

const LOCK_ID_ATTR: &str = "LockID";
const INFO_ATTR: &str = "Info";
const SESSION_NAME: &str = "tfstate";

/// Load the shared AWS configuration for a backend.
///
/// Static keys take precedence over the default credential chain; a role ARN
/// is assumed on top of whichever credentials were found.
pub async fn load_sdk_config(config: &S3Config) -> SdkConfig {
    let region = Region::new(config.region.clone());

    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region.clone());
    if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
        loader = loader.credentials_provider(Credentials::new(
            access_key,
            secret_key,
            None,
            None,
            "tfstate-static",
        ));
    }
    let base = loader.load().await;

    let Some(role_arn) = &config.role_arn else {
        return base;
    };

    let provider = aws_config::sts::AssumeRoleProvider::builder(role_arn)
        .session_name(SESSION_NAME)
        .configure(&base)
        .build()
        .await;

    aws_config::defaults(BehaviorVersion::latest())
        .region(region)
        .credentials_provider(provider)
        .load()
        .await
}

/// Classify an SDK failure: transport problems are connection errors,
/// everything else is reported as `kind`.
fn classify<E, R>(err: SdkError<E, R>, kind: fn(String) -> BackendError) -> BackendError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => BackendError::Connect(message),
        _ => kind(message),
    }
}

/// State objects in an S3 bucket
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(sdk_config: &SdkConfig, config: &S3Config) -> Self {
        let mut builder = aws_sdk_s3::config::Builder::from(sdk_config);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let body = output.body.collect().await.map_err(|e| {
                    BackendError::Refresh(format!(
                        "Failed to read s3://{}/{}: {}",
                        self.bucket, key, e
                    ))
                })?;
                Ok(Some(body.into_bytes().to_vec()))
            }
            // A missing bucket is an error, only a missing key means no state yet
            Err(err) if err.as_service_error().is_some_and(GetObjectError::is_no_such_key) => {
                Ok(None)
            }
            Err(err) => Err(classify(err, BackendError::Refresh)),
        }
    }

    async fn put(&self, key: &str, body: Vec<u8>, encrypt: bool) -> BackendResult<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type("application/json");

        if encrypt {
            request = request.server_side_encryption(ServerSideEncryption::Aes256);
        }

        request
            .send()
            .await
            .map_err(|e| classify(e, BackendError::Write))?;

        Ok(())
    }
}

/// Locks stored in a DynamoDB table
pub struct DynamoLockTable {
    client: aws_sdk_dynamodb::Client,
    table: String,
}

impl DynamoLockTable {
    pub fn new(sdk_config: &SdkConfig, table: impl Into<String>) -> Self {
        Self {
            client: aws_sdk_dynamodb::Client::new(sdk_config),
            table: table.into(),
        }
    }

    /// Read the lock currently held on `path`
    async fn read_lock(&self, path: &str) -> BackendResult<Option<LockInfo>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key(LOCK_ID_ATTR, AttributeValue::S(path.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| classify(e, BackendError::Lock))?;

        let Some(info) = output.item().and_then(|item| item.get(INFO_ATTR)) else {
            return Ok(None);
        };
        let info = info
            .as_s()
            .map_err(|_| BackendError::Lock(format!("Lock entry for {} has no Info string", path)))?;

        serde_json::from_str(info)
            .map(Some)
            .map_err(|e| BackendError::Lock(format!("Invalid lock entry for {}: {}", path, e)))
    }
}

#[async_trait]
impl LockTable for DynamoLockTable {
    async fn acquire(&self, info: &LockInfo) -> BackendResult<String> {
        let body = serde_json::to_string(info)
            .map_err(|e| BackendError::Lock(format!("Failed to encode lock: {}", e)))?;

        let result = self
            .client
            .put_item()
            .table_name(&self.table)
            .item(LOCK_ID_ATTR, AttributeValue::S(info.path.clone()))
            .item(INFO_ATTR, AttributeValue::S(body))
            .condition_expression("attribute_not_exists(LockID)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(info.id.clone()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception()) =>
            {
                // The holder is informational; a failed lookup still reports the conflict.
                let holder = self.read_lock(&info.path).await.ok().flatten();
                Err(BackendError::Locked {
                    holder: holder.map(Box::new),
                })
            }
            Err(err) => Err(classify(err, BackendError::Lock)),
        }
    }

    async fn release(&self, path: &str, lock_id: &str) -> BackendResult<()> {
        // The id check and the delete are one conditional request, so a lock
        // taken over by someone else in the meantime is never deleted.
        let result = self
            .client
            .delete_item()
            .table_name(&self.table)
            .key(LOCK_ID_ATTR, AttributeValue::S(path.to_string()))
            .condition_expression("attribute_exists(LockID) AND contains(Info, :lock_id)")
            .expression_attribute_values(":lock_id", AttributeValue::S(id_marker(lock_id)))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception()) =>
            {
                let existing = self.read_lock(path).await.map_err(BackendError::into_unlock)?;
                Err(release_failure(lock_id, existing))
            }
            Err(err) => Err(classify(err, BackendError::Unlock)),
        }
    }
}

/// The fragment of the JSON-encoded `Info` attribute that names a lock id
fn id_marker(lock_id: &str) -> String {
    format!("\"id\":{}", serde_json::Value::from(lock_id))
}

/// Explain why a conditional release found nothing to delete
fn release_failure(lock_id: &str, existing: Option<LockInfo>) -> BackendError {
    match existing {
        None => BackendError::LockNotFound(lock_id.to_string()),
        Some(lock) => BackendError::LockMismatch {
            expected: lock_id.to_string(),
            actual: lock.id,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_transport_failure_as_connect() {
        let err: SdkError<GetObjectError> = SdkError::timeout_error("request timed out");
        assert!(matches!(
            classify(err, BackendError::Refresh),
            BackendError::Connect(_)
        ));
    }

    #[test]
    fn test_classify_other_failures_as_operation_error() {
        let err: SdkError<GetObjectError> = SdkError::construction_failure("bad request");
        assert!(matches!(
            classify(err, BackendError::Write),
            BackendError::Write(_)
        ));
    }

    #[test]
    fn test_id_marker_matches_stored_info() {
        let lock = LockInfo::new("persist", "bucket/key");
        let stored = serde_json::to_string(&lock).unwrap();
        assert!(stored.contains(&id_marker(&lock.id)));

        let other = LockInfo::new("persist", "bucket/key");
        assert!(!stored.contains(&id_marker(&other.id)));
    }

    #[test]
    fn test_release_failure() {
        assert!(matches!(
            release_failure("abc", None),
            BackendError::LockNotFound(id) if id == "abc"
        ));

        let holder = LockInfo::new("apply", "bucket/key");
        match release_failure("abc", Some(holder.clone())) {
            BackendError::LockMismatch { expected, actual } => {
                assert_eq!(expected, "abc");
                assert_eq!(actual, holder.id);
            }
            other => panic!("Expected LockMismatch error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_object_store_keeps_bucket() {
        let config = S3Config::new("us-west-2", "state-bucket", "prod.tfstate", "locks");
        let sdk_config = load_sdk_config(&config).await;
        let store = S3ObjectStore::new(&sdk_config, &config);
        assert_eq!(store.bucket, "state-bucket");
        assert_eq!(sdk_config.region().map(|r| r.as_ref()), Some("us-west-2"));
    }
}
