//! Ships the staging file to R2 (or any S3-compatible store).

use std::path::Path;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use backup_core::UploadError;
use tracing::{debug, info};

use crate::config::RemoteConfig;

#[async_trait]
pub trait Replicator: Send + Sync {
    /// Single put of the whole file at `key`, replacing whatever was there.
    async fn upload(&self, local_path: &Path, bucket: &str, key: &str) -> Result<(), UploadError>;
}

#[derive(Clone, Debug)]
pub struct S3Replicator {
    client: Client,
}

impl S3Replicator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// R2 client with static credentials and the `auto` region.
    pub async fn connect(remote: &RemoteConfig) -> Self {
        let credentials = Credentials::new(
            remote.access_key_id.clone(),
            remote.access_key_secret.clone(),
            None,
            None,
            "static",
        );
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new("auto"))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config).endpoint_url(remote.endpoint());
        // explicit endpoints are usually MinIO and friends
        if remote.endpoint_url.is_some() {
            s3_config = s3_config.force_path_style(true);
        }

        info!(endpoint = %remote.endpoint(), bucket = %remote.bucket, "object store client ready");
        Self::new(Client::from_conf(s3_config.build()))
    }
}

#[async_trait]
impl Replicator for S3Replicator {
    async fn upload(&self, local_path: &Path, bucket: &str, key: &str) -> Result<(), UploadError> {
        let local_err = |e: Box<dyn std::error::Error + Send + Sync>| UploadError::LocalReadError {
            path: local_path.to_path_buf(),
            cause: e,
        };

        let size = tokio::fs::metadata(local_path)
            .await
            .map_err(|e| local_err(Box::new(e)))?
            .len();
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| local_err(Box::new(e)))?;

        debug!(bucket, key, size, "uploading snapshot");
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| UploadError::RemoteWriteError {
                bucket: bucket.to_string(),
                key: key.to_string(),
                cause: Box::new(e),
            })?;

        info!(bucket, key, size, "snapshot uploaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::retry::RetryConfig;
    use tempfile::tempdir;

    // Nothing listens on port 1, so any request fails fast at connect.
    fn unreachable_client() -> Client {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("auto"))
            .credentials_provider(Credentials::new("AKID", "SECRET", None, None, "test"))
            .endpoint_url("http://127.0.0.1:1")
            .force_path_style(true)
            .retry_config(RetryConfig::disabled())
            .build();
        Client::from_conf(config)
    }

    #[tokio::test]
    async fn missing_local_file_is_a_local_error() {
        let dir = tempdir().unwrap();
        let err = S3Replicator::new(unreachable_client())
            .upload(&dir.path().join("absent.db3"), "bucket", "backup.db3")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::LocalReadError { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn transport_failure_is_a_remote_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup.db3");
        std::fs::write(&path, b"snapshot").unwrap();

        let err = S3Replicator::new(unreachable_client())
            .upload(&path, "bucket", "backup.db3")
            .await
            .unwrap_err();
        match err {
            UploadError::RemoteWriteError { bucket, key, .. } => {
                assert_eq!(bucket, "bucket");
                assert_eq!(key, "backup.db3");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"snapshot");
    }
}
