//! S3-backed blob store, served through a CDN domain.

use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::primitives::ByteStream;

use super::{BlobError, BlobStore, cdn_url};

#[derive(Debug, Clone)]
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    cdn_domain: String,
}

impl S3BlobStore {
    pub fn new(client: S3Client, bucket: impl Into<String>, cdn_domain: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            cdn_domain: cdn_domain.into(),
        }
    }

    /// Build a client from the ambient AWS configuration (env, profile, IMDS).
    pub async fn from_env(bucket: impl Into<String>, cdn_domain: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(S3Client::new(&config), bucket, cdn_domain)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, BlobError> {
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(bucket = %self.bucket, path = %path, error = %e, "S3 upload failed");
                BlobError::Upload {
                    path: path.to_string(),
                    message: e.to_string(),
                }
            })?;

        tracing::info!(bucket = %self.bucket, path = %path, size, "image uploaded");
        Ok(cdn_url(&self.cdn_domain, path))
    }
}
