//! Byte-blob storage for product images.

pub mod in_memory;
#[cfg(feature = "s3")]
pub mod s3;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use catalog_core::CatalogError;

pub use in_memory::InMemoryBlobStore;
#[cfg(feature = "s3")]
pub use s3::S3BlobStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlobError {
    #[error("blob upload failed for {path}: {message}")]
    Upload { path: String, message: String },
}

impl From<BlobError> for CatalogError {
    fn from(value: BlobError) -> Self {
        CatalogError::upstream("blob store", value.to_string())
    }
}

/// Blob storage returning a stable retrieval URL per object.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, BlobError>;
}

#[async_trait]
impl<B> BlobStore for std::sync::Arc<B>
where
    B: BlobStore + ?Sized,
{
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, BlobError> {
        (**self).put(path, bytes, content_type).await
    }
}

/// Object path for a new product image: `product/{uuid}{ext}`.
///
/// Every upload gets a fresh name; replaced images are never overwritten.
pub fn image_object_path(extension: &str) -> String {
    format!("product/{}{}", Uuid::new_v4(), extension)
}

/// Public URL of an object served through the CDN.
pub fn cdn_url(cdn_domain: &str, path: &str) -> String {
    format!("https://{}/{}", cdn_domain.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_paths_are_unique_and_keep_extension() {
        let a = image_object_path(".png");
        let b = image_object_path(".png");
        assert_ne!(a, b);
        assert!(a.starts_with("product/"));
        assert!(a.ends_with(".png"));
    }

    #[test]
    fn cdn_url_joins_domain_and_path() {
        assert_eq!(
            cdn_url("cdn.example.com/", "product/x.png"),
            "https://cdn.example.com/product/x.png"
        );
    }
}
