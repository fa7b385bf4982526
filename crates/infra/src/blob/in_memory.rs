use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::{BlobError, BlobStore, cdn_url};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// In-memory blob store for tests/dev. URLs point at a fake CDN domain.
#[derive(Debug)]
pub struct InMemoryBlobStore {
    cdn_domain: String,
    blobs: Mutex<HashMap<String, StoredBlob>>,
    failing: AtomicBool,
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new("cdn.test")
    }
}

impl InMemoryBlobStore {
    pub fn new(cdn_domain: impl Into<String>) -> Self {
        Self {
            cdn_domain: cdn_domain.into(),
            blobs: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get(&self, path: &str) -> Option<StoredBlob> {
        self.blobs.lock().ok()?.get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, BlobError> {
        let upload_error = |message: &str| BlobError::Upload {
            path: path.to_string(),
            message: message.to_string(),
        };
        if self.failing.load(Ordering::SeqCst) {
            return Err(upload_error("injected failure"));
        }
        self.blobs.lock().map_err(|_| upload_error("lock poisoned"))?.insert(
            path.to_string(),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(cdn_url(&self.cdn_domain, path))
    }
}
