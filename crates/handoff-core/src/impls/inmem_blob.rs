//! InMemoryBlobStore - 開発用の Blob ストア
//!
//! bucket は 1 つだけ。key -> bytes を HashMap で保持します。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{BlobLocation, HandoffError};
use crate::ports::BlobStore;

pub struct InMemoryBlobStore {
    bucket: String,
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: Option<&str>,
    ) -> Result<BlobLocation, HandoffError> {
        if key.is_empty() {
            return Err(HandoffError::Blob("object key must not be empty".into()));
        }
        self.objects.lock().await.insert(key.to_string(), bytes);
        Ok(BlobLocation::new(self.bucket.clone(), key))
    }
}
