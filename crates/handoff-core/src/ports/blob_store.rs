//! BlobStore port - 録音ファイルの保存先（MinIO/S3/Local）
//!
//! コアは生データを解釈しません。保存して場所（bucket + key）を受け取るだけです。

use async_trait::async_trait;

use crate::domain::{BlobLocation, HandoffError};

/// BlobStore は録音の生バイトを保存
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key` and return where they landed.
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<BlobLocation, HandoffError>;
}
