pub mod s3;

use std::path::Path;

use async_trait::async_trait;

use crate::common::error::Result;

/// Object storage the finalizer uploads artifacts to.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Uploads the local file at `path` under `key`. Returns the number of
    /// bytes stored.
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<u64>;

    async fn delete(&self, key: &str) -> Result<()>;
}
