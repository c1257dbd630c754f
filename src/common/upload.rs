use std::path::Path;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

use crate::common::error::{RecorderError, Result};
use crate::infrastructure::storage::s3::StorageService;

// Minimum part size for S3 is 5MB. We use 6MB to be safe.
const MIN_PART_SIZE: usize = 6 * 1024 * 1024;
const READ_CHUNK: usize = 256 * 1024;

pub struct MultipartUploader<'a> {
    storage: &'a StorageService,
    key: String,
    upload_id: String,
    parts: Vec<aws_sdk_s3::types::CompletedPart>,
    part_number: i32,
    buffer: Vec<u8>,
    written: u64,
}

impl<'a> MultipartUploader<'a> {
    pub async fn new(storage: &'a StorageService, key: String, content_type: &str) -> Result<Self> {
        let upload_id = storage.create_multipart_upload(&key, content_type).await?;

        Ok(Self {
            storage,
            key,
            upload_id,
            parts: Vec::new(),
            part_number: 1,
            buffer: Vec::with_capacity(MIN_PART_SIZE),
            written: 0,
        })
    }

    pub async fn write_chunk(&mut self, chunk: Bytes) -> Result<()> {
        self.buffer.extend_from_slice(&chunk);
        self.written += chunk.len() as u64;

        if self.buffer.len() >= MIN_PART_SIZE {
            self.flush_part().await?;
        }

        Ok(())
    }

    async fn flush_part(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let body = Bytes::from(std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(MIN_PART_SIZE),
        ));

        let part = self
            .storage
            .upload_part(&self.key, &self.upload_id, self.part_number, body)
            .await?;
        debug!(key = %self.key, part = self.part_number, "uploaded part");

        self.parts.push(part);
        self.part_number += 1;

        Ok(())
    }

    pub async fn finish(&mut self) -> Result<u64> {
        if !self.buffer.is_empty() {
            self.flush_part().await?;
        }

        let parts = std::mem::take(&mut self.parts);
        self.storage
            .complete_multipart_upload(&self.key, &self.upload_id, parts)
            .await?;
        Ok(self.written)
    }

    pub async fn abort(&self) {
        if let Err(e) = self
            .storage
            .abort_multipart_upload(&self.key, &self.upload_id)
            .await
        {
            error!(key = %self.key, "failed to abort multipart upload: {}", e);
        }
    }
}

/// Uploads a local file to storage, in one request when it is smaller than a
/// multipart part and as a multipart upload otherwise.
pub async fn upload_file(
    storage: &StorageService,
    path: &Path,
    key: &str,
    content_type: &str,
) -> Result<u64> {
    let size = tokio::fs::metadata(path).await?.len();

    if size < MIN_PART_SIZE as u64 {
        let body = tokio::fs::read(path).await?;
        let len = body.len() as u64;
        storage
            .put_object(key, Bytes::from(body), content_type)
            .await
            .map_err(|e| RecorderError::Upload(e.to_string()))?;
        return Ok(len);
    }

    let file = File::open(path).await?;
    let mut stream = ReaderStream::with_capacity(file, READ_CHUNK);
    let mut uploader = MultipartUploader::new(storage, key.to_string(), content_type).await?;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                error!("Read error while uploading {}: {}", path.display(), e);
                uploader.abort().await;
                return Err(RecorderError::Upload(format!("reading local file: {}", e)));
            }
        };

        if let Err(e) = uploader.write_chunk(chunk).await {
            error!("Upload error: {}", e);
            uploader.abort().await;
            return Err(e);
        }
    }

    match uploader.finish().await {
        Ok(written) => Ok(written),
        Err(e) => {
            uploader.abort().await;
            Err(e)
        }
    }
}
