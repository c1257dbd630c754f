use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration,
};
use aws_sdk_s3::{Client, config::BehaviorVersion, config::Credentials, config::Region};
use bytes::Bytes;
use tracing::{info, warn};

use super::BlobStore;
use crate::common::error::{RecorderError, Result};
use crate::common::upload;

#[derive(Clone)]
pub struct StorageService {
    pub client: Client,
    pub bucket: String,
    region: String,
}

impl StorageService {
    pub fn new(
        endpoint: &str,
        region: &str,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "static");

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true) // MinIO and most S3-compatible gateways
            .build();

        let client = Client::from_conf(config);

        info!("✅ S3 client ready for bucket '{}'", bucket);

        Self {
            client,
            bucket: bucket.to_string(),
            region: region.to_string(),
        }
    }

    /// Creates the recordings bucket when it does not exist yet. Failures are
    /// logged only: the bucket may exist with credentials that cannot see it.
    pub async fn ensure_bucket(&self) {
        if self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok()
        {
            return;
        }

        let mut request = self.client.create_bucket().bucket(&self.bucket);
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => info!("🪣 Bucket created: {}", self.bucket),
            Err(e) => warn!(
                "createBucket failed ({}): {}",
                self.bucket,
                aws_sdk_s3::Error::from(e)
            ),
        }
    }

    pub async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), aws_sdk_s3::Error> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await?;
        Ok(())
    }

    pub async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| RecorderError::Upload(aws_sdk_s3::Error::from(e).to_string()))?;
        Ok(())
    }

    pub async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String> {
        let result = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| RecorderError::Upload(aws_sdk_s3::Error::from(e).to_string()))?;

        result
            .upload_id
            .ok_or_else(|| RecorderError::Upload("storage returned no upload id".to_string()))
    }

    pub async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<CompletedPart> {
        let result = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| RecorderError::Upload(aws_sdk_s3::Error::from(e).to_string()))?;

        let e_tag = result.e_tag.ok_or_else(|| {
            RecorderError::Upload(format!("storage returned no etag for part {}", part_number))
        })?;

        Ok(CompletedPart::builder()
            .e_tag(e_tag)
            .part_number(part_number)
            .build())
    }

    pub async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| RecorderError::Upload(aws_sdk_s3::Error::from(e).to_string()))?;

        Ok(())
    }

    pub async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| RecorderError::Upload(aws_sdk_s3::Error::from(e).to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl BlobStore for StorageService {
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<u64> {
        upload::upload_file(self, path, key, content_type).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.delete_object(key).await
    }
}
