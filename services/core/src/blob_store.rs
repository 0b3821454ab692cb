use crate::config::ObjectStoreConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors surfaced by the blob store adapter.
///
/// `Put` failures are retriable by the caller as a fresh upload; the caller
/// owns metadata rollback.
#[derive(Error, Debug)]
pub enum BlobStoreError {
    #[error("Failed to store object {key}: {message}")]
    Put { key: String, message: String },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Failed to read object {key}: {message}")]
    Get { key: String, message: String },

    #[error("Failed to delete object {key}: {message}")]
    Delete { key: String, message: String },

    #[error("Failed to prepare bucket {bucket}: {message}")]
    Bucket { bucket: String, message: String },
}

/// S3/MinIO adapter holding the two named buckets.
///
/// Every `put` takes a full owned byte buffer so uploads are safe to run on a
/// pool detached from the request-reading task.
pub struct BlobStore {
    client: S3Client,
    photos_bucket: String,
    thumbnails_bucket: String,
}

impl BlobStore {
    pub async fn new(config: &ObjectStoreConfig) -> Result<Self, BlobStoreError> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = S3ConfigBuilder::from(&aws_config);

        // Custom endpoint + path-style for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = S3Client::from_conf(builder.build());

        info!(
            photos_bucket = %config.photos_bucket,
            thumbnails_bucket = %config.thumbnails_bucket,
            region = %config.region,
            "Blob store initialized"
        );

        Ok(Self {
            client,
            photos_bucket: config.photos_bucket.clone(),
            thumbnails_bucket: config.thumbnails_bucket.clone(),
        })
    }

    /// Idempotently create both buckets. Called once at startup.
    pub async fn ensure_buckets(&self) -> Result<(), BlobStoreError> {
        for bucket in [&self.photos_bucket, &self.thumbnails_bucket] {
            self.ensure_bucket(bucket).await?;
        }
        Ok(())
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<(), BlobStoreError> {
        let exists = self
            .client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .is_ok();

        if exists {
            debug!(bucket = %bucket, "Bucket exists");
            return Ok(());
        }

        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => {
                info!(bucket = %bucket, "Created bucket");
                Ok(())
            }
            Err(e) => {
                // Another instance may have created it between the probe and
                // the create call.
                let service_err = e.into_service_error();
                if service_err.is_bucket_already_owned_by_you()
                    || service_err.is_bucket_already_exists()
                {
                    debug!(bucket = %bucket, "Bucket already created elsewhere");
                    Ok(())
                } else {
                    Err(BlobStoreError::Bucket {
                        bucket: bucket.to_string(),
                        message: service_err.to_string(),
                    })
                }
            }
        }
    }

    pub fn photos_bucket(&self) -> &str {
        &self.photos_bucket
    }

    pub fn thumbnails_bucket(&self) -> &str {
        &self.thumbnails_bucket
    }

    /// Store an original photo. Returns the storage path (`bucket/key`).
    #[instrument(skip(self, bytes), fields(key = %key, size = bytes.len()))]
    pub async fn put_photo(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BlobStoreError> {
        self.put(&self.photos_bucket, key, bytes, content_type).await
    }

    /// Store a derived thumbnail. Returns the storage path (`bucket/key`).
    pub async fn put_thumbnail(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BlobStoreError> {
        self.put(&self.thumbnails_bucket, key, bytes, content_type)
            .await
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BlobStoreError> {
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| BlobStoreError::Put {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        metrics::counter!("blob_store.bytes.stored").increment(size as u64);
        debug!(bucket = %bucket, key = %key, size_bytes = size, "Stored object");
        Ok(format!("{bucket}/{key}"))
    }

    /// Fetch an original photo's bytes.
    pub async fn get_photo(&self, key: &str) -> Result<Vec<u8>, BlobStoreError> {
        self.get(&self.photos_bucket, key).await
    }

    /// Fetch a thumbnail's bytes.
    pub async fn get_thumbnail(&self, key: &str) -> Result<Vec<u8>, BlobStoreError> {
        self.get(&self.thumbnails_bucket, key).await
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobStoreError> {
        let object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    BlobStoreError::NotFound(format!("{bucket}/{key}"))
                } else {
                    BlobStoreError::Get {
                        key: key.to_string(),
                        message: service_err.to_string(),
                    }
                }
            })?;

        let bytes = object.body.collect().await.map_err(|e| BlobStoreError::Get {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        Ok(bytes.into_bytes().to_vec())
    }

    /// Delete an original photo. Missing objects are not an error.
    #[instrument(skip(self))]
    pub async fn delete_photo(&self, key: &str) -> Result<(), BlobStoreError> {
        self.delete(&self.photos_bucket, key).await
    }

    /// Delete a thumbnail. Missing objects are not an error.
    pub async fn delete_thumbnail(&self, key: &str) -> Result<(), BlobStoreError> {
        self.delete(&self.thumbnails_bucket, key).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BlobStoreError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| BlobStoreError::Delete {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        debug!(bucket = %bucket, key = %key, "Deleted object");
        Ok(())
    }
}
