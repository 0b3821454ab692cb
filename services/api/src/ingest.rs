//! Ingest pipeline: validation, parallel blob upload, metadata persistence,
//! enqueue, and the initial notifications.
//!
//! Per-file failures never fail the batch; the batch fails only when every
//! file fails. File bytes are copied into owned buffers before they reach the
//! upload pool, so nothing here touches request-bound state.

use crate::config::IngestConfig;
use futures::stream::{self, StreamExt};
use photoflow_core::config::QueueConfig;
use photoflow_core::lifecycle::{LifecycleCoordinator, TransitionOutcome};
use photoflow_core::photo_store::{new_photo, PhotoStore};
use photoflow_core::stream_queue::{JobMessage, StreamQueue};
use photoflow_core::{filename, BlobStore, ErrorCode, Photo, PhotoStatus, StatusBroker};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/gif",
];

const ALLOWED_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".gif"];

/// One candidate file, bytes already copied out of the request.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub original_filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Per-file failure reported in the batch response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    pub filename: String,
    pub error: ErrorCode,
    pub message: String,
}

/// Batch outcome: which files became photos and which failed, with reasons.
#[derive(Debug)]
pub struct IngestReport {
    pub photos: Vec<Photo>,
    pub failures: Vec<FileFailure>,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("No files provided")]
    EmptyBatch,

    #[error("Maximum {max} files allowed per batch, got {got}")]
    BatchTooLarge { max: usize, got: usize },

    #[error("All files failed")]
    AllFailed(Vec<FileFailure>),
}

/// Validate one file against the ingest limits.
pub fn validate_file(file: &FileUpload, limits: &IngestConfig) -> Option<FileFailure> {
    if file.bytes.is_empty() {
        return Some(FileFailure {
            filename: file.original_filename.clone(),
            error: ErrorCode::ValidationError,
            message: "File is corrupted or empty".to_string(),
        });
    }

    if file.bytes.len() > limits.max_file_size_bytes {
        return Some(FileFailure {
            filename: file.original_filename.clone(),
            error: ErrorCode::FileTooLarge,
            message: format!(
                "File size ({} bytes) exceeds maximum allowed size ({} bytes)",
                file.bytes.len(),
                limits.max_file_size_bytes
            ),
        });
    }

    if !ALLOWED_MIME_TYPES.contains(&file.content_type.to_lowercase().as_str()) {
        return Some(FileFailure {
            filename: file.original_filename.clone(),
            error: ErrorCode::UnsupportedFormat,
            message: format!(
                "Unsupported file type: {}. Allowed types: {}",
                file.content_type,
                ALLOWED_MIME_TYPES.join(", ")
            ),
        });
    }

    let ext = filename::extension(&file.original_filename);
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Some(FileFailure {
            filename: file.original_filename.clone(),
            error: ErrorCode::UnsupportedFormat,
            message: format!(
                "Unsupported file extension: {}. Allowed extensions: {}",
                ext,
                ALLOWED_EXTENSIONS.join(", ")
            ),
        });
    }

    None
}

pub struct IngestPipeline {
    store: PhotoStore,
    blob_store: Arc<BlobStore>,
    queue: Arc<StreamQueue>,
    lifecycle: Arc<LifecycleCoordinator>,
    broker: Arc<StatusBroker>,
    queue_config: QueueConfig,
    limits: IngestConfig,
    group_created: AtomicBool,
}

impl IngestPipeline {
    pub fn new(
        store: PhotoStore,
        blob_store: Arc<BlobStore>,
        queue: Arc<StreamQueue>,
        lifecycle: Arc<LifecycleCoordinator>,
        broker: Arc<StatusBroker>,
        queue_config: QueueConfig,
        limits: IngestConfig,
    ) -> Self {
        Self {
            store,
            blob_store,
            queue,
            lifecycle,
            broker,
            queue_config,
            limits,
            group_created: AtomicBool::new(false),
        }
    }

    /// Run a batch through the pipeline.
    ///
    /// Valid files are uploaded with bounded concurrency; each success then
    /// gets its metadata transaction, queue append, `Queued` transition, and
    /// notifications. The batch succeeds if at least one file does.
    #[instrument(skip(self, files), fields(batch_size = files.len()))]
    pub async fn ingest(&self, files: Vec<FileUpload>) -> Result<IngestReport, IngestError> {
        if files.is_empty() {
            return Err(IngestError::EmptyBatch);
        }
        if files.len() > self.limits.max_batch_files {
            return Err(IngestError::BatchTooLarge {
                max: self.limits.max_batch_files,
                got: files.len(),
            });
        }

        // Per-file validation; invalid files are reported and skipped.
        let mut failures = Vec::new();
        let mut valid = Vec::new();
        for file in files {
            match validate_file(&file, &self.limits) {
                Some(failure) => {
                    warn!(
                        filename = %failure.filename,
                        reason = %failure.message,
                        "Skipping invalid file"
                    );
                    metrics::counter!("ingest.files.rejected").increment(1);
                    failures.push(failure);
                }
                None => valid.push(file),
            }
        }

        let outcomes: Vec<Result<Photo, FileFailure>> = stream::iter(valid)
            .map(|file| self.ingest_one(file))
            .buffer_unordered(self.limits.upload_concurrency)
            .collect()
            .await;

        let mut photos = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(photo) => photos.push(photo),
                Err(failure) => failures.push(failure),
            }
        }

        if photos.is_empty() {
            return Err(IngestError::AllFailed(failures));
        }

        if !failures.is_empty() {
            warn!(
                succeeded = photos.len(),
                failed = failures.len(),
                "Batch completed with partial failures"
            );
        } else {
            info!(count = photos.len(), "Batch uploaded successfully");
        }

        metrics::counter!("ingest.photos.uploaded").increment(photos.len() as u64);
        Ok(IngestReport { photos, failures })
    }

    /// Blob upload, metadata transaction, enqueue, and notifications for one
    /// file.
    async fn ingest_one(&self, file: FileUpload) -> Result<Photo, FileFailure> {
        let original = file.original_filename.clone();
        let storage_filename = filename::storage_key(&filename::sanitize(&original));
        let size = file.bytes.len() as i64;

        let storage_path = self
            .blob_store
            .put_photo(&storage_filename, file.bytes, &file.content_type)
            .await
            .map_err(|e| {
                error!(filename = %original, error = %e, "Blob upload failed");
                FileFailure {
                    filename: original.clone(),
                    error: ErrorCode::StorageError,
                    message: format!("Failed to store file: {e}"),
                }
            })?;

        let photo = new_photo(
            &original,
            &storage_filename,
            size,
            &file.content_type,
            &storage_path,
        );

        self.store
            .insert_with_event(&photo, &format!("Photo uploaded successfully: {original}"))
            .await
            .map_err(|e| {
                // The blob stays addressable for admin tooling; only the
                // metadata failed.
                error!(filename = %original, error = %e, "Metadata insert failed");
                FileFailure {
                    filename: original.clone(),
                    error: ErrorCode::DatabaseError,
                    message: format!("Failed to record photo: {e}"),
                }
            })?;

        self.broker.publish(
            photo.id,
            PhotoStatus::Uploaded,
            &format!("Photo uploaded successfully: {original}"),
        );

        match self.enqueue(&photo).await {
            Ok(queued) => {
                info!(photo_id = %photo.id, filename = %original, "Photo ingested and queued");
                Ok(queued)
            }
            Err(reason) => {
                // Enqueue or status update failed after the blob was stored:
                // drive the photo to Failed and keep the blob.
                error!(photo_id = %photo.id, error = %reason, "Failed to queue photo");
                if let Err(e) = self
                    .lifecycle
                    .transition(
                        photo.id,
                        PhotoStatus::Failed,
                        &format!("Failed to queue photo: {reason}"),
                    )
                    .await
                {
                    error!(photo_id = %photo.id, error = %e, "Failed transition also failed");
                }
                Err(FileFailure {
                    filename: original,
                    error: ErrorCode::ProcessingError,
                    message: format!("Failed to queue photo: {reason}"),
                })
            }
        }
    }

    /// Append the job record and transition the photo to `Queued`.
    async fn enqueue(&self, photo: &Photo) -> Result<Photo, String> {
        let job = JobMessage {
            photo_id: photo.id,
            filename: photo.filename.clone(),
            storage_path: photo.storage_path.clone(),
        };

        let message_id = self
            .queue
            .append(&self.queue_config.stream_name, &job)
            .await
            .map_err(|e| e.to_string())?;

        // Lazy group creation after the first successful append; an existing
        // group is success, and the worker creates it at startup anyway.
        if !self.group_created.swap(true, Ordering::SeqCst) {
            if let Err(e) = self
                .queue
                .create_group(&self.queue_config.stream_name, &self.queue_config.group_name)
                .await
            {
                warn!(error = %e, "Consumer group creation failed, worker will create it");
            }
        }

        let outcome = self
            .lifecycle
            .transition(
                photo.id,
                PhotoStatus::Queued,
                &format!("Photo queued for processing (messageId: {message_id})"),
            )
            .await
            .map_err(|e| e.to_string())?;

        match outcome {
            TransitionOutcome::Applied(updated) => Ok(updated),
            TransitionOutcome::Noop(photo) => Ok(photo),
            TransitionOutcome::Missing => Err("photo disappeared before queueing".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> IngestConfig {
        IngestConfig::default()
    }

    fn png(name: &str, size: usize) -> FileUpload {
        FileUpload {
            original_filename: name.to_string(),
            content_type: "image/png".to_string(),
            bytes: vec![0u8; size],
        }
    }

    #[test]
    fn test_valid_png_passes() {
        assert!(validate_file(&png("beach.png", 1024 * 1024), &limits()).is_none());
    }

    #[test]
    fn test_oversized_file_rejected() {
        let failure = validate_file(&png("big.png", 10 * 1024 * 1024 + 1), &limits()).unwrap();
        assert_eq!(failure.error, ErrorCode::FileTooLarge);
        assert!(failure.message.contains("exceeds maximum"));
    }

    #[test]
    fn test_exact_limit_accepted() {
        assert!(validate_file(&png("edge.png", 10 * 1024 * 1024), &limits()).is_none());
    }

    #[test]
    fn test_unsupported_mime_rejected() {
        let file = FileUpload {
            original_filename: "doc.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            bytes: vec![0u8; 1024],
        };
        let failure = validate_file(&file, &limits()).unwrap();
        assert_eq!(failure.error, ErrorCode::UnsupportedFormat);
    }

    #[test]
    fn test_mismatched_extension_rejected() {
        let file = FileUpload {
            original_filename: "photo.bmp".to_string(),
            content_type: "image/png".to_string(),
            bytes: vec![0u8; 1024],
        };
        let failure = validate_file(&file, &limits()).unwrap();
        assert_eq!(failure.error, ErrorCode::UnsupportedFormat);
        assert!(failure.message.contains(".bmp"));
    }

    #[test]
    fn test_empty_file_rejected() {
        let failure = validate_file(&png("empty.png", 0), &limits()).unwrap();
        assert_eq!(failure.error, ErrorCode::ValidationError);
    }

    #[test]
    fn test_extension_check_is_case_insensitive() {
        let file = FileUpload {
            original_filename: "HOLIDAY.JPEG".to_string(),
            content_type: "image/jpeg".to_string(),
            bytes: vec![0u8; 10],
        };
        assert!(validate_file(&file, &limits()).is_none());
    }

    #[test]
    fn test_size_check_runs_before_mime_check() {
        // An oversized PDF reports FILE_TOO_LARGE, matching the rule order.
        let file = FileUpload {
            original_filename: "huge.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            bytes: vec![0u8; 11 * 1024 * 1024],
        };
        let failure = validate_file(&file, &limits()).unwrap();
        assert_eq!(failure.error, ErrorCode::FileTooLarge);
    }
}
