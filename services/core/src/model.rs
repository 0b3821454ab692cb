use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle status of a photo in the processing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "photo_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhotoStatus {
    /// Uploaded by the user, not yet queued for processing
    Uploaded,
    /// Appended to the job stream, waiting for a worker
    Queued,
    /// A worker is currently processing the photo
    Processing,
    /// Processing finished successfully
    Completed,
    /// Processing failed with an error
    Failed,
}

impl PhotoStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, PhotoStatus::Completed | PhotoStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PhotoStatus::Uploaded => "UPLOADED",
            PhotoStatus::Queued => "QUEUED",
            PhotoStatus::Processing => "PROCESSING",
            PhotoStatus::Completed => "COMPLETED",
            PhotoStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for PhotoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow event kinds recorded in the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Uploaded,
    Queued,
    Processing,
    Completed,
    Failed,
    Renamed,
    Restored,
}

impl From<PhotoStatus> for EventType {
    fn from(status: PhotoStatus) -> Self {
        match status {
            PhotoStatus::Uploaded => EventType::Uploaded,
            PhotoStatus::Queued => EventType::Queued,
            PhotoStatus::Processing => EventType::Processing,
            PhotoStatus::Completed => EventType::Completed,
            PhotoStatus::Failed => EventType::Failed,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventType::Uploaded => "UPLOADED",
            EventType::Queued => "QUEUED",
            EventType::Processing => "PROCESSING",
            EventType::Completed => "COMPLETED",
            EventType::Failed => "FAILED",
            EventType::Renamed => "RENAMED",
            EventType::Restored => "RESTORED",
        };
        f.write_str(s)
    }
}

/// A stored photo and its workflow metadata.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Photo {
    /// Unique photo ID
    pub id: Uuid,
    /// Short human-readable ID (6 characters, base62)
    pub short_id: Option<String>,
    /// Sanitized unique filename used as the object-store key
    pub filename: String,
    /// Original filename exactly as provided by the client
    pub original_filename: String,
    /// Current lifecycle status
    pub status: PhotoStatus,
    /// File size in bytes
    pub size: i64,
    /// Declared MIME type (e.g. image/jpeg)
    pub mime_type: String,
    /// Object-store path of the original (bucket/key)
    pub storage_path: String,
    /// Object-store path of the derived thumbnail, if any
    pub thumbnail_path: Option<String>,
    /// Additional metadata as JSON
    pub metadata: serde_json::Value,
    /// Favorite flag
    pub is_favorite: bool,
    /// Soft-delete timestamp; non-null means trashed
    pub deleted_at: Option<DateTime<Utc>>,
    /// When the photo was uploaded (immutable)
    pub uploaded_at: DateTime<Utc>,
    /// When the photo first reached a terminal status
    pub processed_at: Option<DateTime<Utc>>,
    /// Row creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp; optimistic-concurrency token
    pub updated_at: DateTime<Utc>,
}

impl Photo {
    /// Whether the photo is soft-deleted.
    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// One append-only workflow event.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EventRecord {
    pub id: Uuid,
    /// Insertion-order tiebreaker for events sharing a timestamp tick
    pub seq: i64,
    pub photo_id: Uuid,
    pub event_type: EventType,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Status transition pushed to notification subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub photo_id: Uuid,
    pub status: PhotoStatus,
    pub message: String,
    /// Publish instant, UTC
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(PhotoStatus::Completed.is_terminal());
        assert!(PhotoStatus::Failed.is_terminal());
        assert!(!PhotoStatus::Uploaded.is_terminal());
        assert!(!PhotoStatus::Queued.is_terminal());
        assert!(!PhotoStatus::Processing.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&PhotoStatus::Processing).unwrap(),
            "\"PROCESSING\""
        );
        let parsed: PhotoStatus = serde_json::from_str("\"COMPLETED\"").unwrap();
        assert_eq!(parsed, PhotoStatus::Completed);
    }

    #[test]
    fn test_event_type_from_status() {
        assert_eq!(EventType::from(PhotoStatus::Queued), EventType::Queued);
        assert_eq!(EventType::from(PhotoStatus::Failed), EventType::Failed);
    }

    #[test]
    fn test_status_update_shape() {
        let update = StatusUpdate {
            photo_id: Uuid::new_v4(),
            status: PhotoStatus::Completed,
            message: "done".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&update).unwrap();
        assert!(json.get("photoId").is_some());
        assert_eq!(json["status"], "COMPLETED");
    }
}
