use crate::config::DatabaseConfig;
use crate::model::{EventType, Photo, PhotoStatus};
use crate::short_id;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("Optimistic concurrency conflict persisted after retry for photo {0}")]
    Conflict(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

const PHOTO_COLUMNS: &str = "id, short_id, filename, original_filename, status, size, mime_type, \
     storage_path, thumbnail_path, metadata, is_favorite, deleted_at, uploaded_at, processed_at, \
     created_at, updated_at";

/// Sortable columns exposed through the listing API. Anything else falls back
/// to upload time.
fn sort_column(key: &str) -> &'static str {
    match key {
        "uploadedAt" => "uploaded_at",
        "updatedAt" => "updated_at",
        "deletedAt" => "deleted_at",
        "size" => "size",
        "originalFilename" => "original_filename",
        "status" => "status",
        _ => "uploaded_at",
    }
}

/// Filter for photo listings.
#[derive(Debug, Clone, Default)]
pub struct PhotoQuery {
    /// Restrict to one status
    pub status: Option<PhotoStatus>,
    /// Only favorites
    pub favorites_only: bool,
    /// true lists the trash, false excludes it
    pub trashed: bool,
    /// Sort key in API form (e.g. "uploadedAt")
    pub sort: String,
    pub ascending: bool,
    pub limit: i64,
    pub offset: i64,
}

/// Repository for photos and the transactional insert path.
#[derive(Clone)]
pub struct PhotoStore {
    pool: PgPool,
}

impl PhotoStore {
    /// Build a connection pool and wrap it.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, RepoError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply embedded schema migrations.
    pub async fn run_migrations(&self) -> Result<(), RepoError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Insert a freshly-uploaded photo and its UPLOADED event in one
    /// transaction. The photo must be in `Uploaded` state.
    #[instrument(skip(self, photo), fields(photo_id = %photo.id, filename = %photo.filename))]
    pub async fn insert_with_event(
        &self,
        photo: &Photo,
        event_message: &str,
    ) -> Result<(), RepoError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO photo (id, short_id, filename, original_filename, status, size, \
                 mime_type, storage_path, thumbnail_path, metadata, is_favorite, uploaded_at, \
                 created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)",
        )
        .bind(photo.id)
        .bind(&photo.short_id)
        .bind(&photo.filename)
        .bind(&photo.original_filename)
        .bind(photo.status)
        .bind(photo.size)
        .bind(&photo.mime_type)
        .bind(&photo.storage_path)
        .bind(&photo.thumbnail_path)
        .bind(&photo.metadata)
        .bind(photo.is_favorite)
        .bind(photo.uploaded_at)
        .bind(photo.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO event_log (id, photo_id, event_type, message, timestamp) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(photo.id)
        .bind(EventType::Uploaded)
        .bind(event_message)
        .bind(photo.uploaded_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        metrics::counter!("photos.inserted").increment(1);
        debug!(photo_id = %photo.id, "Inserted photo with UPLOADED event");
        Ok(())
    }

    /// Fetch a photo regardless of soft-delete state.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Photo>, RepoError> {
        let photo = sqlx::query_as::<_, Photo>(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photo WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(photo)
    }

    pub async fn exists(&self, id: Uuid) -> Result<bool, RepoError> {
        let (found,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM photo WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(found)
    }

    /// Fetch several photos by id; missing ids are silently absent.
    pub async fn find_all_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Photo>, RepoError> {
        let photos = sqlx::query_as::<_, Photo>(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photo WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(photos)
    }

    /// Listing with dynamic filters. Soft-deleted rows are excluded unless
    /// the query asks for the trash.
    #[instrument(skip(self))]
    pub async fn list(&self, query: &PhotoQuery) -> Result<Vec<Photo>, RepoError> {
        let mut sql = format!("SELECT {PHOTO_COLUMNS} FROM photo WHERE 1=1");

        if query.trashed {
            sql.push_str(" AND deleted_at IS NOT NULL");
        } else {
            sql.push_str(" AND deleted_at IS NULL");
        }
        if query.favorites_only {
            sql.push_str(" AND is_favorite");
        }

        let mut param = 0;
        if query.status.is_some() {
            param += 1;
            sql.push_str(&format!(" AND status = ${param}"));
        }

        let direction = if query.ascending { "ASC" } else { "DESC" };
        sql.push_str(&format!(
            " ORDER BY {} {direction} NULLS LAST",
            sort_column(&query.sort)
        ));

        param += 1;
        sql.push_str(&format!(" LIMIT ${param}"));
        param += 1;
        sql.push_str(&format!(" OFFSET ${param}"));

        let mut q = sqlx::query_as::<_, Photo>(&sql);
        if let Some(status) = query.status {
            q = q.bind(status);
        }
        q = q.bind(query.limit).bind(query.offset);

        Ok(q.fetch_all(&self.pool).await?)
    }

    /// Row count matching the same filters as [`list`], ignoring paging.
    pub async fn count(&self, query: &PhotoQuery) -> Result<i64, RepoError> {
        let mut sql = String::from("SELECT COUNT(*) FROM photo WHERE 1=1");
        if query.trashed {
            sql.push_str(" AND deleted_at IS NOT NULL");
        } else {
            sql.push_str(" AND deleted_at IS NULL");
        }
        if query.favorites_only {
            sql.push_str(" AND is_favorite");
        }
        if query.status.is_some() {
            sql.push_str(" AND status = $1");
        }

        let mut q = sqlx::query_as::<_, (i64,)>(&sql);
        if let Some(status) = query.status {
            q = q.bind(status);
        }
        let (count,) = q.fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// Polling query: every row whose `updated_at` is after `since`, oldest
    /// first, optionally restricted to an id set (evaluated in SQL).
    #[instrument(skip(self, ids))]
    pub async fn find_updated_after(
        &self,
        since: DateTime<Utc>,
        ids: Option<&[Uuid]>,
    ) -> Result<Vec<Photo>, RepoError> {
        let photos = match ids {
            Some(ids) => {
                sqlx::query_as::<_, Photo>(&format!(
                    "SELECT {PHOTO_COLUMNS} FROM photo \
                     WHERE updated_at > $1 AND id = ANY($2) ORDER BY updated_at ASC"
                ))
                .bind(since)
                .bind(ids)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Photo>(&format!(
                    "SELECT {PHOTO_COLUMNS} FROM photo \
                     WHERE updated_at > $1 ORDER BY updated_at ASC"
                ))
                .bind(since)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(photos)
    }

    /// Toggle the favorite flag. Compare-and-set on `updated_at` with one
    /// retry; `None` when the photo no longer exists.
    pub async fn toggle_favorite(&self, id: Uuid) -> Result<Option<Photo>, RepoError> {
        self.cas_update(id, "is_favorite = NOT is_favorite").await
    }

    /// Update the display filename. The caller sanitizes the new name.
    pub async fn rename(&self, id: Uuid, new_name: &str) -> Result<Option<Photo>, RepoError> {
        for _ in 0..2 {
            let Some(photo) = self.find_by_id(id).await? else {
                return Ok(None);
            };
            let rows = sqlx::query(
                "UPDATE photo SET original_filename = $3, updated_at = $4 \
                 WHERE id = $1 AND updated_at = $2",
            )
            .bind(id)
            .bind(photo.updated_at)
            .bind(new_name)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?
            .rows_affected();

            if rows == 1 {
                return self.find_by_id(id).await;
            }
            warn!(photo_id = %id, "Rename hit a concurrent update, retrying");
        }
        Err(RepoError::Conflict(id))
    }

    /// Soft delete: set `deleted_at`, leaving the row and blob in place.
    /// Missing photo is a no-op. One CAS retry on conflict.
    #[instrument(skip(self))]
    pub async fn soft_delete(&self, id: Uuid) -> Result<Option<Photo>, RepoError> {
        self.cas_update(id, "deleted_at = now()").await
    }

    /// Clear the soft-delete flag.
    pub async fn restore(&self, id: Uuid) -> Result<Option<Photo>, RepoError> {
        self.cas_update(id, "deleted_at = NULL").await
    }

    /// Physically remove the row (events cascade). Returns the removed row so
    /// the caller can clean up blobs; `None` when already gone.
    #[instrument(skip(self))]
    pub async fn delete_by_id(&self, id: Uuid) -> Result<Option<Photo>, RepoError> {
        let photo = sqlx::query_as::<_, Photo>(&format!(
            "DELETE FROM photo WHERE id = $1 RETURNING {PHOTO_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        if photo.is_some() {
            metrics::counter!("photos.deleted").increment(1);
            debug!(photo_id = %id, "Permanently deleted photo row");
        }
        Ok(photo)
    }

    /// Shared CAS loop for single-column flag updates: read `updated_at`,
    /// update only when unchanged, retry once with a fresh read.
    async fn cas_update(&self, id: Uuid, set_clause: &str) -> Result<Option<Photo>, RepoError> {
        for attempt in 0..2 {
            let Some(photo) = self.find_by_id(id).await? else {
                return Ok(None);
            };
            let sql = format!(
                "UPDATE photo SET {set_clause}, updated_at = $3 \
                 WHERE id = $1 AND updated_at = $2"
            );
            let rows = sqlx::query(&sql)
                .bind(id)
                .bind(photo.updated_at)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?
                .rows_affected();

            if rows == 1 {
                return self.find_by_id(id).await;
            }
            warn!(photo_id = %id, attempt, "Concurrent update detected, retrying with fresh read");
        }
        Err(RepoError::Conflict(id))
    }
}

/// Assemble a new photo row in `Uploaded` state.
pub fn new_photo(
    original_filename: &str,
    storage_filename: &str,
    size: i64,
    mime_type: &str,
    storage_path: &str,
) -> Photo {
    let id = Uuid::new_v4();
    let now = Utc::now();
    Photo {
        id,
        short_id: Some(short_id::from_uuid(id)),
        filename: storage_filename.to_string(),
        original_filename: original_filename.to_string(),
        status: PhotoStatus::Uploaded,
        size,
        mime_type: mime_type.to_string(),
        storage_path: storage_path.to_string(),
        thumbnail_path: None,
        metadata: serde_json::json!({}),
        is_favorite: false,
        deleted_at: None,
        uploaded_at: now,
        processed_at: None,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_photo_defaults() {
        let photo = new_photo("beach.png", "abc.png", 1024, "image/png", "photos/abc.png");
        assert_eq!(photo.status, PhotoStatus::Uploaded);
        assert_eq!(photo.original_filename, "beach.png");
        assert!(!photo.is_favorite);
        assert!(photo.deleted_at.is_none());
        assert!(photo.processed_at.is_none());
        assert_eq!(photo.uploaded_at, photo.updated_at);
        assert!(short_id::is_valid(photo.short_id.as_deref().unwrap()));
    }

    #[test]
    fn test_sort_column_whitelist() {
        assert_eq!(sort_column("uploadedAt"), "uploaded_at");
        assert_eq!(sort_column("deletedAt"), "deleted_at");
        // unknown keys cannot inject SQL
        assert_eq!(sort_column("uploaded_at; DROP TABLE photo"), "uploaded_at");
    }

    #[test]
    fn test_photo_query_default() {
        let q = PhotoQuery::default();
        assert!(q.status.is_none());
        assert!(!q.trashed);
        assert!(!q.favorites_only);
    }
}
