use crate::config::HttpConfig;
use crate::ingest::{FileFailure, FileUpload, IngestError, IngestPipeline};
use crate::realtime;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use photoflow_core::event_log::EventQuery;
use photoflow_core::lifecycle::{LifecycleCoordinator, TransitionOutcome};
use photoflow_core::photo_store::{PhotoQuery, PhotoStore};
use photoflow_core::{
    filename, BlobStore, ErrorCode, EventLogService, EventRecord, EventType, Photo, PhotoStatus,
    StatusBroker,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, instrument, warn};
use uuid::Uuid;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: PhotoStore,
    pub events: EventLogService,
    pub blob_store: Arc<BlobStore>,
    pub broker: Arc<StatusBroker>,
    pub lifecycle: Arc<LifecycleCoordinator>,
    pub ingest: Arc<IngestPipeline>,
}

/// Uniform error envelope for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

type ApiError = (StatusCode, Json<ErrorEnvelope>);
type ApiResult<T> = Result<T, ApiError>;

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        c if c.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(code: ErrorCode, message: impl Into<String>, path: &Uri) -> ApiError {
    failure_with_details(code, message, path, None)
}

fn failure_with_details(
    code: ErrorCode,
    message: impl Into<String>,
    path: &Uri,
    details: Option<serde_json::Value>,
) -> ApiError {
    (
        status_for(code),
        Json(ErrorEnvelope {
            error: code.as_str().to_string(),
            message: message.into(),
            timestamp: Utc::now(),
            path: path.path().to_string(),
            details,
        }),
    )
}

fn not_found(id: Uuid, path: &Uri) -> ApiError {
    failure(ErrorCode::NotFound, format!("Photo not found: {id}"), path)
}

fn db_failure(e: impl std::fmt::Display, path: &Uri) -> ApiError {
    error!(error = %e, "Database operation failed");
    failure(ErrorCode::DatabaseError, "Database operation failed", path)
}

/// Photo in API responses.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoResponse {
    pub id: Uuid,
    pub short_id: Option<String>,
    pub filename: String,
    pub original_filename: String,
    pub status: PhotoStatus,
    pub size: i64,
    pub mime_type: String,
    pub original_url: String,
    pub thumbnail_url: String,
    pub is_favorite: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl From<Photo> for PhotoResponse {
    fn from(p: Photo) -> Self {
        // The API proxies image bytes; clients never see storage paths.
        let original_url = format!("/api/photos/{}/image", p.id);
        let thumbnail_url = format!("/api/photos/{}/thumbnail", p.id);
        Self {
            id: p.id,
            short_id: p.short_id,
            filename: p.filename,
            original_filename: p.original_filename,
            status: p.status,
            size: p.size,
            mime_type: p.mime_type,
            original_url,
            thumbnail_url,
            is_favorite: p.is_favorite,
            deleted_at: p.deleted_at,
            uploaded_at: p.uploaded_at,
            processed_at: p.processed_at,
            updated_at: p.updated_at,
            metadata: p.metadata,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub id: Uuid,
    pub photo_id: Uuid,
    pub event_type: EventType,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl From<EventRecord> for EventResponse {
    fn from(e: EventRecord) -> Self {
        Self {
            id: e.id,
            photo_id: e.photo_id,
            event_type: e.event_type,
            message: e.message,
            metadata: e.metadata,
            timestamp: e.timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub photos: Vec<PhotoResponse>,
    pub failures: Vec<FileFailure>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoListResponse {
    pub photos: Vec<PhotoResponse>,
    pub total_count: i64,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListResponse {
    pub events: Vec<EventResponse>,
    pub total_count: i64,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct PhotoListParams {
    pub status: Option<PhotoStatus>,
    #[serde(default)]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub size: i64,
    #[serde(default = "default_sort")]
    pub sort: String,
}

fn default_page_size() -> i64 {
    20
}

fn default_sort() -> String {
    "uploadedAt,desc".to_string()
}

/// Split `"uploadedAt,desc"` into key and direction.
fn parse_sort(sort: &str) -> (String, bool) {
    let mut parts = sort.splitn(2, ',');
    let key = parts.next().unwrap_or("uploadedAt").to_string();
    let ascending = parts
        .next()
        .map(|d| d.eq_ignore_ascii_case("asc"))
        .unwrap_or(true);
    (key, ascending)
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: PhotoStatus,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub filename: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollParams {
    pub since: Option<String>,
    pub photo_ids: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub updated_photos: Vec<UpdatedPhoto>,
    /// Thread this back as `since` on the next call
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedPhoto {
    pub id: Uuid,
    pub status: PhotoStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListParams {
    pub photo_id: Option<Uuid>,
    pub event_type: Option<EventType>,
    #[serde(default)]
    pub page: i64,
    #[serde(default = "default_event_page_size")]
    pub size: i64,
}

fn default_event_page_size() -> i64 {
    50
}

/// Build the API router.
pub fn create_router(state: AppState, config: &HttpConfig, max_body_bytes: usize) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/photos", post(upload_photos).get(list_photos))
        .route("/api/photos/favorites", get(list_favorites))
        .route("/api/photos/trash", get(list_trash))
        .route("/api/photos/status", get(poll_status))
        .route("/api/photos/bulk-delete", post(bulk_delete))
        .route("/api/photos/bulk-restore", post(bulk_restore))
        .route("/api/photos/bulk-permanent-delete", post(bulk_permanent_delete))
        .route("/api/photos/:id", get(get_photo).delete(delete_photo))
        .route("/api/photos/:id/image", get(get_photo_image))
        .route("/api/photos/:id/thumbnail", get(get_photo_thumbnail))
        .route("/api/photos/:id/events", get(get_photo_events))
        .route("/api/photos/:id/status", put(update_photo_status))
        .route("/api/photos/:id/favorite", put(toggle_favorite))
        .route("/api/photos/:id/rename", put(rename_photo))
        .route("/api/photos/:id/restore", post(restore_photo))
        .route("/api/photos/:id/permanent", delete(permanent_delete_photo))
        .route("/api/events", get(list_events))
        .route("/ws", get(realtime::ws_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "photoflow-api"
    }))
}

async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(state.store.pool()).await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Upload one or more photos; multipart body, one part per file.
#[instrument(skip(state, multipart))]
async fn upload_photos(
    State(state): State<AppState>,
    uri: Uri,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        failure(
            ErrorCode::ValidationError,
            format!("Malformed multipart body: {e}"),
            &uri,
        )
    })? {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue; // not a file part
        };
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        // Copy the bytes into an owned buffer before the request body goes
        // away; the upload pool outlives this read.
        let bytes = field.bytes().await.map_err(|e| {
            failure(
                ErrorCode::ValidationError,
                format!("Failed to read file {name}: {e}"),
                &uri,
            )
        })?;

        files.push(FileUpload {
            original_filename: name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    match state.ingest.ingest(files).await {
        Ok(report) => Ok((
            StatusCode::CREATED,
            Json(UploadResponse {
                photos: report.photos.into_iter().map(Into::into).collect(),
                failures: report.failures,
            }),
        )),
        Err(IngestError::EmptyBatch) => {
            Err(failure(ErrorCode::ValidationError, "No files provided", &uri))
        }
        Err(e @ IngestError::BatchTooLarge { .. }) => {
            Err(failure(ErrorCode::ValidationError, e.to_string(), &uri))
        }
        Err(IngestError::AllFailed(failures)) => Err(failure_with_details(
            ErrorCode::ValidationError,
            "All files failed",
            &uri,
            Some(serde_json::json!({ "failures": failures })),
        )),
    }
}

async fn run_listing(
    state: &AppState,
    uri: &Uri,
    mut query: PhotoQuery,
) -> ApiResult<Json<PhotoListResponse>> {
    let size = query.limit;
    query.limit = size + 1; // fetch one extra to detect another page
    let mut photos = state.store.list(&query).await.map_err(|e| db_failure(e, uri))?;

    let has_more = photos.len() as i64 > size;
    if has_more {
        photos.pop();
    }
    let total_count = state.store.count(&query).await.map_err(|e| db_failure(e, uri))?;

    Ok(Json(PhotoListResponse {
        photos: photos.into_iter().map(Into::into).collect(),
        total_count,
        has_more,
    }))
}

/// List photos with optional status filter; trashed photos are excluded.
#[instrument(skip(state))]
async fn list_photos(
    State(state): State<AppState>,
    uri: Uri,
    Query(params): Query<PhotoListParams>,
) -> ApiResult<Json<PhotoListResponse>> {
    let (sort, ascending) = parse_sort(&params.sort);
    let query = PhotoQuery {
        status: params.status,
        favorites_only: false,
        trashed: false,
        sort,
        ascending,
        limit: params.size.clamp(1, 500),
        offset: params.page.max(0) * params.size.max(1),
    };
    run_listing(&state, &uri, query).await
}

#[instrument(skip(state))]
async fn list_favorites(
    State(state): State<AppState>,
    uri: Uri,
    Query(params): Query<PhotoListParams>,
) -> ApiResult<Json<PhotoListResponse>> {
    let (sort, ascending) = parse_sort(&params.sort);
    let query = PhotoQuery {
        status: params.status,
        favorites_only: true,
        trashed: false,
        sort,
        ascending,
        limit: params.size.clamp(1, 500),
        offset: params.page.max(0) * params.size.max(1),
    };
    run_listing(&state, &uri, query).await
}

#[instrument(skip(state))]
async fn list_trash(
    State(state): State<AppState>,
    uri: Uri,
    Query(params): Query<PhotoListParams>,
) -> ApiResult<Json<PhotoListResponse>> {
    let query = PhotoQuery {
        status: params.status,
        favorites_only: false,
        trashed: true,
        sort: "deletedAt".to_string(),
        ascending: false,
        limit: params.size.clamp(1, 500),
        offset: params.page.max(0) * params.size.max(1),
    };
    run_listing(&state, &uri, query).await
}

/// Fetch a photo visible to clients: missing or soft-deleted is 404.
async fn fetch_visible(state: &AppState, id: Uuid, uri: &Uri) -> ApiResult<Photo> {
    let photo = state
        .store
        .find_by_id(id)
        .await
        .map_err(|e| db_failure(e, uri))?;
    match photo {
        Some(p) if !p.is_trashed() => Ok(p),
        _ => Err(not_found(id, uri)),
    }
}

#[instrument(skip(state))]
async fn get_photo(
    State(state): State<AppState>,
    uri: Uri,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PhotoResponse>> {
    let photo = fetch_visible(&state, id, &uri).await?;
    Ok(Json(photo.into()))
}

/// Serve the original bytes through the API.
#[instrument(skip(state))]
async fn get_photo_image(
    State(state): State<AppState>,
    uri: Uri,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let photo = fetch_visible(&state, id, &uri).await?;
    let bytes = state.blob_store.get_photo(&photo.filename).await.map_err(|e| {
        error!(photo_id = %id, error = %e, "Failed to fetch photo bytes");
        failure(ErrorCode::StorageError, "Failed to fetch photo", &uri)
    })?;
    Ok(image_response(photo, bytes))
}

/// Serve the thumbnail, falling back to the original when absent.
#[instrument(skip(state))]
async fn get_photo_thumbnail(
    State(state): State<AppState>,
    uri: Uri,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let photo = fetch_visible(&state, id, &uri).await?;

    let bytes = if photo.thumbnail_path.is_some() {
        match state.blob_store.get_thumbnail(&photo.filename).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(photo_id = %id, error = %e, "Thumbnail missing, serving original");
                state.blob_store.get_photo(&photo.filename).await.map_err(|e| {
                    failure(ErrorCode::StorageError, format!("Failed to fetch photo: {e}"), &uri)
                })?
            }
        }
    } else {
        state.blob_store.get_photo(&photo.filename).await.map_err(|e| {
            failure(ErrorCode::StorageError, format!("Failed to fetch photo: {e}"), &uri)
        })?
    };

    Ok(image_response(photo, bytes))
}

fn image_response(photo: Photo, bytes: Vec<u8>) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, photo.mime_type),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", photo.original_filename),
            ),
        ],
        bytes,
    )
}

/// Internal status update; lifecycle-coordinator rules apply.
#[instrument(skip(state))]
async fn update_photo_status(
    State(state): State<AppState>,
    uri: Uri,
    Path(id): Path<Uuid>,
    Json(request): Json<StatusUpdateRequest>,
) -> ApiResult<Json<PhotoResponse>> {
    let message = request
        .message
        .unwrap_or_else(|| format!("Photo status updated to {}", request.status));

    match state.lifecycle.transition(id, request.status, &message).await {
        Ok(TransitionOutcome::Applied(photo)) | Ok(TransitionOutcome::Noop(photo)) => {
            Ok(Json(photo.into()))
        }
        Ok(TransitionOutcome::Missing) => Err(not_found(id, &uri)),
        Err(photoflow_core::lifecycle::LifecycleError::InvalidTransition { from, to }) => {
            Err(failure(
                ErrorCode::ValidationError,
                format!("Transition {from} -> {to} is not allowed"),
                &uri,
            ))
        }
        Err(e) => Err(db_failure(e, &uri)),
    }
}

#[instrument(skip(state))]
async fn toggle_favorite(
    State(state): State<AppState>,
    uri: Uri,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PhotoResponse>> {
    match state.store.toggle_favorite(id).await {
        Ok(Some(photo)) => Ok(Json(photo.into())),
        Ok(None) => Err(not_found(id, &uri)),
        Err(e) => Err(db_failure(e, &uri)),
    }
}

#[instrument(skip(state, request))]
async fn rename_photo(
    State(state): State<AppState>,
    uri: Uri,
    Path(id): Path<Uuid>,
    Json(request): Json<RenameRequest>,
) -> ApiResult<Json<PhotoResponse>> {
    let trimmed = request.filename.trim();
    if trimmed.is_empty() {
        return Err(failure(
            ErrorCode::ValidationError,
            "Filename cannot be empty",
            &uri,
        ));
    }

    let old = fetch_visible(&state, id, &uri).await?.original_filename;
    let sanitized = filename::sanitize(trimmed);

    match state.store.rename(id, &sanitized).await {
        Ok(Some(photo)) => {
            if let Err(e) = state
                .events
                .append(
                    id,
                    EventType::Renamed,
                    &format!("Photo renamed from '{old}' to '{sanitized}'"),
                    None,
                )
                .await
            {
                warn!(photo_id = %id, error = %e, "Failed to record rename event");
            }
            Ok(Json(photo.into()))
        }
        Ok(None) => Err(not_found(id, &uri)),
        Err(e) => Err(db_failure(e, &uri)),
    }
}

/// Soft delete. A missing photo is a no-op; conflicts retry once inside the
/// store.
#[instrument(skip(state))]
async fn delete_photo(
    State(state): State<AppState>,
    uri: Uri,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    match state.store.soft_delete(id).await {
        Ok(_) => Ok(StatusCode::NO_CONTENT),
        Err(e) => Err(db_failure(e, &uri)),
    }
}

#[instrument(skip(state))]
async fn restore_photo(
    State(state): State<AppState>,
    uri: Uri,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PhotoResponse>> {
    match state.store.restore(id).await {
        Ok(Some(photo)) => {
            if let Err(e) = state
                .events
                .append(id, EventType::Restored, "Photo restored from trash", None)
                .await
            {
                warn!(photo_id = %id, error = %e, "Failed to record restore event");
            }
            Ok(Json(photo.into()))
        }
        Ok(None) => Err(not_found(id, &uri)),
        Err(e) => Err(db_failure(e, &uri)),
    }
}

/// Remove the row, the blob, and the thumbnail. Blob cleanup failures are
/// logged, not surfaced; the row is already gone.
#[instrument(skip(state))]
async fn permanent_delete_photo(
    State(state): State<AppState>,
    uri: Uri,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let removed = state
        .store
        .delete_by_id(id)
        .await
        .map_err(|e| db_failure(e, &uri))?;

    if let Some(photo) = removed {
        cleanup_blobs(&state, &photo).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn cleanup_blobs(state: &AppState, photo: &Photo) {
    if let Err(e) = state.blob_store.delete_photo(&photo.filename).await {
        warn!(photo_id = %photo.id, error = %e, "Failed to delete photo blob");
    }
    if photo.thumbnail_path.is_some() {
        if let Err(e) = state.blob_store.delete_thumbnail(&photo.filename).await {
            warn!(photo_id = %photo.id, error = %e, "Failed to delete thumbnail blob");
        }
    }
}

#[instrument(skip(state))]
async fn bulk_delete(
    State(state): State<AppState>,
    uri: Uri,
    Json(ids): Json<Vec<Uuid>>,
) -> ApiResult<StatusCode> {
    if ids.is_empty() {
        return Err(failure(ErrorCode::ValidationError, "No ids provided", &uri));
    }
    for id in ids {
        if let Err(e) = state.store.soft_delete(id).await {
            warn!(photo_id = %id, error = %e, "Bulk soft delete failed for photo");
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
async fn bulk_restore(
    State(state): State<AppState>,
    uri: Uri,
    Json(ids): Json<Vec<Uuid>>,
) -> ApiResult<StatusCode> {
    if ids.is_empty() {
        return Err(failure(ErrorCode::ValidationError, "No ids provided", &uri));
    }
    for id in ids {
        match state.store.restore(id).await {
            Ok(Some(_)) => {
                if let Err(e) = state
                    .events
                    .append(id, EventType::Restored, "Photo restored from trash", None)
                    .await
                {
                    warn!(photo_id = %id, error = %e, "Failed to record restore event");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(photo_id = %id, error = %e, "Bulk restore failed for photo"),
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
async fn bulk_permanent_delete(
    State(state): State<AppState>,
    uri: Uri,
    Json(ids): Json<Vec<Uuid>>,
) -> ApiResult<StatusCode> {
    if ids.is_empty() {
        return Err(failure(ErrorCode::ValidationError, "No ids provided", &uri));
    }

    // Collect the rows first so blob cleanup still happens for rows another
    // request deletes between the two steps.
    let photos = state
        .store
        .find_all_by_ids(&ids)
        .await
        .map_err(|e| db_failure(e, &uri))?;

    for photo in &photos {
        if let Err(e) = state.store.delete_by_id(photo.id).await {
            warn!(photo_id = %photo.id, error = %e, "Bulk permanent delete failed for photo");
            continue;
        }
        cleanup_blobs(&state, photo).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Polling fallback: photos updated since `since`, optionally restricted to
/// an id set. The returned `timestamp` is the next call's `since`.
#[instrument(skip(state))]
async fn poll_status(
    State(state): State<AppState>,
    uri: Uri,
    Query(params): Query<PollParams>,
) -> ApiResult<Json<PollResponse>> {
    let since = match &params.since {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| {
                failure(
                    ErrorCode::ValidationError,
                    format!("Invalid timestamp: {raw}"),
                    &uri,
                )
            })?,
        None => Utc::now() - Duration::hours(1),
    };

    let ids = match &params.photo_ids {
        Some(raw) if !raw.is_empty() => {
            let parsed: Result<Vec<Uuid>, _> =
                raw.split(',').map(|s| Uuid::parse_str(s.trim())).collect();
            Some(parsed.map_err(|_| {
                failure(
                    ErrorCode::ValidationError,
                    "Invalid photo ID format. Expected UUID format.",
                    &uri,
                )
            })?)
        }
        _ => None,
    };

    let timestamp = Utc::now();
    let photos = state
        .store
        .find_updated_after(since, ids.as_deref())
        .await
        .map_err(|e| db_failure(e, &uri))?;

    Ok(Json(PollResponse {
        updated_photos: photos
            .into_iter()
            .map(|p| UpdatedPhoto {
                id: p.id,
                status: p.status,
                updated_at: p.updated_at,
            })
            .collect(),
        timestamp,
    }))
}

/// Event history for one photo, newest first.
#[instrument(skip(state))]
async fn get_photo_events(
    State(state): State<AppState>,
    uri: Uri,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<EventResponse>>> {
    let events = state
        .events
        .list_by_photo(id)
        .await
        .map_err(|e| db_failure(e, &uri))?;
    Ok(Json(events.into_iter().map(Into::into).collect()))
}

/// Event-log query: by photo, by type, or both, paginated.
#[instrument(skip(state))]
async fn list_events(
    State(state): State<AppState>,
    uri: Uri,
    Query(params): Query<EventListParams>,
) -> ApiResult<Json<EventListResponse>> {
    let size = params.size.clamp(1, 10_000);
    let query = EventQuery {
        photo_id: params.photo_id,
        event_type: params.event_type,
        limit: size + 1,
        offset: params.page.max(0) * size,
    };

    let mut events = state.events.list(&query).await.map_err(|e| db_failure(e, &uri))?;
    let has_more = events.len() as i64 > size;
    if has_more {
        events.pop();
    }
    let total_count = state.events.count(&query).await.map_err(|e| db_failure(e, &uri))?;

    Ok(Json(EventListResponse {
        events: events.into_iter().map(Into::into).collect(),
        total_count,
        has_more,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sort() {
        assert_eq!(parse_sort("uploadedAt,desc"), ("uploadedAt".to_string(), false));
        assert_eq!(parse_sort("size,asc"), ("size".to_string(), true));
        assert_eq!(parse_sort("updatedAt"), ("updatedAt".to_string(), true));
        assert_eq!(parse_sort(""), ("".to_string(), true));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorCode::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorCode::FileTooLarge), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(ErrorCode::UnsupportedFormat),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(ErrorCode::StorageError),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_envelope_shape() {
        let envelope = ErrorEnvelope {
            error: "VALIDATION_ERROR".to_string(),
            message: "No files provided".to_string(),
            timestamp: Utc::now(),
            path: "/api/photos".to_string(),
            details: None,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["error"], "VALIDATION_ERROR");
        assert!(json.get("details").is_none());
    }
}
