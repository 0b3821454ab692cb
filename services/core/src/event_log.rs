use crate::model::{EventRecord, EventType};
use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EventLogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

const EVENT_COLUMNS: &str = "id, seq, photo_id, event_type, message, metadata, timestamp";

/// Filter for the external event-log query. Both filters, when present, are
/// evaluated in the store.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub photo_id: Option<Uuid>,
    pub event_type: Option<EventType>,
    pub limit: i64,
    pub offset: i64,
}

/// Append-only event emission and queries.
///
/// Events for one photo are ordered by timestamp; the `seq` column breaks
/// ties within one wall-clock tick, so per-photo order is stable even for
/// sub-step events emitted back-to-back.
#[derive(Clone)]
pub struct EventLogService {
    pool: PgPool,
}

impl EventLogService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert one event with a server-assigned timestamp.
    #[instrument(skip(self, metadata), fields(photo_id = %photo_id, event_type = %event_type))]
    pub async fn append(
        &self,
        photo_id: Uuid,
        event_type: EventType,
        message: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<EventRecord, EventLogError> {
        let event = sqlx::query_as::<_, EventRecord>(&format!(
            "INSERT INTO event_log (id, photo_id, event_type, message, metadata, timestamp) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {EVENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(photo_id)
        .bind(event_type)
        .bind(message)
        .bind(metadata)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        metrics::counter!("events.appended").increment(1);
        debug!(photo_id = %photo_id, event_type = %event_type, "Appended event");
        Ok(event)
    }

    /// All events for one photo, newest first.
    pub async fn list_by_photo(&self, photo_id: Uuid) -> Result<Vec<EventRecord>, EventLogError> {
        let events = sqlx::query_as::<_, EventRecord>(&format!(
            "SELECT {EVENT_COLUMNS} FROM event_log \
             WHERE photo_id = $1 ORDER BY timestamp DESC, seq DESC"
        ))
        .bind(photo_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    /// Filtered, paginated query, newest first.
    #[instrument(skip(self))]
    pub async fn list(&self, query: &EventQuery) -> Result<Vec<EventRecord>, EventLogError> {
        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM event_log WHERE 1=1");
        let mut param = 0;

        if query.photo_id.is_some() {
            param += 1;
            sql.push_str(&format!(" AND photo_id = ${param}"));
        }
        if query.event_type.is_some() {
            param += 1;
            sql.push_str(&format!(" AND event_type = ${param}"));
        }
        sql.push_str(" ORDER BY timestamp DESC, seq DESC");
        param += 1;
        sql.push_str(&format!(" LIMIT ${param}"));
        param += 1;
        sql.push_str(&format!(" OFFSET ${param}"));

        let mut q = sqlx::query_as::<_, EventRecord>(&sql);
        if let Some(photo_id) = query.photo_id {
            q = q.bind(photo_id);
        }
        if let Some(event_type) = query.event_type {
            q = q.bind(event_type);
        }
        q = q.bind(query.limit).bind(query.offset);

        Ok(q.fetch_all(&self.pool).await?)
    }

    /// Count matching the same filters as [`list`], ignoring paging.
    pub async fn count(&self, query: &EventQuery) -> Result<i64, EventLogError> {
        let mut sql = String::from("SELECT COUNT(*) FROM event_log WHERE 1=1");
        let mut param = 0;
        if query.photo_id.is_some() {
            param += 1;
            sql.push_str(&format!(" AND photo_id = ${param}"));
        }
        if query.event_type.is_some() {
            param += 1;
            sql.push_str(&format!(" AND event_type = ${param}"));
        }

        let mut q = sqlx::query_as::<_, (i64,)>(&sql);
        if let Some(photo_id) = query.photo_id {
            q = q.bind(photo_id);
        }
        if let Some(event_type) = query.event_type {
            q = q.bind(event_type);
        }
        let (count,) = q.fetch_one(&self.pool).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_query_default() {
        let q = EventQuery::default();
        assert!(q.photo_id.is_none());
        assert!(q.event_type.is_none());
    }
}
