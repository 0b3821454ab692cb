//! Durable job stream with consumer groups, backed by PostgreSQL.
//!
//! Semantics mirror a consumer-group stream: records are appended to a named
//! stream, each group tracks a delivery cursor, delivered-but-unacknowledged
//! records sit in a pending table, and pending records idle past a threshold
//! can be claimed by another consumer. Delivery is at-least-once; callers are
//! responsible for idempotent processing.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Consumer group {group} does not exist for stream {stream}")]
    GroupMissing { stream: String, group: String },

    #[error("Failed to serialize queue message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Identifier of a record within a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MessageId(pub i64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record handed to a consumer; stays pending until acknowledged.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: MessageId,
    pub body: serde_json::Value,
    /// How many times this record has been delivered (1 on first delivery)
    pub delivery_count: i32,
}

impl Delivery {
    /// Deserialize the record body.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, QueueError> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// Photo processing job appended by the ingest pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub photo_id: Uuid,
    pub filename: String,
    pub storage_path: String,
}

/// Client for the Postgres-backed stream queue.
#[derive(Clone)]
pub struct StreamQueue {
    pool: PgPool,
}

impl StreamQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a record to a stream. The stream exists implicitly once the
    /// first record lands.
    #[instrument(skip(self, body), fields(stream = %stream))]
    pub async fn append<T: Serialize>(
        &self,
        stream: &str,
        body: &T,
    ) -> Result<MessageId, QueueError> {
        let json = serde_json::to_value(body)?;
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO stream_message (stream_name, body) VALUES ($1, $2) RETURNING id",
        )
        .bind(stream)
        .bind(&json)
        .fetch_one(&self.pool)
        .await?;

        metrics::counter!("queue.messages.appended").increment(1);
        debug!(stream = %stream, message_id = id, "Appended record");
        Ok(MessageId(id))
    }

    /// Create a consumer group. An existing group is success.
    pub async fn create_group(&self, stream: &str, group: &str) -> Result<(), QueueError> {
        sqlx::query(
            "INSERT INTO stream_group (stream_name, group_name) VALUES ($1, $2) \
             ON CONFLICT (stream_name, group_name) DO NOTHING",
        )
        .bind(stream)
        .bind(group)
        .execute(&self.pool)
        .await?;

        debug!(stream = %stream, group = %group, "Consumer group ready");
        Ok(())
    }

    /// Read up to `count` new records for `consumer`, marking each pending.
    ///
    /// Advances the group cursor and inserts pending rows in one transaction,
    /// so a crash between delivery and acknowledgement leaves the records
    /// reclaimable rather than lost.
    #[instrument(skip(self), fields(stream = %stream, group = %group, consumer = %consumer))]
    pub async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: i64,
    ) -> Result<Vec<Delivery>, QueueError> {
        let mut tx = self.pool.begin().await?;

        let cursor: Option<(i64,)> = sqlx::query_as(
            "SELECT last_delivered_id FROM stream_group \
             WHERE stream_name = $1 AND group_name = $2 FOR UPDATE",
        )
        .bind(stream)
        .bind(group)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((last_delivered_id,)) = cursor else {
            return Err(QueueError::GroupMissing {
                stream: stream.to_string(),
                group: group.to_string(),
            });
        };

        let rows: Vec<(i64, serde_json::Value)> = sqlx::query_as(
            "SELECT id, body FROM stream_message \
             WHERE stream_name = $1 AND id > $2 ORDER BY id LIMIT $3",
        )
        .bind(stream)
        .bind(last_delivered_id)
        .bind(count)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let now = Utc::now();
        for (id, _) in &rows {
            sqlx::query(
                "INSERT INTO stream_pending \
                 (stream_name, group_name, message_id, consumer, delivered_at) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(stream)
            .bind(group)
            .bind(id)
            .bind(consumer)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let max_id = rows.last().map(|(id, _)| *id).unwrap_or(last_delivered_id);
        sqlx::query(
            "UPDATE stream_group SET last_delivered_id = $3 \
             WHERE stream_name = $1 AND group_name = $2",
        )
        .bind(stream)
        .bind(group)
        .bind(max_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        metrics::counter!("queue.messages.delivered").increment(rows.len() as u64);
        Ok(rows
            .into_iter()
            .map(|(id, body)| Delivery {
                id: MessageId(id),
                body,
                delivery_count: 1,
            })
            .collect())
    }

    /// Acknowledge a record, removing it from the group's pending list.
    pub async fn ack(&self, stream: &str, group: &str, id: MessageId) -> Result<(), QueueError> {
        sqlx::query(
            "DELETE FROM stream_pending \
             WHERE stream_name = $1 AND group_name = $2 AND message_id = $3",
        )
        .bind(stream)
        .bind(group)
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        metrics::counter!("queue.messages.acked").increment(1);
        debug!(stream = %stream, message_id = %id, "Acknowledged record");
        Ok(())
    }

    /// Claim up to `count` pending records idle longer than `min_idle`,
    /// transferring them to `consumer` and bumping their delivery count.
    #[instrument(skip(self), fields(stream = %stream, group = %group, consumer = %consumer))]
    pub async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: i64,
    ) -> Result<Vec<Delivery>, QueueError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(min_idle).unwrap_or_else(|_| chrono::Duration::zero());

        let claimed: Vec<(i64, i32)> = sqlx::query_as(
            "UPDATE stream_pending SET consumer = $4, delivered_at = now(), \
                    delivery_count = delivery_count + 1 \
             WHERE (stream_name, group_name, message_id) IN ( \
                 SELECT stream_name, group_name, message_id FROM stream_pending \
                 WHERE stream_name = $1 AND group_name = $2 AND delivered_at < $5 \
                 ORDER BY delivered_at ASC LIMIT $3 \
                 FOR UPDATE SKIP LOCKED) \
             RETURNING message_id, delivery_count",
        )
        .bind(stream)
        .bind(group)
        .bind(count)
        .bind(consumer)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        if claimed.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = claimed.iter().map(|(id, _)| *id).collect();
        let bodies: Vec<(i64, serde_json::Value)> = sqlx::query_as(
            "SELECT id, body FROM stream_message WHERE id = ANY($1) ORDER BY id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        metrics::counter!("queue.messages.reclaimed").increment(claimed.len() as u64);
        debug!(
            stream = %stream,
            group = %group,
            claimed = claimed.len(),
            "Claimed pending records"
        );

        let counts: std::collections::HashMap<i64, i32> = claimed.into_iter().collect();
        Ok(bodies
            .into_iter()
            .map(|(id, body)| Delivery {
                id: MessageId(id),
                body,
                delivery_count: counts.get(&id).copied().unwrap_or(1),
            })
            .collect())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_message_roundtrip() {
        let job = JobMessage {
            photo_id: Uuid::new_v4(),
            filename: "8d3f.png".to_string(),
            storage_path: "photos/8d3f.png".to_string(),
        };
        let json = serde_json::to_value(&job).unwrap();
        // Wire field names are camelCase
        assert!(json.get("photoId").is_some());
        assert!(json.get("storagePath").is_some());

        let delivery = Delivery {
            id: MessageId(7),
            body: json,
            delivery_count: 1,
        };
        let decoded: JobMessage = delivery.decode().unwrap();
        assert_eq!(decoded.photo_id, job.photo_id);
        assert_eq!(decoded.filename, "8d3f.png");
    }

    #[test]
    fn test_decode_rejects_malformed_body() {
        let delivery = Delivery {
            id: MessageId(1),
            body: serde_json::json!({"photoId": "not-a-uuid"}),
            delivery_count: 1,
        };
        assert!(delivery.decode::<JobMessage>().is_err());
    }

    #[test]
    fn test_message_id_display() {
        assert_eq!(MessageId(42).to_string(), "42");
    }
}
