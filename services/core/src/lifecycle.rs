//! Lifecycle coordinator: the sole authority for `photo.status` mutation.
//!
//! Every allowed transition atomically updates the row, appends the matching
//! event, and publishes a notification; the row lock serializes concurrent
//! transitions on the same photo into a linear history. Transitions on a
//! photo already in a terminal state are no-ops, which makes redelivered
//! queue messages harmless.

use crate::model::{EventType, Photo, PhotoStatus};
use crate::status_broker::StatusBroker;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Transition {from} -> {to} is not allowed")]
    InvalidTransition { from: PhotoStatus, to: PhotoStatus },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// What the transition table says about a `(current, target)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Perform the transition
    Apply,
    /// Silently ignore (idempotent terminal, or a repeated Processing start
    /// from a redelivered message)
    Noop,
    /// Programming error
    Reject,
}

/// Static transition table.
///
/// Terminal states absorb everything. `Processing -> Processing` re-applies
/// so a reclaimed message records a second processing start.
pub fn decide(current: PhotoStatus, target: PhotoStatus) -> Decision {
    use PhotoStatus::*;
    if current.is_terminal() {
        return Decision::Noop;
    }
    match (current, target) {
        (Uploaded, Queued) | (Uploaded, Failed) => Decision::Apply,
        (Queued, Processing) | (Queued, Failed) => Decision::Apply,
        (Processing, Completed) | (Processing, Failed) => Decision::Apply,
        (Processing, Processing) => Decision::Apply,
        _ => Decision::Reject,
    }
}

/// Result of a transition attempt.
#[derive(Debug)]
pub enum TransitionOutcome {
    /// The transition was applied; holds the updated row.
    Applied(Photo),
    /// The photo is already terminal (or repeated); nothing happened.
    Noop(Photo),
    /// The photo row no longer exists; nothing happened.
    Missing,
}

pub struct LifecycleCoordinator {
    pool: PgPool,
    broker: Arc<StatusBroker>,
}

impl LifecycleCoordinator {
    pub fn new(pool: PgPool, broker: Arc<StatusBroker>) -> Self {
        Self { pool, broker }
    }

    /// Drive a photo to `target`, appending the matching event and publishing
    /// the notification in the same transaction as the status write.
    ///
    /// A missing row is a logged no-op (covers the delete-during-processing
    /// race); a disallowed transition is an error.
    #[instrument(skip(self), fields(photo_id = %photo_id, target = %target))]
    pub async fn transition(
        &self,
        photo_id: Uuid,
        target: PhotoStatus,
        message: &str,
    ) -> Result<TransitionOutcome, LifecycleError> {
        let mut tx = self.pool.begin().await?;

        // Row-level lock serializes concurrent transitions on this photo.
        let photo: Option<Photo> = sqlx::query_as(
            "SELECT id, short_id, filename, original_filename, status, size, mime_type, \
                 storage_path, thumbnail_path, metadata, is_favorite, deleted_at, uploaded_at, \
                 processed_at, created_at, updated_at \
             FROM photo WHERE id = $1 FOR UPDATE",
        )
        .bind(photo_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(photo) = photo else {
            info!(photo_id = %photo_id, target = %target, "Photo gone, transition skipped");
            return Ok(TransitionOutcome::Missing);
        };

        match decide(photo.status, target) {
            Decision::Reject => {
                return Err(LifecycleError::InvalidTransition {
                    from: photo.status,
                    to: target,
                });
            }
            Decision::Noop => {
                info!(
                    photo_id = %photo_id,
                    current = %photo.status,
                    target = %target,
                    "Transition is a no-op"
                );
                return Ok(TransitionOutcome::Noop(photo));
            }
            Decision::Apply => {}
        }

        // One timestamp for the row update and the event keeps the history
        // aligned with the status change.
        let now = Utc::now();
        let terminal = target.is_terminal();

        let updated: Photo = sqlx::query_as(
            "UPDATE photo SET status = $2, updated_at = $3, \
                 processed_at = CASE WHEN $4 THEN $3 ELSE processed_at END \
             WHERE id = $1 \
             RETURNING id, short_id, filename, original_filename, status, size, mime_type, \
                 storage_path, thumbnail_path, metadata, is_favorite, deleted_at, uploaded_at, \
                 processed_at, created_at, updated_at",
        )
        .bind(photo_id)
        .bind(target)
        .bind(now)
        .bind(terminal)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO event_log (id, photo_id, event_type, message, timestamp) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(photo_id)
        .bind(EventType::from(target))
        .bind(message)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        // Published while the row lock is still held, so per-photo
        // notification order matches transition order.
        self.broker.publish(photo_id, target, message);

        tx.commit().await?;

        metrics::counter!("lifecycle.transitions", "to" => target.as_str()).increment(1);
        info!(
            photo_id = %photo_id,
            from = %photo.status,
            to = %target,
            "Photo status transitioned"
        );
        Ok(TransitionOutcome::Applied(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PhotoStatus::*;

    #[test]
    fn test_allowed_transitions() {
        assert_eq!(decide(Uploaded, Queued), Decision::Apply);
        assert_eq!(decide(Uploaded, Failed), Decision::Apply);
        assert_eq!(decide(Queued, Processing), Decision::Apply);
        assert_eq!(decide(Queued, Failed), Decision::Apply);
        assert_eq!(decide(Processing, Completed), Decision::Apply);
        assert_eq!(decide(Processing, Failed), Decision::Apply);
    }

    #[test]
    fn test_terminal_states_absorb() {
        for target in [Uploaded, Queued, Processing, Completed, Failed] {
            assert_eq!(decide(Completed, target), Decision::Noop);
            assert_eq!(decide(Failed, target), Decision::Noop);
        }
    }

    #[test]
    fn test_rejected_transitions() {
        assert_eq!(decide(Uploaded, Processing), Decision::Reject);
        assert_eq!(decide(Uploaded, Completed), Decision::Reject);
        assert_eq!(decide(Queued, Completed), Decision::Reject);
        assert_eq!(decide(Queued, Queued), Decision::Reject);
        assert_eq!(decide(Processing, Queued), Decision::Reject);
        // nothing ever transitions back to Uploaded
        for current in [Uploaded, Queued, Processing] {
            assert_eq!(decide(current, Uploaded), Decision::Reject);
        }
    }

    #[test]
    fn test_redelivered_processing_reapplies() {
        // A reclaimed message restarts processing on a photo that is already
        // Processing; a second start event must be recorded.
        assert_eq!(decide(Processing, Processing), Decision::Apply);
    }
}
