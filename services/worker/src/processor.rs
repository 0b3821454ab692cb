//! Photo processor: drives one queued photo through its lifecycle.
//!
//! Processing is a simulated four-step pipeline; each step emits a
//! `PROCESSING` event. Real image work (resize, compress, thumbnail) would
//! slot into the same steps.

use photoflow_core::lifecycle::{LifecycleCoordinator, LifecycleError, TransitionOutcome};
use photoflow_core::stream_queue::JobMessage;
use photoflow_core::{EventLogService, EventType, PhotoStatus, PhotoStore};
use rand::Rng;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Simulated processing steps: duration range and the event message.
const STEPS: &[(RangeInclusive<u64>, &str)] = &[
    (500..=1000, "File validation completed"),
    (500..=1000, "Metadata extracted"),
    (1000..=2000, "Thumbnail created"),
    (500..=1000, "Image optimization completed"),
];

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Status transition failed: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Metadata store error: {0}")]
    Repo(#[from] photoflow_core::photo_store::RepoError),

    #[error("Event emission failed: {0}")]
    EventLog(#[from] photoflow_core::event_log::EventLogError),

    /// The photo is not yet in a state this message can drive (e.g. the
    /// Queued transition has not committed). The message stays pending and
    /// the reclaim loop retries it.
    #[error("Photo {photo_id} not ready for processing: {reason}")]
    NotReady { photo_id: Uuid, reason: String },
}

pub struct PhotoProcessor {
    store: PhotoStore,
    events: EventLogService,
    lifecycle: Arc<LifecycleCoordinator>,
}

impl PhotoProcessor {
    pub fn new(
        store: PhotoStore,
        events: EventLogService,
        lifecycle: Arc<LifecycleCoordinator>,
    ) -> Self {
        Self {
            store,
            events,
            lifecycle,
        }
    }

    /// Process one job to a terminal outcome.
    ///
    /// `Ok(())` means the message may be acknowledged, including the cases
    /// where the photo is gone, already terminal, or was driven to `Failed`.
    /// `Err` leaves the message pending for the reclaim loop.
    #[instrument(skip(self, job), fields(photo_id = %job.photo_id, filename = %job.filename))]
    pub async fn process(&self, job: &JobMessage) -> Result<(), ProcessError> {
        let photo_id = job.photo_id;

        // Deleted before dispatch: acknowledge and discard.
        if !self.store.exists(photo_id).await? {
            info!(photo_id = %photo_id, "Photo gone before processing, discarding job");
            return Ok(());
        }

        match self
            .lifecycle
            .transition(photo_id, PhotoStatus::Processing, "Photo processing started")
            .await
        {
            Ok(TransitionOutcome::Applied(_)) => {}
            Ok(TransitionOutcome::Noop(photo)) => {
                // Terminal already; a redelivered message must not regress it.
                info!(
                    photo_id = %photo_id,
                    status = %photo.status,
                    "Photo already terminal, discarding redelivered job"
                );
                return Ok(());
            }
            Ok(TransitionOutcome::Missing) => {
                info!(photo_id = %photo_id, "Photo gone at processing start, discarding job");
                return Ok(());
            }
            Err(LifecycleError::InvalidTransition { from, to }) => {
                // The Queued transition may not have committed yet; retry
                // through the pending list.
                warn!(photo_id = %photo_id, %from, %to, "Photo not ready, leaving job pending");
                return Err(ProcessError::NotReady {
                    photo_id,
                    reason: format!("{from} -> {to}"),
                });
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.simulate(photo_id, &job.filename).await {
            return self.fail(photo_id, e).await;
        }

        // Deleted during processing: acknowledge and discard (the row is
        // gone, there is no status to complete).
        if !self.store.exists(photo_id).await? {
            info!(photo_id = %photo_id, "Photo deleted during processing, discarding job");
            return Ok(());
        }

        match self
            .lifecycle
            .transition(
                photo_id,
                PhotoStatus::Completed,
                "Photo processing completed successfully",
            )
            .await
        {
            Ok(_) => {
                metrics::counter!("worker.photos.completed").increment(1);
                info!(photo_id = %photo_id, "Photo processing completed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run the simulated steps, emitting one `PROCESSING` event per step.
    async fn simulate(&self, photo_id: Uuid, filename: &str) -> Result<(), ProcessError> {
        for (range, message) in STEPS {
            let millis = rand::thread_rng().gen_range(range.clone());
            debug!(photo_id = %photo_id, filename = %filename, step = %message, millis, "Running step");
            tokio::time::sleep(Duration::from_millis(millis)).await;
            self.events
                .append(photo_id, EventType::Processing, message, None)
                .await?;
        }
        Ok(())
    }

    /// Drive the photo to `Failed` after a processing error. Once the Failed
    /// transition lands the message is acknowledged; no retry follows a
    /// recorded failure.
    async fn fail(&self, photo_id: Uuid, cause: ProcessError) -> Result<(), ProcessError> {
        warn!(photo_id = %photo_id, error = %cause, "Photo processing failed");
        metrics::counter!("worker.photos.failed").increment(1);

        if !self.store.exists(photo_id).await? {
            info!(photo_id = %photo_id, "Photo gone, skipping Failed transition");
            return Ok(());
        }

        self.lifecycle
            .transition(
                photo_id,
                PhotoStatus::Failed,
                &format!("Photo processing failed: {cause}"),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_table_matches_contract() {
        assert_eq!(STEPS.len(), 4);
        let (total_min, total_max) = STEPS.iter().fold((0u64, 0u64), |(lo, hi), (range, _)| {
            (lo + range.start(), hi + range.end())
        });
        // Total simulated time: 2.5 - 5.0 s
        assert_eq!(total_min, 2500);
        assert_eq!(total_max, 5000);
        assert_eq!(STEPS[2].1, "Thumbnail created");
    }

    #[test]
    fn test_step_durations_within_ranges() {
        let mut rng = rand::thread_rng();
        for (range, _) in STEPS {
            for _ in 0..100 {
                let millis = rng.gen_range(range.clone());
                assert!(range.contains(&millis));
            }
        }
    }
}
