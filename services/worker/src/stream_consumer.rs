//! Consumer-group runtime.
//!
//! Two loops share one scheduler: a live loop reading new messages every
//! second, and a reclaim loop that every thirty seconds claims messages left
//! pending by a crashed or stalled consumer. Both dispatch into a bounded
//! processing pool and acknowledge only on success, so delivery is
//! at-least-once and a process crash leaves in-flight messages reclaimable.

use crate::processor::PhotoProcessor;
use photoflow_core::config::QueueConfig;
use photoflow_core::stream_queue::{Delivery, JobMessage, QueueError, StreamQueue};
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, instrument, warn};

pub struct StreamConsumer {
    queue: Arc<StreamQueue>,
    processor: Arc<PhotoProcessor>,
    config: QueueConfig,
    permits: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
}

impl StreamConsumer {
    pub fn new(
        queue: Arc<StreamQueue>,
        processor: Arc<PhotoProcessor>,
        config: QueueConfig,
        pool_size: usize,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            queue,
            processor,
            config,
            permits: Arc::new(Semaphore::new(pool_size)),
            shutdown_tx,
        }
    }

    /// Signal both loops to stop after their current tick.
    pub fn shutdown(&self) {
        info!("Signaling consumer shutdown");
        let _ = self.shutdown_tx.send(());
    }

    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Run the live and reclaim loops until shutdown. In-flight messages are
    /// left pending; the next consumer instance reclaims them.
    #[instrument(skip(self), fields(consumer = %self.config.consumer_name))]
    pub async fn run(&self) {
        info!(
            stream = %self.config.stream_name,
            group = %self.config.group_name,
            consumer = %self.config.consumer_name,
            "Starting consumer loops"
        );

        let mut shutdown_rx = self.shutdown_receiver();
        let mut live = tokio::time::interval(self.config.read_interval());
        let mut reclaim = tokio::time::interval(self.config.reclaim_interval());

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Consumer loops stopping");
                    break;
                }
                _ = live.tick() => {
                    self.poll_new().await;
                }
                _ = reclaim.tick() => {
                    self.reclaim_pending().await;
                }
            }
        }
    }

    /// Live loop body: read a batch of new messages and dispatch it. The
    /// dispatch is fire-and-forget so the next tick is never blocked by a
    /// slow batch.
    async fn poll_new(&self) {
        let deliveries = match self
            .queue
            .read_group(
                &self.config.stream_name,
                &self.config.group_name,
                &self.config.consumer_name,
                self.config.read_batch_size,
            )
            .await
        {
            Ok(deliveries) => deliveries,
            Err(QueueError::GroupMissing { .. }) => {
                // Nothing appended yet; skip this tick.
                debug!("Stream or consumer group not ready yet");
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to read from stream");
                metrics::counter!("worker.read.errors").increment(1);
                return;
            }
        };

        if deliveries.is_empty() {
            return;
        }

        debug!(count = deliveries.len(), "Read new messages");
        self.dispatch(deliveries);
    }

    /// Reclaim loop body: claim messages idle past the threshold and run
    /// them through the same path as fresh deliveries.
    async fn reclaim_pending(&self) {
        let claimed = match self
            .queue
            .claim(
                &self.config.stream_name,
                &self.config.group_name,
                &self.config.consumer_name,
                self.config.min_idle(),
                self.config.claim_batch_size,
            )
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                error!(error = %e, "Failed to claim pending messages");
                return;
            }
        };

        if claimed.is_empty() {
            return;
        }

        info!(count = claimed.len(), "Claimed pending messages for retry");
        self.dispatch(claimed);
    }

    /// Hand each delivery to the processing pool.
    fn dispatch(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            let queue = self.queue.clone();
            let processor = self.processor.clone();
            let permits = self.permits.clone();
            let stream = self.config.stream_name.clone();
            let group = self.config.group_name.clone();

            tokio::spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return; // pool closed during shutdown
                };
                Self::handle_delivery(&queue, &processor, &stream, &group, delivery).await;
            });
        }
    }

    /// Process one delivery; acknowledge on success, leave pending on error.
    async fn handle_delivery(
        queue: &StreamQueue,
        processor: &PhotoProcessor,
        stream: &str,
        group: &str,
        delivery: Delivery,
    ) {
        let job: JobMessage = match delivery.decode() {
            Ok(job) => job,
            Err(e) => {
                // A malformed record can never succeed; acknowledge it so it
                // does not circle through the reclaim loop forever.
                error!(message_id = %delivery.id, error = %e, "Discarding malformed message");
                if let Err(e) = queue.ack(stream, group, delivery.id).await {
                    error!(message_id = %delivery.id, error = %e, "Failed to ack malformed message");
                }
                return;
            }
        };

        debug!(
            message_id = %delivery.id,
            photo_id = %job.photo_id,
            delivery_count = delivery.delivery_count,
            "Processing message"
        );

        match processor.process(&job).await {
            Ok(()) => {
                if let Err(e) = queue.ack(stream, group, delivery.id).await {
                    // The message stays pending and will be reprocessed; the
                    // lifecycle coordinator makes the redelivery a no-op.
                    error!(message_id = %delivery.id, error = %e, "Failed to acknowledge message");
                    return;
                }
                metrics::counter!("worker.messages.processed").increment(1);
                debug!(message_id = %delivery.id, "Message acknowledged");
            }
            Err(e) => {
                warn!(
                    message_id = %delivery.id,
                    photo_id = %job.photo_id,
                    error = %e,
                    "Processing failed, message left pending for reclaim"
                );
                metrics::counter!("worker.messages.failed").increment(1);
            }
        }
    }
}
