//! PhotoFlow core: shared domain layer for the ingest and worker roles.
//!
//! The two process roles share one data plane: the metadata store
//! ([`photo_store`], [`event_log`]), the object store ([`blob_store`]), the
//! durable job stream ([`stream_queue`]), and the in-process notification
//! fabric ([`status_broker`]). Status mutation goes exclusively through the
//! [`lifecycle`] coordinator.

pub mod blob_store;
pub mod config;
pub mod error;
pub mod event_log;
pub mod filename;
pub mod lifecycle;
pub mod model;
pub mod photo_store;
pub mod short_id;
pub mod status_broker;
pub mod stream_queue;

pub use blob_store::{BlobStore, BlobStoreError};
pub use error::ErrorCode;
pub use event_log::{EventLogService, EventQuery};
pub use lifecycle::{LifecycleCoordinator, TransitionOutcome};
pub use model::{EventRecord, EventType, Photo, PhotoStatus, StatusUpdate};
pub use photo_store::{PhotoQuery, PhotoStore};
pub use status_broker::{photo_topic, StatusBroker, BROADCAST_TOPIC};
pub use stream_queue::{Delivery, JobMessage, MessageId, StreamQueue};
