use serde::Deserialize;
use std::time::Duration;

/// PostgreSQL connection pool configuration.
///
/// The pool must exceed the processing pool of the role using it: each
/// in-flight job holds a connection across status transitions and event
/// inserts.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of idle connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Acquisition timeout in seconds
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Object store (S3/MinIO) configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
    /// Bucket for original photos
    #[serde(default = "default_photos_bucket")]
    pub photos_bucket: String,
    /// Bucket for derived thumbnails
    #[serde(default = "default_thumbnails_bucket")]
    pub thumbnails_bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// Job stream and consumer-group configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Stream the ingest side appends photo jobs to
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    /// Consumer group the worker fleet joins
    #[serde(default = "default_group_name")]
    pub group_name: String,
    /// Consumer name within the group; unique per worker process
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,
    /// Messages read per live-loop tick
    #[serde(default = "default_read_batch_size")]
    pub read_batch_size: i64,
    /// Live-loop interval in milliseconds
    #[serde(default = "default_read_interval_ms")]
    pub read_interval_ms: u64,
    /// Pending messages claimed per reclaim pass
    #[serde(default = "default_claim_batch_size")]
    pub claim_batch_size: i64,
    /// Minimum idle time before a pending message is reclaimable, seconds
    #[serde(default = "default_min_idle_secs")]
    pub min_idle_secs: u64,
    /// Reclaim-loop interval in seconds
    #[serde(default = "default_reclaim_interval_secs")]
    pub reclaim_interval_secs: u64,
}

impl QueueConfig {
    pub fn read_interval(&self) -> Duration {
        Duration::from_millis(self.read_interval_ms)
    }

    pub fn min_idle(&self) -> Duration {
        Duration::from_secs(self.min_idle_secs)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }
}

/// Notification fabric configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Per-topic buffer size; slow subscribers lose the oldest entries
    #[serde(default = "default_topic_buffer")]
    pub topic_buffer: usize,
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    10
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_photos_bucket() -> String {
    "photos".to_string()
}

fn default_thumbnails_bucket() -> String {
    "thumbnails".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_stream_name() -> String {
    "photo_stream".to_string()
}

fn default_group_name() -> String {
    "workers".to_string()
}

fn default_consumer_name() -> String {
    "worker-1".to_string()
}

fn default_read_batch_size() -> i64 {
    40
}

fn default_read_interval_ms() -> u64 {
    1000
}

fn default_claim_batch_size() -> i64 {
    10
}

fn default_min_idle_secs() -> u64 {
    60
}

fn default_reclaim_interval_secs() -> u64 {
    30
}

fn default_topic_buffer() -> usize {
    256
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            topic_buffer: default_topic_buffer(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stream_name: default_stream_name(),
            group_name: default_group_name(),
            consumer_name: default_consumer_name(),
            read_batch_size: default_read_batch_size(),
            read_interval_ms: default_read_interval_ms(),
            claim_batch_size: default_claim_batch_size(),
            min_idle_secs: default_min_idle_secs(),
            reclaim_interval_secs: default_reclaim_interval_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_defaults_match_contract() {
        let q = QueueConfig::default();
        assert_eq!(q.stream_name, "photo_stream");
        assert_eq!(q.group_name, "workers");
        assert_eq!(q.read_batch_size, 40);
        assert_eq!(q.read_interval(), Duration::from_secs(1));
        assert_eq!(q.claim_batch_size, 10);
        assert_eq!(q.min_idle(), Duration::from_secs(60));
        assert_eq!(q.reclaim_interval(), Duration::from_secs(30));
    }
}
