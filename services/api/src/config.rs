use photoflow_core::config::{DatabaseConfig, NotifyConfig, ObjectStoreConfig, QueueConfig};
use serde::Deserialize;

/// Main configuration for the ingest node.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// Service-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins; empty means any
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Ingest pipeline limits.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Per-file size cap in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: usize,
    /// Files per batch
    #[serde(default = "default_max_batch_files")]
    pub max_batch_files: usize,
    /// Whole-request body cap in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Concurrent blob uploads per ingest call
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,
}

fn default_service_name() -> String {
    "photoflow-api".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_max_file_size() -> usize {
    10 * 1024 * 1024 // 10 MiB
}

fn default_max_batch_files() -> usize {
    1000
}

fn default_max_body_bytes() -> usize {
    5 * 1024 * 1024 * 1024 // 5 GiB
}

fn default_upload_concurrency() -> usize {
    10
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size(),
            max_batch_files: default_max_batch_files(),
            max_body_bytes: default_max_body_bytes(),
            upload_concurrency: default_upload_concurrency(),
        }
    }
}

impl Config {
    /// Load configuration from optional files and `API__`-prefixed
    /// environment variables (`API__DATABASE__URL` -> `database.url`).
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/api").required(false))
            .add_source(config::File::with_name("/etc/photoflow/api").required(false))
            .add_source(
                config::Environment::with_prefix("API")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_limits_defaults() {
        let ingest = IngestConfig::default();
        assert_eq!(ingest.max_file_size_bytes, 10 * 1024 * 1024);
        assert_eq!(ingest.max_batch_files, 1000);
        assert_eq!(ingest.max_body_bytes, 5 * 1024 * 1024 * 1024);
        assert_eq!(ingest.upload_concurrency, 10);
    }
}
