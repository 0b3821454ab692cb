use photoflow_core::config::{DatabaseConfig, NotifyConfig, QueueConfig};
use serde::Deserialize;
use tracing::warn;

/// Main configuration for the worker node.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Processing pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    /// Concurrent photo processings per worker process
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_service_name() -> String {
    "photoflow-worker".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

fn default_pool_size() -> usize {
    40
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

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
        }
    }
}

impl Config {
    /// Load configuration from optional files and `WORKER__`-prefixed
    /// environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/worker").required(false))
            .add_source(config::File::with_name("/etc/photoflow/worker").required(false))
            .add_source(
                config::Environment::with_prefix("WORKER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut parsed: Self = config.try_deserialize()?;
        parsed.enforce_pool_floor();
        Ok(parsed)
    }

    /// Each in-flight job holds a connection across status transitions and
    /// event inserts; a pool smaller than the processing pool serializes the
    /// workers.
    fn enforce_pool_floor(&mut self) {
        let floor = (self.processing.pool_size + 10) as u32;
        if self.database.max_connections < floor {
            warn!(
                configured = self.database.max_connections,
                floor,
                "Database pool below processing pool floor, raising it"
            );
            self.database.max_connections = floor;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_floor_is_enforced() {
        let mut config = Config {
            service: ServiceConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/photoflow".to_string(),
                max_connections: 20,
                min_connections: 10,
                acquire_timeout_secs: 30,
                idle_timeout_secs: 600,
                run_migrations: false,
            },
            queue: QueueConfig::default(),
            notify: NotifyConfig::default(),
            processing: ProcessingConfig::default(),
        };
        config.enforce_pool_floor();
        assert_eq!(config.database.max_connections, 50);
    }

    #[test]
    fn test_pool_above_floor_untouched() {
        let mut config = Config {
            service: ServiceConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/photoflow".to_string(),
                max_connections: 80,
                min_connections: 10,
                acquire_timeout_secs: 30,
                idle_timeout_secs: 600,
                run_migrations: false,
            },
            queue: QueueConfig::default(),
            notify: NotifyConfig::default(),
            processing: ProcessingConfig::default(),
        };
        config.enforce_pool_floor();
        assert_eq!(config.database.max_connections, 80);
    }
}
