//! Runtime configuration.
//!
//! Values come from an optional YAML file named by `EMPUJE_CONFIG`, then
//! from environment variables, which take precedence over the file.

use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use empuje_core::registry::{OrganizationId, OrganizationRegistry};
use empuje_messaging::application::dispatcher::DispatcherSettings;
use serde::Deserialize;

use crate::error::AppError;
use crate::workers::ConsumerGroup;

/// Which transport carries federation messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    /// A partitioned log in `PostgreSQL`, shared by every node.
    Postgres,
    /// An in-process log; only nodes in this process see each other.
    Memory,
}

impl FromStr for BusBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown bus backend `{other}`")),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// This node's organization id.
    pub organization_id: String,
    /// Federation store database.
    pub database_url: String,
    /// Bus transport.
    pub bus_backend: BusBackend,
    /// Bus database; falls back to `database_url`.
    pub bus_database_url: Option<String>,
    /// Partitions per topic.
    pub bus_partitions: u32,
    /// Consumer group shared by every worker of this organization; defaults
    /// to `empuje-{organization_id}`.
    pub consumer_group_id: Option<String>,
    /// Worker tasks started by this process.
    pub consumer_workers: u32,
    /// Member index of this process's first worker.
    pub consumer_member_offset: u32,
    /// Total members in the group; defaults to `consumer_workers`.
    pub consumer_group_size: Option<u32>,
    /// Upper bound on applying one message.
    pub processing_timeout_ms: u64,
    /// Attempts before a deferred message is dead-lettered.
    pub max_delivery_attempts: u32,
    /// Base redelivery backoff.
    pub redelivery_backoff_ms: u64,
    /// Redelivery backoff ceiling.
    pub redelivery_backoff_cap_ms: u64,
    /// How long processed marks are kept.
    pub idempotency_retention_hours: u32,
    /// How long bus records are kept.
    pub bus_retention_hours: u32,
    /// Period of the retention sweeper.
    pub retention_sweep_interval_secs: u64,
    /// HTTP bind host.
    pub host: String,
    /// HTTP bind port.
    pub port: u16,
    /// OTLP collector endpoint; span export is disabled when unset.
    pub otlp_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            organization_id: "empuje-org-001".to_string(),
            database_url: String::new(),
            bus_backend: BusBackend::Postgres,
            bus_database_url: None,
            bus_partitions: 6,
            consumer_group_id: None,
            consumer_workers: 4,
            consumer_member_offset: 0,
            consumer_group_size: None,
            processing_timeout_ms: 10_000,
            max_delivery_attempts: 5,
            redelivery_backoff_ms: 500,
            redelivery_backoff_cap_ms: 60_000,
            idempotency_retention_hours: 168,
            bus_retention_hours: 168,
            retention_sweep_interval_secs: 3600,
            host: "0.0.0.0".to_string(),
            port: 8080,
            otlp_endpoint: None,
        }
    }
}

fn override_string(target: &mut String, key: &str, env: &impl Fn(&str) -> Option<String>) {
    if let Some(value) = env(key) {
        *target = value;
    }
}

fn override_parsed<T>(
    target: &mut T,
    key: &str,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<(), AppError>
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(value) = env(key) {
        *target = value
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key} is invalid: {e}")))?;
    }
    Ok(())
}

impl Config {
    /// Loads the configuration from `EMPUJE_CONFIG` and the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or parsed, or a
    /// value is missing or invalid.
    pub fn load() -> Result<Self, AppError> {
        let file = match std::env::var("EMPUJE_CONFIG") {
            Ok(path) => Some(
                std::fs::read_to_string(&path)
                    .map_err(|e| AppError::Config(format!("cannot read {path}: {e}")))?,
            ),
            Err(_) => None,
        };
        Self::from_sources(file.as_deref(), |key| std::env::var(key).ok())
    }

    /// Builds the configuration from YAML text and an environment lookup.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the YAML is malformed, a variable cannot
    /// be parsed, or the result fails validation.
    pub fn from_sources(
        yaml: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, AppError> {
        let mut config: Self = match yaml {
            Some(text) => serde_yaml::from_str(text)
                .map_err(|e| AppError::Config(format!("invalid configuration file: {e}")))?,
            None => Self::default(),
        };

        override_string(&mut config.organization_id, "ORGANIZATION_ID", &env);
        override_string(&mut config.database_url, "DATABASE_URL", &env);
        override_parsed(&mut config.bus_backend, "BUS_BACKEND", &env)?;
        if let Some(url) = env("BUS_DATABASE_URL") {
            config.bus_database_url = Some(url);
        }
        override_parsed(&mut config.bus_partitions, "BUS_PARTITIONS", &env)?;
        if let Some(group_id) = env("CONSUMER_GROUP_ID") {
            config.consumer_group_id = Some(group_id);
        }
        override_parsed(&mut config.consumer_workers, "CONSUMER_WORKERS", &env)?;
        override_parsed(&mut config.consumer_member_offset, "CONSUMER_MEMBER_OFFSET", &env)?;
        if env("CONSUMER_GROUP_SIZE").is_some() {
            let mut size = 0;
            override_parsed(&mut size, "CONSUMER_GROUP_SIZE", &env)?;
            config.consumer_group_size = Some(size);
        }
        override_parsed(&mut config.processing_timeout_ms, "PROCESSING_TIMEOUT_MS", &env)?;
        override_parsed(&mut config.max_delivery_attempts, "MAX_DELIVERY_ATTEMPTS", &env)?;
        override_parsed(&mut config.redelivery_backoff_ms, "REDELIVERY_BACKOFF_MS", &env)?;
        override_parsed(
            &mut config.idempotency_retention_hours,
            "IDEMPOTENCY_RETENTION_HOURS",
            &env,
        )?;
        override_parsed(&mut config.bus_retention_hours, "BUS_RETENTION_HOURS", &env)?;
        override_parsed(
            &mut config.retention_sweep_interval_secs,
            "RETENTION_SWEEP_INTERVAL_SECS",
            &env,
        )?;
        override_string(&mut config.host, "HOST", &env);
        override_parsed(&mut config.port, "PORT", &env)?;
        if let Some(endpoint) = env("OTEL_EXPORTER_OTLP_ENDPOINT") {
            config.otlp_endpoint = Some(endpoint);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.organization_id.trim().is_empty() {
            return Err(AppError::Config("ORGANIZATION_ID must not be empty".into()));
        }
        if self.database_url.trim().is_empty() {
            return Err(AppError::Config(
                "DATABASE_URL environment variable must be set".into(),
            ));
        }
        if self.consumer_workers == 0 {
            return Err(AppError::Config("CONSUMER_WORKERS must be at least 1".into()));
        }
        if self.consumer_group_id().trim().is_empty() {
            return Err(AppError::Config("CONSUMER_GROUP_ID must not be empty".into()));
        }
        if self.bus_partitions == 0 {
            return Err(AppError::Config("BUS_PARTITIONS must be at least 1".into()));
        }
        if self.consumer_member_offset + self.consumer_workers > self.group_size() {
            return Err(AppError::Config(format!(
                "workers {}..{} do not fit in a consumer group of {}",
                self.consumer_member_offset,
                self.consumer_member_offset + self.consumer_workers,
                self.group_size()
            )));
        }
        Ok(())
    }

    /// Consumer group of this organization's deployment.
    #[must_use]
    pub fn consumer_group_id(&self) -> String {
        self.consumer_group_id
            .clone()
            .unwrap_or_else(|| format!("empuje-{}", self.organization_id.trim()))
    }

    /// This process's share of the consumer group.
    #[must_use]
    pub fn consumer_group(&self) -> ConsumerGroup {
        ConsumerGroup {
            group_id: self.consumer_group_id(),
            workers: self.consumer_workers,
            member_offset: self.consumer_member_offset,
            members: self.group_size(),
        }
    }

    /// Total members of the consumer group across processes.
    #[must_use]
    pub fn group_size(&self) -> u32 {
        self.consumer_group_size.unwrap_or(self.consumer_workers)
    }

    /// Database used by the `PostgreSQL` bus.
    #[must_use]
    pub fn bus_database_url(&self) -> &str {
        self.bus_database_url.as_deref().unwrap_or(&self.database_url)
    }

    /// The organization registry for this node.
    #[must_use]
    pub fn registry(&self) -> OrganizationRegistry {
        OrganizationRegistry::new(OrganizationId::new(self.organization_id.trim()))
    }

    /// Retention window of processed marks.
    #[must_use]
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.idempotency_retention_hours))
    }

    /// Age after which bus records are pruned.
    #[must_use]
    pub fn bus_retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.bus_retention_hours) * 3600)
    }

    /// Period of the retention sweeper.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_interval_secs.max(1))
    }

    /// Dispatcher timing and retry bounds.
    #[must_use]
    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            processing_timeout: Duration::from_millis(self.processing_timeout_ms),
            max_attempts: self.max_delivery_attempts.max(1),
            backoff_base: Duration::from_millis(self.redelivery_backoff_ms),
            backoff_cap: Duration::from_millis(self.redelivery_backoff_cap_ms),
        }
    }

    /// HTTP bind address.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `host:port` is not a socket address.
    pub fn bind_address(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_apply_when_only_database_url_is_set() {
        // Arrange
        let env = env_of(&[("DATABASE_URL", "postgres://localhost/empuje")]);

        // Act
        let config = Config::from_sources(None, env).unwrap();

        // Assert
        assert_eq!(config.organization_id, "empuje-org-001");
        assert_eq!(config.consumer_group_id(), "empuje-empuje-org-001");
        assert_eq!(config.bus_backend, BusBackend::Postgres);
        assert_eq!(config.bus_database_url(), "postgres://localhost/empuje");
        assert_eq!(config.group_size(), 4);
        assert_eq!(config.port, 8080);
        assert_eq!(config.retention(), chrono::Duration::hours(168));
        assert_eq!(config.bus_retention(), Duration::from_secs(168 * 3600));
    }

    #[test]
    fn test_default_consumer_group_is_distinct_per_organization() {
        // Arrange
        let env_a = env_of(&[
            ("DATABASE_URL", "postgres://localhost/empuje"),
            ("ORGANIZATION_ID", "org-A"),
        ]);
        let env_b = env_of(&[
            ("DATABASE_URL", "postgres://localhost/empuje"),
            ("ORGANIZATION_ID", "org-B"),
        ]);

        // Act
        let a = Config::from_sources(None, env_a).unwrap();
        let b = Config::from_sources(None, env_b).unwrap();

        // Assert
        assert_eq!(a.consumer_group().group_id, "empuje-org-A");
        assert_eq!(b.consumer_group().group_id, "empuje-org-B");
    }

    #[test]
    fn test_explicit_consumer_group_overrides_default() {
        // Arrange
        let yaml = "organization_id: org-from-file\n";
        let env = env_of(&[
            ("DATABASE_URL", "postgres://localhost/empuje"),
            ("CONSUMER_GROUP_ID", "org-a-blue"),
        ]);

        // Act
        let config = Config::from_sources(Some(yaml), env).unwrap();

        // Assert
        assert_eq!(config.consumer_group().group_id, "org-a-blue");
    }

    #[test]
    fn test_missing_database_url_is_rejected() {
        // Arrange
        let env = env_of(&[]);

        // Act
        let result = Config::from_sources(None, env);

        // Assert
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_environment_overrides_file() {
        // Arrange
        let yaml = "organization_id: org-from-file\n\
                    database_url: postgres://file/empuje\n\
                    bus_backend: memory\n\
                    consumer_workers: 2\n";
        let env = env_of(&[("ORGANIZATION_ID", "org-from-env"), ("PORT", "9090")]);

        // Act
        let config = Config::from_sources(Some(yaml), env).unwrap();

        // Assert
        assert_eq!(config.organization_id, "org-from-env");
        assert_eq!(config.database_url, "postgres://file/empuje");
        assert_eq!(config.bus_backend, BusBackend::Memory);
        assert_eq!(config.consumer_workers, 2);
        assert_eq!(config.port, 9090);
    }

    #[test]
    fn test_unparseable_number_names_the_variable() {
        // Arrange
        let env = env_of(&[
            ("DATABASE_URL", "postgres://localhost/empuje"),
            ("BUS_PARTITIONS", "many"),
        ]);

        // Act
        let err = Config::from_sources(None, env).unwrap_err();

        // Assert
        assert!(err.to_string().contains("BUS_PARTITIONS"));
    }

    #[test]
    fn test_workers_must_fit_in_group() {
        // Arrange
        let env = env_of(&[
            ("DATABASE_URL", "postgres://localhost/empuje"),
            ("CONSUMER_WORKERS", "4"),
            ("CONSUMER_MEMBER_OFFSET", "2"),
            ("CONSUMER_GROUP_SIZE", "4"),
        ]);

        // Act
        let result = Config::from_sources(None, env);

        // Assert
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_dispatcher_settings_follow_config() {
        // Arrange
        let env = env_of(&[
            ("DATABASE_URL", "postgres://localhost/empuje"),
            ("PROCESSING_TIMEOUT_MS", "250"),
            ("MAX_DELIVERY_ATTEMPTS", "3"),
        ]);
        let config = Config::from_sources(None, env).unwrap();

        // Act
        let settings = config.dispatcher_settings();

        // Assert
        assert_eq!(settings.processing_timeout, Duration::from_millis(250));
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.backoff_base, Duration::from_millis(500));
    }
}
