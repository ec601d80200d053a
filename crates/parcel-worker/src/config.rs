//! Worker configuration.

use std::net::SocketAddr;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use parcel_state::{BlobConfig, QueueConfig, StateConfig};
use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_NAME: &str = "parcel-worker";
const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_INVOCATION_TIMEOUT_SECS: u64 = 900;
/// Covers a full invocation plus time to settle the batch.
const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = DEFAULT_INVOCATION_TIMEOUT_SECS + 60;

/// Worker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Worker identity, attached to every metric.
    #[serde(default = "default_name")]
    pub name: String,

    /// Queue to consume.
    pub queue: String,

    /// Bucket holding proxied messages and outcomes.
    pub bucket: String,

    #[serde(default)]
    pub consumer: ConsumerSettings,

    /// Blob store backend.
    #[serde(default)]
    pub storage: BlobConfig,

    /// Queue backend.
    #[serde(default)]
    pub queue_backend: QueueConfig,

    #[serde(default)]
    pub metrics: MetricsSettings,
}

impl WorkerConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `parcel.toml` in the current directory (if present)
    /// 3. Specified config file path (if provided)
    /// 4. Environment variables with `PARCEL_` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Toml::file("parcel.toml"));

        if let Some(p) = path {
            figment = figment.merge(Toml::file(p));
        }

        Self::from_figment(figment.merge(Env::prefixed("PARCEL_").split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn state(&self) -> StateConfig {
        StateConfig {
            blob: self.storage.clone(),
            queue: self.queue_backend.clone(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.is_empty() {
            return Err(ConfigError::Invalid("queue must not be empty".into()));
        }
        if self.bucket.is_empty() {
            return Err(ConfigError::Invalid("bucket must not be empty".into()));
        }
        if self.consumer.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "consumer.batch_size must be at least 1".into(),
            ));
        }
        if !self.consumer.lease_covers_invocation() {
            return Err(ConfigError::Invalid(format!(
                "consumer.visibility_timeout_secs ({}) must be at least \
                 consumer.invocation_timeout_secs ({})",
                self.consumer.visibility_timeout_secs, self.consumer.invocation_timeout_secs
            )));
        }
        if self.consumer.max_in_flight == Some(0) {
            return Err(ConfigError::Invalid(
                "consumer.max_in_flight must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }
}

/// Queue consumer settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConsumerSettings {
    /// Most messages claimed per receive.
    pub batch_size: usize,
    /// How long a claimed batch stays hidden from other consumers. Never
    /// shorter than `invocation_timeout_secs`.
    pub visibility_timeout_secs: u64,
    /// Pause after an empty receive.
    pub poll_interval_ms: u64,
    /// Budget for one batch, reported to metrics as remaining time.
    pub invocation_timeout_secs: u64,
    /// Bound on concurrently executing records of one batch.
    pub max_in_flight: Option<usize>,
}

impl ConsumerSettings {
    pub const fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub const fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }

    /// False when a batch could reappear on the queue while still running.
    pub const fn lease_covers_invocation(&self) -> bool {
        self.visibility_timeout_secs >= self.invocation_timeout_secs
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            visibility_timeout_secs: DEFAULT_VISIBILITY_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            invocation_timeout_secs: DEFAULT_INVOCATION_TIMEOUT_SECS,
            max_in_flight: None,
        }
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct MetricsSettings {
    /// Address for the scrape endpoint. No exporter when unset.
    #[serde(default)]
    pub listen_addr: Option<SocketAddr>,
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Result<WorkerConfig, ConfigError> {
        WorkerConfig::from_figment(Figment::from(Toml::string(toml)))
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse(
            r#"
            queue = "jobs"
            bucket = "results"
            "#,
        )
        .unwrap();

        assert_eq!(config.name, "parcel-worker");
        assert_eq!(config.consumer, ConsumerSettings::default());
        assert_eq!(config.consumer.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.state(), StateConfig::default());
        assert_eq!(config.metrics.listen_addr, None);
    }

    #[test]
    fn full_config() {
        let config = parse(
            r#"
            name = "thumbnailer"
            queue = "jobs"
            bucket = "results"

            [consumer]
            batch_size = 5
            invocation_timeout_secs = 60
            max_in_flight = 2

            [storage]
            backend = "s3"
            endpoint = "http://localhost:9000"

            [metrics]
            listen_addr = "127.0.0.1:9100"
            "#,
        )
        .unwrap();

        assert_eq!(config.name, "thumbnailer");
        assert_eq!(config.consumer.batch_size, 5);
        assert_eq!(config.consumer.max_in_flight, Some(2));
        assert_eq!(config.consumer.visibility_timeout(), Duration::from_secs(960));
        assert_eq!(config.consumer.invocation_timeout(), Duration::from_secs(60));
        assert_eq!(
            config.storage,
            BlobConfig::S3 {
                region: None,
                endpoint: Some("http://localhost:9000".to_owned()),
            }
        );
        assert_eq!(
            config.metrics.listen_addr,
            Some("127.0.0.1:9100".parse().unwrap())
        );
    }

    #[test]
    fn rejects_zero_batch_size() {
        let err = parse(
            r#"
            queue = "jobs"
            bucket = "results"
            [consumer]
            batch_size = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn default_lease_covers_the_invocation() {
        let settings = ConsumerSettings::default();
        assert!(settings.lease_covers_invocation());
        assert!(settings.visibility_timeout() > settings.invocation_timeout());
    }

    #[test]
    fn rejects_lease_shorter_than_invocation() {
        let err = parse(
            r#"
            queue = "jobs"
            bucket = "results"
            [consumer]
            visibility_timeout_secs = 30
            invocation_timeout_secs = 900
            "#,
        )
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::Invalid(ref msg) if msg.contains("visibility_timeout_secs")),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn accepts_lease_equal_to_invocation() {
        let config = parse(
            r#"
            queue = "jobs"
            bucket = "results"
            [consumer]
            visibility_timeout_secs = 60
            invocation_timeout_secs = 60
            "#,
        )
        .unwrap();
        assert!(config.consumer.lease_covers_invocation());
    }

    #[test]
    fn rejects_zero_in_flight_bound() {
        let err = parse(
            r#"
            queue = "jobs"
            bucket = "results"
            [consumer]
            max_in_flight = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn queue_is_required() {
        assert!(matches!(
            parse(r#"bucket = "results""#),
            Err(ConfigError::Parse(_))
        ));
    }
}
