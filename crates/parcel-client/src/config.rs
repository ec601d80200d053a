//! Client configuration.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use parcel_state::{BlobConfig, QueueConfig, StateConfig};
use serde::Deserialize;

use crate::error::ConfigError;

/// File read from the working directory when present.
pub const CONFIG_FILE: &str = "parcel.toml";

/// Prefix of all environment variables read by parcel.
pub const ENV_PREFIX: &str = "PARCEL_";

/// Where a client sends calls and reads results.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Queue the worker consumes.
    pub queue: String,

    /// Bucket holding results and proxied messages.
    pub bucket: String,

    /// Prepended to every derived blob key.
    #[serde(default)]
    pub key_prefix: Option<String>,

    #[serde(default)]
    pub storage: BlobConfig,

    #[serde(default)]
    pub queue_backend: QueueConfig,
}

impl ClientConfig {
    /// Load configuration from file and environment.
    ///
    /// Later sources override earlier ones:
    /// 1. `parcel.toml` in the current directory (if present)
    /// 2. Specified config file path (if provided)
    /// 3. Environment variables with `PARCEL_` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(path))
    }

    /// Configuration for a named service.
    ///
    /// `PARCEL_<SERVICE>_QUEUE` is required and `PARCEL_<SERVICE>_BUCKET`
    /// overrides the shared bucket. Dashes in the service name become
    /// underscores.
    pub fn for_service(service: &str) -> Result<Self, ConfigError> {
        let prefix = service_prefix(service);
        let var = format!("{prefix}QUEUE");
        if std::env::var_os(&var).is_none() {
            return Err(ConfigError::MissingService {
                service: service.to_owned(),
                var,
            });
        }

        Self::from_figment(
            Self::figment(None).merge(Env::prefixed(&prefix).only(&["queue", "bucket"])),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        figment.extract().map_err(ConfigError::from)
    }

    /// Backend selection for [`parcel_state::StateProvider`].
    pub fn state(&self) -> StateConfig {
        StateConfig {
            blob: self.storage.clone(),
            queue: self.queue_backend.clone(),
        }
    }

    fn figment(path: Option<&str>) -> Figment {
        let mut figment = Figment::new().merge(Toml::file(CONFIG_FILE));

        if let Some(p) = path {
            figment = figment.merge(Toml::file(p));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

fn service_prefix(service: &str) -> String {
    format!(
        "{ENV_PREFIX}{}_",
        service.to_ascii_uppercase().replace('-', "_")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_toml() {
        let config = ClientConfig::from_figment(Figment::from(Toml::string(
            r#"
            queue = "jobs"
            bucket = "results"
            key_prefix = "staging"

            [storage]
            backend = "local"
            root = "/tmp/parcel"
            "#,
        )))
        .unwrap();

        assert_eq!(config.queue, "jobs");
        assert_eq!(config.bucket, "results");
        assert_eq!(config.key_prefix.as_deref(), Some("staging"));
        assert_eq!(
            config.state().blob,
            BlobConfig::Local {
                root: "/tmp/parcel".into()
            }
        );
        assert_eq!(config.state().queue, QueueConfig::Memory);
    }

    #[test]
    fn queue_and_bucket_are_required() {
        let err = ClientConfig::from_figment(Figment::from(Toml::string(r#"queue = "jobs""#)))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Figment(_)));
    }

    #[test]
    fn service_prefix_normalises_names() {
        assert_eq!(service_prefix("image-resize"), "PARCEL_IMAGE_RESIZE_");
        assert_eq!(service_prefix("Orders"), "PARCEL_ORDERS_");
    }

    #[test]
    fn service_queue_is_required() {
        let err = ClientConfig::for_service("cfgtest-absent").unwrap_err();
        match err {
            ConfigError::MissingService { service, var } => {
                assert_eq!(service, "cfgtest-absent");
                assert_eq!(var, "PARCEL_CFGTEST_ABSENT_QUEUE");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn service_variables_are_picked_up() {
        std::env::set_var("PARCEL_CFGTEST_ORDERS_QUEUE", "orders-queue");
        std::env::set_var("PARCEL_CFGTEST_ORDERS_BUCKET", "orders-bucket");

        let config = ClientConfig::for_service("cfgtest-orders").unwrap();
        assert_eq!(config.queue, "orders-queue");
        assert_eq!(config.bucket, "orders-bucket");
    }
}
