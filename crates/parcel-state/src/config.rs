use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct StateConfig {
    #[serde(default)]
    pub blob: BlobConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BlobConfig {
    #[default]
    Memory,
    #[cfg(feature = "object")]
    Local { root: PathBuf },
    #[cfg(feature = "object")]
    S3 {
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum QueueConfig {
    #[default]
    Memory,
    #[cfg(feature = "postgres")]
    Postgres {
        url: String,
        #[serde(default = "default_queue_table")]
        table: String,
    },
}

#[cfg(feature = "postgres")]
fn default_queue_table() -> String {
    "parcel_queue".to_string()
}
