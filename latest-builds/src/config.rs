use serde::Deserialize;
use std::time::Duration;
use url::Url;

pub const DEFAULT_SOURCE_URL: &str = "https://docs.google.com/spreadsheets/d/16Ymdz80xlCzb6CwRFVokwo0onkofVYFoSkc7mYe6pgw/export?gid=0&format=csv";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Refresh interval must be at least one second")]
    InvalidInterval,

    #[error("Storage {0} cannot be empty")]
    EmptyStorageName(&'static str),

    #[error("Raw and derived blobs must have different names")]
    SameBlobNames,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum BlobStoreType {
    Filesystem {
        base_dir: String,
    },
    /// `account_url` carries the SAS token. Falls back to the `SAS_TOKEN`
    /// environment variable when omitted.
    Azure {
        account_url: Option<String>,
    },
    Gcs,
    Memory,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct BlobStore {
    #[serde(flatten)]
    pub r#type: BlobStoreType,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Source {
    pub url: Url,
    pub timeout_secs: Option<u64>,
}

impl Source {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for Source {
    fn default() -> Self {
        Source {
            url: Url::parse(DEFAULT_SOURCE_URL).expect("default source URL is valid"),
            timeout_secs: None,
        }
    }
}

/// Names of the container and the two blobs it holds.
#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct Storage {
    pub container: String,
    pub raw_blob: String,
    pub derived_blob: String,
}

impl Default for Storage {
    fn default() -> Self {
        Storage {
            container: "sqlserverbuildsapi".into(),
            raw_blob: "builds.csv".into(),
            derived_blob: "builds.json".into(),
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct Refresh {
    pub enabled: bool,
    pub interval_secs: u64,
    pub run_on_startup: bool,
}

impl Refresh {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for Refresh {
    fn default() -> Self {
        Refresh {
            enabled: true,
            interval_secs: 3600,
            run_on_startup: true,
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    #[serde(default)]
    pub source: Source,
    pub blob_store: BlobStore,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub refresh: Refresh,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.listener.port == 0 {
            return Err(ValidationError::InvalidPort);
        }

        if self.refresh.interval_secs == 0 {
            return Err(ValidationError::InvalidInterval);
        }

        for (field, value) in [
            ("container", &self.storage.container),
            ("raw_blob", &self.storage.raw_blob),
            ("derived_blob", &self.storage.derived_blob),
        ] {
            if value.is_empty() {
                return Err(ValidationError::EmptyStorageName(field));
            }
        }

        if self.storage.raw_blob == self.storage.derived_blob {
            return Err(ValidationError::SameBlobNames);
        }

        Ok(())
    }
}
