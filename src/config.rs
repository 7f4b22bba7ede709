use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Account;

const DEFAULT_LEDGER_ENDPOINT: &str = "http://127.0.0.1:8545/rpc";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CONFIRMATION_POLL_MS: u64 = 1_000;
const MIN_CONFIRMATION_POLL_MS: u64 = 50;
const DEFAULT_METADATA_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_IPFS_GATEWAY: &str = "https://ipfs.io";
const DEFAULT_MAX_CONCURRENT_READS: usize = 8;
const MAX_CONCURRENT_READS: usize = 256;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read marketplace config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse marketplace config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("unable to encode marketplace config: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("invalid marketplace config {path}: unknown configuration key(s): {keys}")]
    UnknownKeys { path: String, keys: String },
    #[error("invalid marketplace config: {0}")]
    Invalid(String),
}

/// Top-level configuration of the marketplace client.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MarketplaceConfig {
    pub ledger: LedgerConfig,
    pub metadata: MetadataConfig,
    pub catalog: ReconstructionConfig,
    pub history: ReconstructionConfig,
    pub session: SessionConfig,
}

/// Connection settings for the marketplace JSON-RPC gateway.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint exposing the marketplace and token contracts.
    pub endpoint: String,
    /// Optional bearer token attached to every request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Interval between receipt polls while awaiting a confirmation.
    pub confirmation_poll_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_LEDGER_ENDPOINT.to_owned(),
            auth_token: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            confirmation_poll_ms: DEFAULT_CONFIRMATION_POLL_MS,
        }
    }
}

/// Descriptor store settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MetadataConfig {
    pub request_timeout_ms: u64,
    /// Gateway used to resolve `ipfs://` descriptor references.
    pub ipfs_gateway: String,
    /// Keep resolved descriptors in memory for the rest of the session.
    pub cache_descriptors: bool,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_METADATA_TIMEOUT_MS,
            ipfs_gateway: DEFAULT_IPFS_GATEWAY.to_owned(),
            cache_descriptors: true,
        }
    }
}

/// Concurrency limits applied while reconstructing a view.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Upper bound of per-item ledger reads in flight at once.
    pub max_concurrent_reads: usize,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reads: DEFAULT_MAX_CONCURRENT_READS,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Identity used when no wallet provider supplies one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<Account>,
}

impl MarketplaceConfig {
    /// Loads and validates a configuration file, rejecting unknown keys.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = parse_strict_config(&content, path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let encoded = toml::to_string_pretty(self)?;
        let io_error = |source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        fs::write(path, encoded).map_err(io_error)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("ledger.endpoint must be set".into()));
        }
        if self.ledger.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "ledger.request_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.ledger.confirmation_poll_ms < MIN_CONFIRMATION_POLL_MS {
            return Err(ConfigError::Invalid(format!(
                "ledger.confirmation_poll_ms must be at least {MIN_CONFIRMATION_POLL_MS}"
            )));
        }
        if self.metadata.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "metadata.request_timeout_ms must be greater than zero".into(),
            ));
        }
        for (section, limits) in [("catalog", &self.catalog), ("history", &self.history)] {
            if limits.max_concurrent_reads == 0 || limits.max_concurrent_reads > MAX_CONCURRENT_READS
            {
                return Err(ConfigError::Invalid(format!(
                    "{section}.max_concurrent_reads must be between 1 and {MAX_CONCURRENT_READS}"
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn parse_strict_config<T: DeserializeOwned>(
    content: &str,
    path: &Path,
) -> Result<T, ConfigError> {
    let mut unknown_keys = Vec::new();
    let deserializer = toml::de::Deserializer::new(content);

    let value = serde_ignored::deserialize(deserializer, |path| {
        unknown_keys.push(path.to_string());
    })
    .map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    if !unknown_keys.is_empty() {
        return Err(ConfigError::UnknownKeys {
            path: path.display().to_string(),
            keys: unknown_keys.join(", "),
        });
    }

    Ok(value)
}
