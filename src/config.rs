//! Configuration of the `event-monitor` binary.
//!
//! TOML is the only config source. Example:
//!
//! ```toml
//! [ingestor]
//! ws_url = "ws://localhost:8546"
//! contract_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
//! start_block = 1
//!
//! [signer]
//! http_url = "http://localhost:8545"
//! key_file = "/etc/event-monitor/signer.key"
//!
//! [scheduler]
//! step_interval_secs = 30
//! monitoring_secs = 3600
//! ```
//!
//! The private key file holds a hex key on a single line; it is trimmed on read. Relative paths
//! are resolved against the directory of the config file.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy::primitives::Address;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    reconciler::DEFAULT_MAX_BLOCK_RANGE,
    scheduler::SchedulerConfig,
    watchdog::{DEFAULT_PROBE_INTERVAL, DEFAULT_PROBE_TIMEOUT},
};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub ingestor: IngestorConfig,
    pub signer: SignerConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestorConfig {
    pub ws_url: String,
    pub contract_address: Address,
    pub start_block: u64,
    pub max_block_range: u64,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
}

#[derive(Clone)]
pub struct SignerConfig {
    pub http_url: String,
    /// The private key itself, not the path it was read from.
    pub private_key: String,
}

impl fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerConfig")
            .field("http_url", &self.http_url)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("TOML parse error: {0}")]
    Parse(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    ingestor: Option<RawIngestorConfig>,
    signer: Option<RawSignerConfig>,
    scheduler: Option<RawSchedulerConfig>,
}

#[derive(Debug, Deserialize)]
struct RawIngestorConfig {
    ws_url: Option<String>,
    contract_address: Option<String>,
    start_block: Option<u64>,
    max_block_range: Option<u64>,
    probe_interval_secs: Option<u64>,
    probe_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawSignerConfig {
    http_url: Option<String>,
    key_file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSchedulerConfig {
    step_interval_secs: Option<u64>,
    monitoring_secs: Option<u64>,
    max_increase: Option<u64>,
    acceptance_timeout_secs: Option<u64>,
}

impl MonitorConfig {
    /// Loads the config at `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file or the key file cannot be read, or if a field is
    /// missing or invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_str = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Io(format!("reading config file '{}': {}", path.display(), e))
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml(&toml_str, base)
    }

    /// Parses a config, resolving relative key file paths against `base`.
    ///
    /// # Errors
    ///
    /// See [`MonitorConfig::load`].
    pub fn from_toml(toml_str: &str, base: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let raw_ingestor = raw.ingestor.ok_or(ConfigError::MissingField("ingestor"))?;
        let ws_url = non_empty(raw_ingestor.ws_url, "ingestor.ws_url")?;
        let contract_address = non_empty(raw_ingestor.contract_address, "ingestor.contract_address")?
            .parse::<Address>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "ingestor.contract_address",
                reason: e.to_string(),
            })?;
        let max_block_range = raw_ingestor.max_block_range.unwrap_or(DEFAULT_MAX_BLOCK_RANGE);
        if max_block_range == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ingestor.max_block_range",
                reason: "must be greater than 0".to_owned(),
            });
        }
        let ingestor = IngestorConfig {
            ws_url,
            contract_address,
            start_block: raw_ingestor.start_block.unwrap_or(0),
            max_block_range,
            probe_interval: secs(
                raw_ingestor.probe_interval_secs,
                DEFAULT_PROBE_INTERVAL,
                "ingestor.probe_interval_secs",
            )?,
            probe_timeout: secs(
                raw_ingestor.probe_timeout_secs,
                DEFAULT_PROBE_TIMEOUT,
                "ingestor.probe_timeout_secs",
            )?,
        };

        let raw_signer = raw.signer.ok_or(ConfigError::MissingField("signer"))?;
        let http_url = non_empty(raw_signer.http_url, "signer.http_url")?;
        let key_file = base.join(PathBuf::from(non_empty(raw_signer.key_file, "signer.key_file")?));
        let private_key = std::fs::read_to_string(&key_file)
            .map_err(|e| ConfigError::Io(format!("reading key file '{}': {}", key_file.display(), e)))?
            .trim()
            .to_owned();
        if private_key.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "signer.key_file",
                reason: "key file is empty".to_owned(),
            });
        }
        let signer = SignerConfig { http_url, private_key };

        let raw_scheduler = raw.scheduler.unwrap_or_default();
        let defaults = SchedulerConfig::default();
        let max_increase = raw_scheduler.max_increase.unwrap_or(defaults.max_increase);
        if max_increase == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.max_increase",
                reason: "must be greater than 0".to_owned(),
            });
        }
        let scheduler = SchedulerConfig {
            step_interval: secs(
                raw_scheduler.step_interval_secs,
                defaults.step_interval,
                "scheduler.step_interval_secs",
            )?,
            monitoring_duration: secs(
                raw_scheduler.monitoring_secs,
                defaults.monitoring_duration,
                "scheduler.monitoring_secs",
            )?,
            max_increase,
            acceptance_timeout: secs(
                raw_scheduler.acceptance_timeout_secs,
                defaults.acceptance_timeout,
                "scheduler.acceptance_timeout_secs",
            )?,
        };

        Ok(Self { ingestor, signer, scheduler })
    }
}

fn non_empty(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingField(field)),
    }
}

fn secs(value: Option<u64>, default: Duration, field: &'static str) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(0) => Err(ConfigError::InvalidValue { field, reason: "must be greater than 0".to_owned() }),
        Some(secs) => Ok(Duration::from_secs(secs)),
    }
}
