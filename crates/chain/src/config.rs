//! Pipeline configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config.
//! Durations are written as (possibly fractional) seconds:
//!
//! ```toml
//! block_tx_num = 500
//! block_gen_timeout = 3.0
//! broadcast_interval = 0.5
//!
//! [block_pow]
//! complexity = 2
//! prefix = 0
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tpschain_core::PowPrefix;

/// Largest queue capacity a tokio channel accepts.
pub const MAX_QUEUE_CAPACITY: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Largest accepted `block_tx_num`.
pub const MAX_BLOCK_TX_NUM: usize = 1_000_000;

/// Largest accepted `validation_workers`.
pub const MAX_VALIDATION_WORKERS: usize = 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// A proof-of-work requirement: `complexity` leading bytes equal to `prefix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowConfig {
    pub complexity: usize,
    pub prefix: u8,
}

impl PowConfig {
    pub fn new(complexity: usize, prefix: u8) -> Self {
        Self { complexity, prefix }
    }

    pub fn to_prefix(&self) -> PowPrefix {
        PowPrefix::repeat(self.prefix, self.complexity)
    }
}

impl Default for PowConfig {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

/// Tunables for admission, sealing and broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of the intake and accepted queues.
    pub txpool_size: usize,
    /// Number of admission workers.
    pub validation_workers: usize,
    /// Seal as soon as this many transactions are pending.
    pub block_tx_num: usize,
    /// Seal after this long without a seal, whatever is pending.
    #[serde(with = "duration_secs")]
    pub block_gen_timeout: Duration,
    /// Pause after each broadcast.
    #[serde(with = "duration_secs")]
    pub broadcast_interval: Duration,
    pub transaction_pow: PowConfig,
    pub block_pow: PowConfig,
    /// Discard the first seal trigger after start-up.
    pub skip_first_seal: bool,
    /// Re-announce every accepted transaction on the outbound boundary.
    pub relay_transactions: bool,
    /// Append-only metrics log. No log is written when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
    /// Write a dump line to the metrics log this often.
    #[serde(with = "duration_secs::option", skip_serializing_if = "Option::is_none")]
    pub report_dump_interval: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            txpool_size: 10_000,
            validation_workers: default_workers(),
            block_tx_num: 500,
            block_gen_timeout: Duration::from_secs(3),
            broadcast_interval: Duration::from_secs(1),
            transaction_pow: PowConfig::new(1, 0),
            block_pow: PowConfig::new(2, 0),
            skip_first_seal: true,
            relay_transactions: true,
            report_path: None,
            report_dump_interval: None,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        let must_be_positive = [
            ("txpool_size", self.txpool_size == 0),
            ("validation_workers", self.validation_workers == 0),
            ("block_tx_num", self.block_tx_num == 0),
            ("block_gen_timeout", self.block_gen_timeout.is_zero()),
            (
                "report_dump_interval",
                self.report_dump_interval.is_some_and(|d| d.is_zero()),
            ),
        ];
        for (field, is_zero) in must_be_positive {
            if is_zero {
                return Err(ConfigError::Invalid(format!("{field} must be greater than zero")));
            }
        }
        let upper_bounds = [
            ("txpool_size", self.txpool_size, MAX_QUEUE_CAPACITY),
            ("validation_workers", self.validation_workers, MAX_VALIDATION_WORKERS),
            ("block_tx_num", self.block_tx_num, MAX_BLOCK_TX_NUM),
        ];
        for (field, value, max) in upper_bounds {
            if value > max {
                return Err(ConfigError::Invalid(format!("{field} must be at most {max}, got {value}")));
            }
        }
        Ok(())
    }

    pub fn transaction_prefix(&self) -> PowPrefix {
        self.transaction_pow.to_prefix()
    }

    pub fn block_prefix(&self) -> PowPrefix {
        self.block_pow.to_prefix()
    }
}

/// Serde adapter for durations written as float seconds.
mod duration_secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => s.serialize_some(&d.as_secs_f64()),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            Option::<f64>::deserialize(d)?
                .map(|secs| Duration::try_from_secs_f64(secs).map_err(D::Error::custom))
                .transpose()
        }
    }
}
