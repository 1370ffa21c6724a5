//! Simulator configuration, loaded from TOML

use crate::error::SimError;
use pipeliner_core::PipelinerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Everything a simulation run needs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Engine settings
    pub pipeliner: PipelinerConfig,
    /// Log output
    pub logging: LoggingConfig,
    /// Simulated device behavior
    pub device: DeviceConfig,
    /// Generated objectives
    pub workload: WorkloadConfig,
}

impl SimConfig {
    /// Parse from TOML text; missing fields take their defaults
    ///
    /// # Errors
    /// Returns `SimError::Config` on malformed TOML and
    /// `SimError::Invalid` on out-of-range values
    pub fn from_toml_str(text: &str) -> Result<Self, SimError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// Returns `SimError::Io` if the file cannot be read, otherwise as
    /// [`SimConfig::from_toml_str`]
    pub fn load(path: &Path) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path).map_err(|source| SimError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Returns `SimError::Render` if serialization fails
    pub fn to_toml_string(&self) -> Result<String, SimError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns `SimError::Invalid` naming the first bad field
    pub fn validate(&self) -> Result<(), SimError> {
        self.pipeliner.validate()?;
        for (name, value) in [
            ("device.event_loss", self.device.event_loss),
            ("device.reject_rate", self.device.reject_rate),
            ("workload.remove_ratio", self.workload.remove_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimError::Invalid(format!("{name} must be within 0..=1, got {value}")));
            }
        }
        if !(1..=8).contains(&self.workload.max_buckets) {
            return Err(SimError::Invalid(format!(
                "workload.max_buckets must be within 1..=8, got {}",
                self.workload.max_buckets
            )));
        }
        if self.workload.vlan == 0 || self.workload.vlan > 4095 {
            return Err(SimError::Invalid(format!(
                "workload.vlan must be within 1..=4095, got {}",
                self.workload.vlan
            )));
        }
        Ok(())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    /// Install the global subscriber
    ///
    /// # Errors
    /// Returns `SimError::Logging` if the filter is invalid or a subscriber is already set
    pub fn init(&self) -> Result<(), SimError> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&self.level)
                .map_err(|e| SimError::Logging(e.to_string()))?,
        };
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);
        let installed = match self.format {
            LogFormat::Pretty => builder.try_init(),
            LogFormat::Json => builder.json().try_init(),
        };
        installed.map_err(|e| SimError::Logging(e.to_string()))
    }
}

/// Simulated device behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Base delay before a request takes effect
    pub latency_ms: u64,
    /// Extra uniformly distributed delay
    pub jitter_ms: u64,
    /// Probability that the event of an applied request is never delivered
    pub event_loss: f64,
    /// Probability that a group add is rejected
    pub reject_rate: f64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            latency_ms: 5,
            jitter_ms: 5,
            event_loss: 0.0,
            reject_rate: 0.0,
        }
    }
}

/// Generated objectives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Number of ADD objectives
    pub objectives: u64,
    /// Seed of the workload and the device
    pub seed: u64,
    /// Share of installed objectives removed afterwards
    pub remove_ratio: f64,
    /// Egress VLAN of every objective
    pub vlan: u16,
    /// Upper bound of buckets per broadcast or hashed objective
    pub max_buckets: usize,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            objectives: 200,
            seed: 42,
            remove_ratio: 0.5,
            vlan: 10,
            max_buckets: 4,
        }
    }
}
