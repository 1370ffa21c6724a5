//! Simulator errors

use pipeliner_core::PipelinerError;

/// Failures of the simulator itself, not of simulated objectives
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// Configuration file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// Malformed TOML
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration could not be rendered
    #[error("cannot render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    /// Value out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// Engine rejected its configuration
    #[error(transparent)]
    Pipeliner(#[from] PipelinerError),

    /// Subscriber installation failed
    #[error("cannot initialize logging: {0}")]
    Logging(String),

    /// Called outside a Tokio runtime
    #[error("simulated device needs a tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}
