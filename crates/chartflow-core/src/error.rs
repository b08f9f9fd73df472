//! Error types for the chart core
//!
//! Recoverable problems (bad leaf types, unknown properties) never show up
//! here; they are reported by `apply` and logged. These errors cover:
//! - Caller or package misconfiguration (missing registrations, bad types)
//! - Collaborator failures inside pipeline stages
//! - Configuration file loading

use chartflow_pipeline::SchedulerError;
use std::path::PathBuf;

/// Failure reported by an external collaborator
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    /// Collaborator cannot serve the request right now
    #[error("{collaborator} unavailable: {reason}")]
    Unavailable {
        /// Collaborator name
        collaborator: &'static str,
        /// Reason given
        reason: String,
    },

    /// Input the collaborator could not handle
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Anything else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CollaboratorError {
    /// Create an unavailable error
    #[inline]
    pub fn unavailable(collaborator: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            collaborator,
            reason: reason.into(),
        }
    }
}

/// Chart-level errors surfaced to callers
#[derive(Debug, thiserror::Error)]
pub enum ChartError {
    /// Options are not an object, or a list slot is not an array
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Discriminant value is not recognized
    #[error("unknown {kind} type: {name}")]
    UnknownType {
        /// Registry the type belongs to
        kind: &'static str,
        /// Value supplied
        name: String,
    },

    /// Discriminant is recognized but nothing is registered for it
    #[error("no {kind} registered for '{name}'; register it before use")]
    MissingRegistration {
        /// Registry that was consulted
        kind: &'static str,
        /// Missing entry
        name: String,
    },

    /// The chart has been destroyed
    #[error("chart destroyed")]
    Destroyed,

    /// Waiting for the chart to settle failed
    #[error(transparent)]
    Wait(#[from] SchedulerError),
}

impl ChartError {
    /// True when the error stems from caller configuration
    #[inline]
    #[must_use]
    pub fn is_misconfiguration(&self) -> bool {
        matches!(
            self,
            Self::InvalidOptions(_) | Self::UnknownType { .. } | Self::MissingRegistration { .. }
        )
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read {path}: {source}", path = .path.display())]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// TOML parse failure
    #[error("invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parse failure
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// Extension is neither `.toml` nor `.json`
    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    /// Values parse but are unusable
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
