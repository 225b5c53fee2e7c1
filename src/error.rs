//! Errors.

use std::path::PathBuf;

use thiserror::Error;

/// An error that occurred while loading a scenario.
///
/// Never fatal: the previously active scenario stays in effect.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ScenarioError {
    /// The scenario source could not be read.
    ///
    /// Recoverable. The source is retried on the next idle period or change.
    #[error("Unable to read scenario from {path}")]
    Read {
        /// Where we tried to read from.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The scenario content was not valid.
    #[error("Malformed scenario: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// An outbound call failed before a status code was received.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// The request could not be sent, or timed out.
    #[error("Request to {url} failed")]
    Request {
        /// The URL that was called.
        url: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },
}

impl TransportError {
    /// The URL of the failed call.
    pub fn url(&self) -> &str {
        match self {
            TransportError::Request { url, .. } => url,
        }
    }
}

/// Reading or writing the event-queue snapshot failed.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SnapshotError {
    /// Filesystem failure.
    #[error("Event queue snapshot I/O failed at {path}")]
    Io {
        /// The snapshot path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The snapshot could not be encoded or decoded.
    #[error("Event queue snapshot is not valid JSON")]
    Codec(#[from] serde_json::Error),
}

/// A configuration value could not be parsed.
///
/// Only ever returned during startup.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// An environment variable held something unusable.
    #[error("Invalid value for {var}: {value:?}")]
    InvalidVar {
        /// The variable name.
        var: &'static str,
        /// The raw value found.
        value: String,
    },
}
