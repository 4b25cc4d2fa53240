#![allow(missing_docs)]
use thiserror::Error;
use tokio::time::error::Elapsed;

/// Custom Result type used in this crate
pub(crate) type UpnpFuzzResult<T> = Result<T, UpnpFuzzError>;

#[derive(Debug, Error)]
pub enum UpnpFuzzError {
    #[error("{err_msg}")]
    Custom { err_msg: String },
    #[error("Invalid configuration: {err_msg}")]
    Configuration { err_msg: String },
    #[error("Could not connect to {err_msg}")]
    ConnectionFailed { err_msg: String },
    #[error("Transport error: {err_msg}")]
    Transport { err_msg: String },
    #[error("Run into a timeout {elapsed}.")]
    Timeout { elapsed: Elapsed },
    #[error("External mutator failed: {err_msg}")]
    Mutator { err_msg: String },
    #[error("Could not store crash evidence in {path}: {err}")]
    Recorder { path: String, err: std::io::Error },
    #[error("Restarting the target failed: {err_msg}")]
    Recovery { err_msg: String },
    #[error("Could not load the description {url}: {err_msg}")]
    Description { url: String, err_msg: String },
    #[error("Campaign halted after iteration {last_completed}: {source}")]
    Fatal {
        last_completed: u64,
        source: Box<UpnpFuzzError>,
    },
    #[error("{err}")]
    IoError { err: std::io::Error },
    #[error("{err}")]
    Serde { err: serde_json::Error },
}

impl UpnpFuzzError {
    /// Errors of this kind stop a campaign no matter where they happen.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            UpnpFuzzError::Configuration { .. }
                | UpnpFuzzError::Recorder { .. }
                | UpnpFuzzError::Fatal { .. }
        )
    }

    pub(crate) fn fatal(last_completed: u64, source: UpnpFuzzError) -> Self {
        UpnpFuzzError::Fatal {
            last_completed,
            source: Box::new(source),
        }
    }

    pub(crate) fn config(err_msg: impl Into<String>) -> Self {
        UpnpFuzzError::Configuration {
            err_msg: err_msg.into(),
        }
    }
}

impl From<std::io::Error> for UpnpFuzzError {
    fn from(err: std::io::Error) -> Self {
        UpnpFuzzError::IoError { err }
    }
}

impl From<serde_json::Error> for UpnpFuzzError {
    fn from(err: serde_json::Error) -> Self {
        UpnpFuzzError::Serde { err }
    }
}

impl From<Elapsed> for UpnpFuzzError {
    fn from(elapsed: Elapsed) -> Self {
        UpnpFuzzError::Timeout { elapsed }
    }
}
