//! Error types for inference backend supervision

use thiserror::Error;

use super::profile::BackendKind;

/// Errors raised by backend controllers.
///
/// Most controller operations report failure as `false` and log; these are
/// reserved for misconfiguration and for callers that ask for typed errors.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Required configuration is missing and no default can stand in
    #[error("{kind} backend is not configured: {reason}")]
    BackendNotConfigured { kind: BackendKind, reason: String },

    /// `base_url` could not be parsed
    #[error("invalid base URL '{url}': {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The server never answered its health check
    #[error("{kind} backend did not become healthy after {attempts} attempts")]
    HealthTimeout { kind: BackendKind, attempts: u32 },

    /// A start attempt failed for a reason other than timing out
    #[error("{kind} backend failed to start: {reason}")]
    FailedToStart { kind: BackendKind, reason: String },

    /// The OS refused to launch the server process
    #[error("failed to spawn {kind} backend ({program}): {source}")]
    SpawnFailure {
        kind: BackendKind,
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A process survived termination
    #[error("process {pid} ({name}) could not be terminated")]
    TerminationFailure { pid: u32, name: String },

    /// No controller registered under this name
    #[error("unknown backend '{0}'")]
    UnknownBackend(String),

    /// HTTP request to the backend API failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for backend operations
pub type BackendResult<T> = Result<T, BackendError>;
