use std::fmt;

use thiserror::Error;

/// Remote call sites of a trigger run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStep {
    FetchWorkflow,
    ResolveReference,
    TriggerBuild,
}

impl fmt::Display for ApiStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            ApiStep::FetchWorkflow => "fetching workflow",
            ApiStep::ResolveReference => "resolving git reference",
            ApiStep::TriggerBuild => "creating build",
        };
        f.write_str(step)
    }
}

/// Coarse classification of a [`TriggerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidParameters,
    MissingCredentials,
    MalformedKey,
    RemoteApi,
    Output,
}

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Required parameter '{0}' is not provided")]
    InvalidParameters(&'static str),

    #[error(
        "Missing credentials to generate App Store Connect token: {} not provided",
        .missing.join(", ")
    )]
    MissingCredentials { missing: Vec<&'static str> },

    #[error("Private key cannot be used for ES256 signing: {0}")]
    MalformedKey(#[source] jsonwebtoken::errors::Error),

    #[error("App Store Connect request failed while {step} ({attempts} attempt(s)): {source}")]
    RemoteApi {
        step: ApiStep,
        attempts: u32,
        #[source]
        source: ApiError,
    },

    #[error("Failed to report build outputs: {0}")]
    Output(#[from] std::io::Error),
}

impl TriggerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TriggerError::InvalidParameters(_) => ErrorKind::InvalidParameters,
            TriggerError::MissingCredentials { .. } => ErrorKind::MissingCredentials,
            TriggerError::MalformedKey(_) => ErrorKind::MalformedKey,
            TriggerError::RemoteApi { .. } => ErrorKind::RemoteApi,
            TriggerError::Output(_) => ErrorKind::Output,
        }
    }

    /// True when a retried remote call failed on every attempt.
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, TriggerError::RemoteApi { attempts, .. } if *attempts > 1)
    }
}

/// Failures talking to the App Store Connect API.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Status { status: u16, message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("No git reference found for branch '{branch}'")]
    GitReferenceNotFound { branch: String },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Invalid client configuration: {0}")]
    Client(String),
}

pub type Result<T> = std::result::Result<T, TriggerError>;
