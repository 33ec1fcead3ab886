//! Error taxonomy for the feed engine.
//!
//! Fetch and decode failures never reach query callers: the refresh cache
//! absorbs them and keeps serving the last good snapshot. The only error a
//! query can observe is [`QueryError`].

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("{url} answered with HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("invalid feed url {url:?}: {message}")]
    InvalidUrl { url: String, message: String },
}

impl FetchError {
    /// Short label used in logs and history rows.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout { .. } => "timeout",
            FetchError::Network { .. } => "network",
            FetchError::HttpStatus { .. } => "http_status",
            FetchError::InvalidUrl { .. } => "invalid_url",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed feed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("unsupported gtfs-realtime version {0:?}")]
    UnsupportedVersion(String),

    #[error("unexpected feed schema: {0}")]
    UnexpectedSchema(String),
}

impl DecodeError {
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::MalformedEnvelope(_) => "malformed_envelope",
            DecodeError::UnsupportedVersion(_) | DecodeError::UnexpectedSchema(_) => {
                "unexpected_schema"
            }
        }
    }
}

/// Failure of a single endpoint within a refresh cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("fetch failed for {endpoint}: {source}")]
    Fetch {
        endpoint: String,
        #[source]
        source: FetchError,
    },

    #[error("decode failed for {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: DecodeError,
    },
}

impl EndpointError {
    pub fn endpoint(&self) -> &str {
        match self {
            EndpointError::Fetch { endpoint, .. } | EndpointError::Decode { endpoint, .. } => {
                endpoint
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EndpointError::Fetch { source, .. } => source.kind(),
            EndpointError::Decode { source, .. } => source.kind(),
        }
    }
}

/// Why a refresh cycle did not produce a new snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CycleError {
    #[error("no feed endpoints configured")]
    NoEndpoints,

    #[error("cycle deadline of {deadline_secs}s elapsed")]
    DeadlineElapsed { deadline_secs: u64 },

    #[error("{} endpoint(s) failed", .0.len())]
    Endpoints(Vec<EndpointError>),

    #[error("refresh task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum StaticDataError {
    #[error("failed reading '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record in '{path}': {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("required file '{0}' is missing from the static dataset")]
    MissingFile(String),

    #[error("static dataset contains no usable route shapes")]
    NoShapes,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("feed data not yet available")]
    NotYetAvailable,
}
