// Error types for tracking operations
//
// Acquisition errors are recoverable and retried inside the acquirer. Store errors
// abort the triggering operation but never the process. Tracker errors are what the
// command layer sees and renders for the user.

use thiserror::Error;

use crate::entity::EntityKey;

/// Result type alias for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Why a single acquisition attempt (or the whole retry budget) failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionReason {
    /// The anti-bot defense intercepted the request
    Blocked,
    /// The source did not answer in time
    Timeout,
    /// No count marker could be located in the response
    ParseFailure,
    /// A count was found but it was zero or not a number
    InvalidCount,
    /// Transport failure or unexpected HTTP status
    Http,
}

impl std::fmt::Display for AcquisitionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocked => write!(f, "blocked"),
            Self::Timeout => write!(f, "timeout"),
            Self::ParseFailure => write!(f, "parse_failure"),
            Self::InvalidCount => write!(f, "invalid_count"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Errors produced while acquiring a fresh count
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("site access is temporarily restricted: {0}")]
    Blocked(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("product count not found: {0}")]
    ParseFailure(String),

    #[error("invalid product count: {0}")]
    InvalidCount(String),

    #[error("request failed: {0}")]
    Http(String),
}

impl AcquisitionError {
    pub fn blocked(msg: impl Into<String>) -> Self {
        Self::Blocked(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseFailure(msg.into())
    }

    pub fn invalid_count(msg: impl Into<String>) -> Self {
        Self::InvalidCount(msg.into())
    }

    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Classification of this error
    pub fn reason(&self) -> AcquisitionReason {
        match self {
            Self::Blocked(_) => AcquisitionReason::Blocked,
            Self::Timeout(_) => AcquisitionReason::Timeout,
            Self::ParseFailure(_) => AcquisitionReason::ParseFailure,
            Self::InvalidCount(_) => AcquisitionReason::InvalidCount,
            Self::Http(_) => AcquisitionReason::Http,
        }
    }
}

/// Errors from the flat-file stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Errors surfaced to the command layer
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Entity or subscription does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Entity definition rejected (bad key or locator)
    #[error("invalid entity: {0}")]
    InvalidEntity(String),

    /// Acquisition exhausted its retry budget
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    /// File I/O failure, the triggering operation was aborted
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
}

impl TrackerError {
    pub fn entity_not_found(key: &EntityKey) -> Self {
        Self::NotFound(format!("category \"{}\"", key))
    }

    pub fn subscription_not_found(key: &EntityKey) -> Self {
        Self::NotFound(format!("subscription to \"{}\"", key))
    }

    pub fn invalid_entity(msg: impl Into<String>) -> Self {
        Self::InvalidEntity(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
