use crate::store::StoreError;
use thiserror::Error;

/// Every way a search can end without a result.
///
/// Each variant carries one user-actionable message. "No face in the probe"
/// is its own variant and never folds into an empty match list.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("no face detected in the selfie; try a well-lit, front-facing photo")]
    NoFaceDetected,
    #[error("the selfie could not be read: {0}")]
    InvalidProbe(String),
    #[error("failed to load facial recognition models: {0}")]
    ModelLoad(String),
    #[error(
        "security block: this page is served over HTTPS but the matching API uses plain HTTP ({endpoint}); \
         install TLS on the API (use https://) or put it behind a tunnel"
    )]
    SecurityPolicyViolation { endpoint: String },
    #[error("timed out: the matching API did not answer within {timeout_ms} ms; check that the server is running")]
    Timeout { timeout_ms: u64 },
    #[error(
        "connection failure: could not reach the matching API at {endpoint} ({reason}); \
         check that it is running and accepts cross-origin requests"
    )]
    ConnectionFailure { endpoint: String, reason: String },
    #[error("validation error (422): the matching API rejected the request: {body}")]
    ValidationRejected { body: String },
    #[error("matching API error ({status}): {reason}")]
    RemoteHttp { status: u16, reason: String, body: String },
    #[error("search cancelled")]
    Cancelled,
    #[error("photo store error: {0}")]
    Store(#[from] StoreError),
    #[error("unexpected search failure: {0}")]
    Unknown(String),
}

/// Fieldless mirror of [`SearchError`] for callers that branch on the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchErrorKind {
    NoFaceDetected,
    InvalidProbe,
    ModelLoadFailure,
    SecurityPolicyViolation,
    Timeout,
    ConnectionFailure,
    ValidationRejected,
    RemoteHttpError,
    Cancelled,
    Store,
    Unknown,
}

impl SearchError {
    pub fn kind(&self) -> SearchErrorKind {
        match self {
            SearchError::NoFaceDetected => SearchErrorKind::NoFaceDetected,
            SearchError::InvalidProbe(_) => SearchErrorKind::InvalidProbe,
            SearchError::ModelLoad(_) => SearchErrorKind::ModelLoadFailure,
            SearchError::SecurityPolicyViolation { .. } => SearchErrorKind::SecurityPolicyViolation,
            SearchError::Timeout { .. } => SearchErrorKind::Timeout,
            SearchError::ConnectionFailure { .. } => SearchErrorKind::ConnectionFailure,
            SearchError::ValidationRejected { .. } => SearchErrorKind::ValidationRejected,
            SearchError::RemoteHttp { .. } => SearchErrorKind::RemoteHttpError,
            SearchError::Cancelled => SearchErrorKind::Cancelled,
            SearchError::Store(_) => SearchErrorKind::Store,
            SearchError::Unknown(_) => SearchErrorKind::Unknown,
        }
    }

    /// HTTP status of a remote rejection, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            SearchError::ValidationRejected { .. } => Some(422),
            SearchError::RemoteHttp { status, .. } => Some(*status),
            _ => None,
        }
    }
}
