//! Error taxonomy of the realtime layer.
//!
//! Anything that can reach a client is a `RealtimeError`, rendered through
//! `ErrorCode` into an ERROR frame or a private error reply. Malformed
//! identifiers fail closed as `AccessDenied`.

use crate::destination::DestinationError;
use crate::frame::ErrorCode;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("Authentication required")]
    AuthRequired,
    #[error("Access denied: {0}")]
    AccessDenied(String),
    #[error("Presence store unavailable")]
    StoreUnavailable(#[source] StoreError),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for RealtimeError {
    fn from(err: StoreError) -> Self {
        Self::StoreUnavailable(err)
    }
}

impl From<DestinationError> for RealtimeError {
    fn from(err: DestinationError) -> Self {
        match err {
            DestinationError::MalformedBoardId(_) => Self::AccessDenied("invalid board id".into()),
            DestinationError::UnknownAction(dest) => Self::NotFound(dest),
        }
    }
}

impl ErrorCode for RealtimeError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::AuthRequired => "E_AUTH_REQUIRED",
            Self::AccessDenied(_) => "E_ACCESS_DENIED",
            Self::StoreUnavailable(_) => "E_STORE_UNAVAILABLE",
            Self::NotFound(_) => "E_NOT_FOUND",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}
