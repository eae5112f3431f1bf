//! Error types shared by backend adapters and decoders

use thiserror::Error;

/// Error returned by a [`BackendAdapter`](crate::BackendAdapter) call
///
/// Backend errors are always surfaced to the calling sink. Whether the
/// failed record is retried or redelivered is the sink's decision.
///
/// # Example
///
/// ```
/// use cygnet_core::BackendError;
///
/// fn create_dir() -> Result<(), BackendError> {
///     Err(BackendError::Rejected {
///         status: 403,
///         reason: "permission denied".to_string(),
///     })
/// }
///
/// match create_dir() {
///     Err(BackendError::Rejected { status, .. }) => assert_eq!(status, 403),
///     _ => unreachable!(),
/// }
/// ```
#[derive(Error, Debug)]
pub enum BackendError {
    /// Local I/O failure (file backends, sockets)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote store answered but refused the operation
    ///
    /// `status` carries the store's own status code (HTTP status for
    /// REST-fronted stores, broker error code for topic stores).
    #[error("rejected by backend (status {status}): {reason}")]
    Rejected {
        /// Store-specific status code
        status: u16,
        /// Message returned by the store
        reason: String,
    },

    /// Could not reach the store
    #[error("connection error: {0}")]
    Connection(String),

    /// The adapter has not been started or has lost its session
    #[error("backend not ready")]
    NotReady,

    /// Releasing resources during shutdown failed
    #[error("shutdown error: {0}")]
    Shutdown(String),
}

impl BackendError {
    /// Whether a later attempt of the same call may succeed
    ///
    /// Remote rejections in the 4xx range are treated as permanent;
    /// everything else is assumed to be transient.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Rejected { status, .. } => !(400..500).contains(status),
            BackendError::Shutdown(_) => false,
            BackendError::Io(_) | BackendError::Connection(_) | BackendError::NotReady => true,
        }
    }
}

/// Error decoding a notification body
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Body is not valid JSON or does not match the notification schema
    #[error("malformed notification: {0}")]
    Malformed(String),

    /// Notification carries no context elements
    #[error("notification has no context elements")]
    Empty,
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Malformed(err.to_string())
    }
}
