//! Error types for agenda sync

use thiserror::Error;

/// Result type alias for agenda sync operations
pub type Result<T> = std::result::Result<T, AgendaSyncError>;

/// Coarse error taxonomy used by callers to decide how to surface a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No connectivity or transport failure
    Network,
    /// Input rejected before anything was sent
    Validation,
    /// The backend answered but refused the request
    ServerRejected,
    /// The orchestrator was driven out of order or raced
    State,
    /// Anything else (serialization, IO, config)
    Internal,
}

/// Main error type for agenda sync
#[derive(Error, Debug)]
pub enum AgendaSyncError {
    #[error("HTTP request error: {0}")]
    #[cfg(feature = "http")]
    Http(#[from] reqwest::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(not(feature = "http"))]
    Http(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Request rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("Sync rejected: {0}")]
    SyncRejected(String),

    #[error("Invalid state: expected {expected}, was {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("A sync request is already in flight")]
    Busy,

    #[error("Response arrived for a session that is no longer active")]
    StaleResponse,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AgendaSyncError {
    /// Check if the user can simply try again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgendaSyncError::Http(_) | AgendaSyncError::Connection(_)
        )
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgendaSyncError::Http(_) | AgendaSyncError::Connection(_) => ErrorKind::Network,
            AgendaSyncError::InvalidInput(_) => ErrorKind::Validation,
            AgendaSyncError::Rejected { .. } | AgendaSyncError::SyncRejected(_) => {
                ErrorKind::ServerRejected
            }
            AgendaSyncError::InvalidState { .. }
            | AgendaSyncError::Busy
            | AgendaSyncError::StaleResponse => ErrorKind::State,
            AgendaSyncError::Serialization(_)
            | AgendaSyncError::Io(_)
            | AgendaSyncError::Config(_) => ErrorKind::Internal,
        }
    }

    /// Message suitable for a toast or inline error
    pub fn user_message(&self) -> String {
        match self {
            AgendaSyncError::Rejected { detail, .. } => detail.clone(),
            AgendaSyncError::SyncRejected(detail) => detail.clone(),
            AgendaSyncError::InvalidInput(msg) => msg.clone(),
            e if e.kind() == ErrorKind::Network => "Connection error".to_string(),
            e => e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy() {
        assert_eq!(
            AgendaSyncError::Connection("refused".into()).kind(),
            ErrorKind::Network
        );
        assert_eq!(
            AgendaSyncError::InvalidInput("cognome".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            AgendaSyncError::Rejected {
                status: 400,
                detail: "bad".into()
            }
            .kind(),
            ErrorKind::ServerRejected
        );
        assert_eq!(AgendaSyncError::Busy.kind(), ErrorKind::State);
    }

    #[test]
    fn test_only_network_errors_are_retryable() {
        assert!(AgendaSyncError::Connection("timeout".into()).is_retryable());
        assert!(!AgendaSyncError::SyncRejected("no".into()).is_retryable());
        assert!(!AgendaSyncError::StaleResponse.is_retryable());
    }

    #[test]
    fn test_user_message_prefers_backend_detail() {
        let err = AgendaSyncError::Rejected {
            status: 422,
            detail: "Foglio non trovato".into(),
        };
        assert_eq!(err.user_message(), "Foglio non trovato");
        assert_eq!(
            AgendaSyncError::Connection("dns".into()).user_message(),
            "Connection error"
        );
    }
}
