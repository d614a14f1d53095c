//! Errors returned by backend calls.
//!
//! One type for every external collaborator so the session layer can apply a
//! single retry policy: [`BackendError::AuthExpired`] triggers a credential
//! refresh, everything else is mapped to a request-scoped error.

use thiserror::Error;

/// Errors that can occur while talking to an external backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Token is stale or the backend session was invalidated
    #[error("authentication expired")]
    AuthExpired,

    /// Backend refused the request (permissions, validation)
    #[error("rejected: {0}")]
    Rejected(String),

    /// Referenced document does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend temporarily unreachable or overloaded
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Live connection dropped
    #[error("connection lost")]
    Disconnected,
}

impl BackendError {
    /// Returns true if the call may succeed when repeated later.
    ///
    /// Authentication expiry is not transient: it needs a credential refresh,
    /// not a plain retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_are_transient() {
        assert!(BackendError::Unavailable("503".to_string()).is_transient());
        assert!(BackendError::Disconnected.is_transient());
    }

    #[test]
    fn auth_and_rejections_are_not_transient() {
        assert!(!BackendError::AuthExpired.is_transient());
        assert!(!BackendError::Rejected("forbidden".to_string()).is_transient());
        assert!(!BackendError::NotFound("conv-1".to_string()).is_transient());
    }
}
