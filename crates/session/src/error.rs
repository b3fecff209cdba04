use thiserror::Error;

use classroom_core::DomainError;

use crate::service::RemoteError;

/// Failures of session and impersonation operations.
///
/// Each variant renders a message precise enough to show the user as is.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("only administrators can impersonate other users")]
    Forbidden,

    #[error("user '{0}' was not found")]
    NotFound(String),

    #[error("already impersonating a user; stop the current impersonation first")]
    AlreadyImpersonating,

    #[error("not currently impersonating")]
    NotImpersonating,

    #[error("session state is inconsistent ({0}); please sign in again")]
    InconsistentState(String),

    #[error("invalid impersonation target: {0}")]
    InvalidTarget(String),

    #[error("another impersonation change is already in progress")]
    OperationInFlight,

    #[error("invalid user record: {0}")]
    InvalidRecord(#[from] DomainError),

    #[error("credential exchange failed: {0}")]
    Exchange(RemoteError),
}

impl From<RemoteError> for SessionError {
    fn from(value: RemoteError) -> Self {
        match value {
            RemoteError::NotFound(id) => SessionError::NotFound(id),
            RemoteError::Forbidden => SessionError::Forbidden,
            RemoteError::AlreadyImpersonating => SessionError::AlreadyImpersonating,
            RemoteError::NotImpersonating => SessionError::NotImpersonating,
            other => SessionError::Exchange(other),
        }
    }
}

impl SessionError {
    /// Whether the UI must send the user back through sign-in.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            SessionError::InconsistentState(_)
                | SessionError::Exchange(RemoteError::Unauthenticated(_))
        )
    }
}
