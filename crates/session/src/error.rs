use thiserror::Error;

use crate::remote::RemoteError;
use crate::token_store::TokenStoreError;

/// Errors surfaced by [`Authority`](crate::Authority) operations.
///
/// None of these are fatal: every failure degrades to "logged out".
#[derive(Debug, Error)]
pub enum SessionError {
    /// Bad credentials at login. Nothing was mutated.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The token was rejected or verification timed out.
    #[error("session invalid: {0}")]
    SessionInvalid(String),

    /// Network or infrastructure failure.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("token storage failed: {0}")]
    Storage(#[from] TokenStoreError),
}

impl SessionError {
    /// Map a failure of the verify round trip. A timeout counts as a
    /// rejected session.
    pub(crate) fn from_verify(err: RemoteError) -> Self {
        match err {
            RemoteError::SessionInvalid(msg) => SessionError::SessionInvalid(msg),
            RemoteError::Timeout(after) => {
                SessionError::SessionInvalid(format!("verification timed out after {after:?}"))
            }
            RemoteError::Authentication(msg) => SessionError::SessionInvalid(msg),
            RemoteError::Transport(msg) => SessionError::Transport(msg),
            err @ RemoteError::Protocol { .. } => SessionError::Transport(err.to_string()),
        }
    }

    /// Map a failure of the login round trip.
    pub(crate) fn from_login(err: RemoteError) -> Self {
        match err {
            RemoteError::Authentication(msg) => SessionError::Authentication(msg),
            RemoteError::Timeout(after) => {
                SessionError::Transport(format!("login timed out after {after:?}"))
            }
            RemoteError::SessionInvalid(msg) | RemoteError::Transport(msg) => {
                SessionError::Transport(msg)
            }
            err @ RemoteError::Protocol { .. } => SessionError::Transport(err.to_string()),
        }
    }

    /// Whether the failure means the credential itself was refused.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SessionError::Authentication(_) | SessionError::SessionInvalid(_)
        )
    }
}
