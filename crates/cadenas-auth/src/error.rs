//! Authentication error types for `cadenas-auth`.

use thiserror::Error;

use crate::challenge::ChallengeError;

/// Errors produced by local authentication operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A challenge was requested before capability detection finished.
    /// Nothing was shown to the user, so this never counts as a failed
    /// attempt.
    #[error("challenge requested before initialization completed")]
    ChallengeNotReady,

    /// The underlying platform challenge failed outright.
    #[error("challenge error: {0}")]
    Challenge(#[from] ChallengeError),
}
