//! Platform challenge abstraction — biometric or device-passcode prompts.
//!
//! The actual prompt lives behind [`ChallengeProvider`] so the guard and
//! authenticator stay testable: production wires a platform implementation,
//! tests script one. [`NullChallengeProvider`] is the fallback when no
//! mechanism exists on the device.

use async_trait::async_trait;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors from challenge evaluation.
#[derive(Debug, Error)]
pub enum ChallengeError {
    /// No biometric hardware or device passcode is available.
    #[error("no biometric or passcode challenge available")]
    Unavailable,

    /// The user dismissed the prompt.
    #[error("challenge cancelled by the user")]
    Cancelled,

    /// The platform rejected the verification (wrong biometry, bad
    /// passcode).
    #[error("challenge verification failed: {0}")]
    Failed(String),

    /// Platform-specific error outside the verification itself.
    #[error("platform error: {0}")]
    Platform(String),
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// Which mechanism the platform will present when challenged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiometryKind {
    /// Numeric or alphanumeric device passcode.
    DevicePasscode,
    /// Fingerprint sensor.
    Fingerprint,
    /// Face recognition.
    Face,
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Platform challenge provider abstraction.
///
/// `probe` is called once during authenticator initialization; `evaluate`
/// presents the platform prompt and suspends until the user resolves or
/// dismisses it.
#[async_trait]
pub trait ChallengeProvider: Send + Sync {
    /// Detect which challenge mechanism the device offers.
    ///
    /// # Errors
    ///
    /// Returns [`ChallengeError::Unavailable`] when the device offers
    /// nothing, or a platform error when detection itself breaks.
    async fn probe(&self) -> Result<BiometryKind, ChallengeError>;

    /// Present the platform prompt with the given user-facing reason.
    ///
    /// Resolves to whether the user passed the challenge.
    ///
    /// # Errors
    ///
    /// Returns [`ChallengeError::Cancelled`] when the user dismisses the
    /// prompt, or another [`ChallengeError`] when the platform fails.
    async fn evaluate(&self, reason: &str) -> Result<bool, ChallengeError>;
}

// ---------------------------------------------------------------------------
// Null provider (fallback)
// ---------------------------------------------------------------------------

/// Fallback provider when no challenge mechanism is available.
pub struct NullChallengeProvider;

#[async_trait]
impl ChallengeProvider for NullChallengeProvider {
    async fn probe(&self) -> Result<BiometryKind, ChallengeError> {
        Err(ChallengeError::Unavailable)
    }

    async fn evaluate(&self, _reason: &str) -> Result<bool, ChallengeError> {
        Err(ChallengeError::Unavailable)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_provider_probe_is_unavailable() {
        let provider = NullChallengeProvider;
        let result = provider.probe().await;
        assert!(matches!(result, Err(ChallengeError::Unavailable)));
    }

    #[tokio::test]
    async fn null_provider_evaluate_is_unavailable() {
        let provider = NullChallengeProvider;
        let result = provider.evaluate("unlock").await;
        assert!(matches!(result, Err(ChallengeError::Unavailable)));
    }

    #[test]
    fn challenge_error_display() {
        assert_eq!(
            ChallengeError::Unavailable.to_string(),
            "no biometric or passcode challenge available"
        );
        assert_eq!(
            ChallengeError::Cancelled.to_string(),
            "challenge cancelled by the user"
        );
        assert_eq!(
            ChallengeError::Failed("wrong finger".into()).to_string(),
            "challenge verification failed: wrong finger"
        );
    }
}
