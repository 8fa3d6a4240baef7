//! Local authenticator — capability detection plus guarded challenges.

use std::sync::{Arc, Mutex, PoisonError};

use crate::challenge::{BiometryKind, ChallengeProvider};
use crate::error::AuthError;
use crate::guard::AttemptGuard;

// ---------------------------------------------------------------------------
// Biometry state
// ---------------------------------------------------------------------------

/// Progress of challenge capability detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BiometryState {
    /// Detection has not started.
    Idle,
    /// Probe in flight.
    Initializing,
    /// Device offers this mechanism; challenges may run.
    Ready(BiometryKind),
    /// Device offers nothing usable.
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// LocalAuthenticator
// ---------------------------------------------------------------------------

/// Front door for local authentication challenges.
///
/// Wraps the platform [`ChallengeProvider`] behind an initialization state
/// machine: a challenge may only run once [`initialize`](Self::initialize)
/// has probed the device. Challenges requested earlier fail with
/// [`AuthError::ChallengeNotReady`] and never touch the attempt counter —
/// nothing was shown to the user yet.
pub struct LocalAuthenticator {
    provider: Arc<dyn ChallengeProvider>,
    state: Mutex<BiometryState>,
}

impl std::fmt::Debug for LocalAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAuthenticator")
            .field("state", &self.biometry_state())
            .finish_non_exhaustive()
    }
}

impl LocalAuthenticator {
    #[must_use]
    pub fn new(provider: Arc<dyn ChallengeProvider>) -> Self {
        Self {
            provider,
            state: Mutex::new(BiometryState::Idle),
        }
    }

    /// Probe the device and settle into `Ready` or `Unavailable`.
    ///
    /// Never returns an error: a failed probe is a valid outcome, recorded
    /// in the state and logged.
    pub async fn initialize(&self) {
        self.set_state(BiometryState::Initializing);
        match self.provider.probe().await {
            Ok(kind) => {
                tracing::debug!(?kind, "challenge mechanism detected");
                self.set_state(BiometryState::Ready(kind));
            }
            Err(e) => {
                tracing::warn!(error = %e, "no challenge mechanism available");
                self.set_state(BiometryState::Unavailable(e.to_string()));
            }
        }
    }

    /// Current detection state.
    #[must_use]
    pub fn biometry_state(&self) -> BiometryState {
        self.lock().clone()
    }

    /// Present the platform challenge and return whether it passed.
    ///
    /// Does not record anything; pair with
    /// [`authenticate_with_guard`](Self::authenticate_with_guard) for
    /// attempt tracking.
    ///
    /// # Errors
    ///
    /// [`AuthError::ChallengeNotReady`] before a successful
    /// [`initialize`](Self::initialize); [`AuthError::Challenge`] when the
    /// platform fails or the user cancels.
    pub async fn authenticate(&self, reason: &str) -> Result<bool, AuthError> {
        if !matches!(self.biometry_state(), BiometryState::Ready(_)) {
            return Err(AuthError::ChallengeNotReady);
        }
        Ok(self.provider.evaluate(reason).await?)
    }

    /// Present the challenge and record the outcome on `guard`.
    ///
    /// Pass → `record_success`. Explicit rejection → `record_failure`.
    /// Evaluation error, cancellation included, also counts as a failure —
    /// dismissing the prompt must not grant free retries. The error itself
    /// is consumed into the counter; the caller only sees whether access
    /// was granted.
    ///
    /// # Errors
    ///
    /// [`AuthError::ChallengeNotReady`] before initialization; the counter
    /// is untouched in that case.
    pub async fn authenticate_with_guard(
        &self,
        guard: &AttemptGuard,
        reason: &str,
    ) -> Result<bool, AuthError> {
        match self.authenticate(reason).await {
            Ok(true) => {
                guard.record_success();
                Ok(true)
            }
            Ok(false) => {
                guard.record_failure(None);
                Ok(false)
            }
            Err(AuthError::ChallengeNotReady) => Err(AuthError::ChallengeNotReady),
            Err(AuthError::Challenge(e)) => {
                guard.record_failure(Some(&e));
                Ok(false)
            }
        }
    }

    fn set_state(&self, state: BiometryState) {
        *self.lock() = state;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BiometryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::challenge::{ChallengeError, NullChallengeProvider};

    struct AlwaysFace;

    #[async_trait]
    impl ChallengeProvider for AlwaysFace {
        async fn probe(&self) -> Result<BiometryKind, ChallengeError> {
            Ok(BiometryKind::Face)
        }

        async fn evaluate(&self, _reason: &str) -> Result<bool, ChallengeError> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn starts_idle() {
        let auth = LocalAuthenticator::new(Arc::new(AlwaysFace));
        assert_eq!(auth.biometry_state(), BiometryState::Idle);
    }

    #[tokio::test]
    async fn initialize_settles_into_ready() {
        let auth = LocalAuthenticator::new(Arc::new(AlwaysFace));
        auth.initialize().await;
        assert_eq!(auth.biometry_state(), BiometryState::Ready(BiometryKind::Face));
    }

    #[tokio::test]
    async fn initialize_settles_into_unavailable_without_hardware() {
        let auth = LocalAuthenticator::new(Arc::new(NullChallengeProvider));
        auth.initialize().await;
        assert!(matches!(
            auth.biometry_state(),
            BiometryState::Unavailable(_)
        ));
    }

    #[tokio::test]
    async fn authenticate_before_initialize_is_not_ready() {
        let auth = LocalAuthenticator::new(Arc::new(AlwaysFace));
        let result = auth.authenticate("unlock").await;
        assert!(matches!(result, Err(AuthError::ChallengeNotReady)));
    }

    #[tokio::test]
    async fn authenticate_after_failed_initialize_is_not_ready() {
        let auth = LocalAuthenticator::new(Arc::new(NullChallengeProvider));
        auth.initialize().await;
        let result = auth.authenticate("unlock").await;
        assert!(matches!(result, Err(AuthError::ChallengeNotReady)));
    }

    #[tokio::test]
    async fn authenticate_passes_through_the_provider_verdict() {
        let auth = LocalAuthenticator::new(Arc::new(AlwaysFace));
        auth.initialize().await;
        assert!(auth.authenticate("unlock").await.unwrap());
    }
}
