//! Failed-attempt tracking and the lockout state machine.
//!
//! The guard turns the persisted failure counter into a bounded state:
//! every failure narrows the remaining attempts until the exhaustion
//! callback forces the session out. The counter outlives the process; the
//! guard itself is built per authentication session and only ever holds a
//! reference to the preference store.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::preferences::PreferenceStore;

/// Tolerated consecutive failures before lockout.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Lock state
// ---------------------------------------------------------------------------

/// User-facing view of the failure counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// No failed attempts recorded.
    NoAttempts,
    /// `n >= 2` attempts left before lockout.
    RemainingAttempts(u32),
    /// Exactly one attempt left — the next failure locks out.
    LastAttempt,
    /// Attempts exhausted. Terminal until an external reset.
    LockedOut,
}

/// Derive the state for a counter value.
///
/// The exhaustion boundary is `>=`, never `==`: concurrent challenges can
/// bump the persisted counter past the maximum in one observable step, and
/// any overshoot is still locked out.
#[must_use]
const fn derive_state(count: u32, max_attempts: u32) -> LockState {
    if count == 0 {
        return LockState::NoAttempts;
    }
    if count >= max_attempts {
        return LockState::LockedOut;
    }
    let remaining = max_attempts.saturating_sub(count);
    if remaining == 1 {
        LockState::LastAttempt
    } else {
        LockState::RemainingAttempts(remaining)
    }
}

// ---------------------------------------------------------------------------
// AttemptGuard
// ---------------------------------------------------------------------------

type Callback = Box<dyn Fn() + Send + Sync>;

/// Session-scoped guard over the persisted failure counter.
///
/// `record_failure` and `record_success` are the only counter mutations in
/// the process; everything else observes. Both are infallible: a failed
/// preference write is logged and the in-memory state machine advances
/// anyway, staying the single source of truth for lockout.
pub struct AttemptGuard {
    preferences: Arc<PreferenceStore>,
    max_attempts: u32,
    /// Set while the guard sits in `LockedOut`; gates the exhaustion
    /// callback to exactly one invocation per crossing.
    lockout_signalled: AtomicBool,
    on_exhausted: Callback,
    on_success: Callback,
    state_tx: watch::Sender<LockState>,
}

impl fmt::Debug for AttemptGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttemptGuard")
            .field("max_attempts", &self.max_attempts)
            .field("state", &self.current_state())
            .finish_non_exhaustive()
    }
}

impl AttemptGuard {
    /// Build a guard with [`DEFAULT_MAX_ATTEMPTS`].
    ///
    /// `on_exhausted` runs once per crossing into lockout (typically: force
    /// sign-out); `on_success` runs after every successful challenge.
    pub fn new<E, S>(preferences: Arc<PreferenceStore>, on_exhausted: E, on_success: S) -> Self
    where
        E: Fn() + Send + Sync + 'static,
        S: Fn() + Send + Sync + 'static,
    {
        Self::with_max_attempts(preferences, DEFAULT_MAX_ATTEMPTS, on_exhausted, on_success)
    }

    /// Build a guard with an explicit attempt budget.
    ///
    /// `max_attempts` is clamped to at least 1. A guard built over an
    /// already-exhausted counter (process restart after lockout) signals
    /// lockout immediately, once.
    pub fn with_max_attempts<E, S>(
        preferences: Arc<PreferenceStore>,
        max_attempts: u32,
        on_exhausted: E,
        on_success: S,
    ) -> Self
    where
        E: Fn() + Send + Sync + 'static,
        S: Fn() + Send + Sync + 'static,
    {
        let (state_tx, _) = watch::channel(LockState::NoAttempts);
        let guard = Self {
            preferences,
            max_attempts: max_attempts.max(1),
            lockout_signalled: AtomicBool::new(false),
            on_exhausted: Box::new(on_exhausted),
            on_success: Box::new(on_success),
            state_tx,
        };
        guard.refresh();
        guard
    }

    /// Record one failed challenge.
    ///
    /// Increments the persisted counter (saturating), logs `reason` when
    /// present, and recomputes the state. Crossing into lockout fires the
    /// exhaustion callback; failures after that only log.
    pub fn record_failure(&self, reason: Option<&dyn Error>) {
        if let Some(reason) = reason {
            tracing::warn!(%reason, "local authentication attempt failed");
        }
        let count = self.preferences.increment_failed_attempts();
        self.apply(count);
    }

    /// Record one passed challenge.
    ///
    /// Resets the persisted counter; the state reads [`LockState::NoAttempts`]
    /// before the success callback runs.
    pub fn record_success(&self) {
        self.preferences.set_failed_attempt_count(0);
        self.apply(0);
        (self.on_success)();
    }

    /// The state derived from the last observed counter value.
    #[must_use]
    pub fn current_state(&self) -> LockState {
        *self.state_tx.borrow()
    }

    /// The clamped attempt budget.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Re-derive the state from the persisted counter.
    ///
    /// Called internally after every mutation and by the observer task
    /// when another handle changes the counter.
    pub fn refresh(&self) {
        self.apply(self.preferences.failed_attempt_count());
    }

    /// Watch the derived state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LockState> {
        self.state_tx.subscribe()
    }

    /// Spawn a task that re-derives the state whenever the preference
    /// store's counter changes, from this guard or any other handle.
    ///
    /// The task ends when the preference store is dropped; abort the
    /// handle to end it earlier.
    #[must_use]
    pub fn spawn_observer(self: &Arc<Self>) -> JoinHandle<()> {
        let guard = Arc::clone(self);
        let mut counter_rx = guard.preferences.subscribe();
        tokio::spawn(async move {
            while counter_rx.changed().await.is_ok() {
                guard.refresh();
            }
        })
    }

    /// Derive, publish, and signal a lockout crossing at most once.
    ///
    /// The callback runs after the state is published and with no lock
    /// held, so it may call back into the guard freely.
    fn apply(&self, count: u32) {
        let state = derive_state(count, self.max_attempts);

        let crossed = if matches!(state, LockState::LockedOut) {
            self.lockout_signalled
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        } else {
            // Leaving lockout re-arms the signal for the next crossing.
            self.lockout_signalled.store(false, Ordering::SeqCst);
            false
        };

        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });

        if crossed {
            tracing::warn!(
                failed_attempts = count,
                max_attempts = self.max_attempts,
                "authentication attempts exhausted"
            );
            (self.on_exhausted)();
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counting_guard(
        preferences: &Arc<PreferenceStore>,
        max_attempts: u32,
    ) -> (AttemptGuard, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let exhausted = Arc::new(AtomicUsize::new(0));
        let succeeded = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&exhausted);
        let s = Arc::clone(&succeeded);
        let guard = AttemptGuard::with_max_attempts(
            Arc::clone(preferences),
            max_attempts,
            move || {
                e.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                s.fetch_add(1, Ordering::SeqCst);
            },
        );
        (guard, exhausted, succeeded)
    }

    #[test]
    fn derivation_table_for_three_attempts() {
        assert_eq!(derive_state(0, 3), LockState::NoAttempts);
        assert_eq!(derive_state(1, 3), LockState::RemainingAttempts(2));
        assert_eq!(derive_state(2, 3), LockState::LastAttempt);
        assert_eq!(derive_state(3, 3), LockState::LockedOut);
        assert_eq!(derive_state(4, 3), LockState::LockedOut);
        assert_eq!(derive_state(u32::MAX, 3), LockState::LockedOut);
    }

    #[test]
    fn single_attempt_budget_has_no_warning_state() {
        assert_eq!(derive_state(0, 1), LockState::NoAttempts);
        assert_eq!(derive_state(1, 1), LockState::LockedOut);
    }

    #[test]
    fn zero_budget_is_clamped_to_one() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Arc::new(PreferenceStore::load(dir.path()));
        let (guard, _, _) = counting_guard(&prefs, 0);
        assert_eq!(guard.max_attempts(), 1);
    }

    #[test]
    fn three_failures_walk_the_states_and_lock_out() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Arc::new(PreferenceStore::load(dir.path()));
        let (guard, exhausted, _) = counting_guard(&prefs, 3);

        assert_eq!(guard.current_state(), LockState::NoAttempts);

        guard.record_failure(None);
        assert_eq!(guard.current_state(), LockState::RemainingAttempts(2));

        guard.record_failure(None);
        assert_eq!(guard.current_state(), LockState::LastAttempt);
        assert_eq!(exhausted.load(Ordering::SeqCst), 0);

        guard.record_failure(None);
        assert_eq!(guard.current_state(), LockState::LockedOut);
        assert_eq!(exhausted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exhaustion_callback_fires_once_per_crossing() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Arc::new(PreferenceStore::load(dir.path()));
        let (guard, exhausted, _) = counting_guard(&prefs, 2);

        guard.record_failure(None);
        guard.record_failure(None);
        guard.record_failure(None);
        guard.record_failure(None);

        assert_eq!(guard.current_state(), LockState::LockedOut);
        assert_eq!(
            exhausted.load(Ordering::SeqCst),
            1,
            "failures after lockout must not re-fire the callback"
        );
    }

    #[test]
    fn success_resets_from_any_state() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Arc::new(PreferenceStore::load(dir.path()));
        let (guard, _, succeeded) = counting_guard(&prefs, 3);

        guard.record_failure(None);
        guard.record_failure(None);
        guard.record_success();

        assert_eq!(guard.current_state(), LockState::NoAttempts);
        assert_eq!(prefs.failed_attempt_count(), 0);
        assert_eq!(succeeded.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lockout_can_recross_after_a_reset() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Arc::new(PreferenceStore::load(dir.path()));
        let (guard, exhausted, _) = counting_guard(&prefs, 1);

        guard.record_failure(None);
        assert_eq!(exhausted.load(Ordering::SeqCst), 1);

        guard.record_success();
        guard.record_failure(None);
        assert_eq!(
            exhausted.load(Ordering::SeqCst),
            2,
            "a fresh crossing after reset signals again"
        );
    }

    #[test]
    fn guard_over_exhausted_counter_signals_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Arc::new(PreferenceStore::load(dir.path()));
        prefs.set_failed_attempt_count(7);

        let (guard, exhausted, _) = counting_guard(&prefs, 3);
        assert_eq!(guard.current_state(), LockState::LockedOut);
        assert_eq!(exhausted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn refresh_picks_up_external_counter_changes() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Arc::new(PreferenceStore::load(dir.path()));
        let (guard, _, _) = counting_guard(&prefs, 3);

        prefs.set_failed_attempt_count(2);
        assert_eq!(
            guard.current_state(),
            LockState::NoAttempts,
            "state lags until refresh or observer runs"
        );

        guard.refresh();
        assert_eq!(guard.current_state(), LockState::LastAttempt);
    }

    #[test]
    fn recorded_reason_is_only_logged() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Arc::new(PreferenceStore::load(dir.path()));
        let (guard, _, _) = counting_guard(&prefs, 3);

        let err = std::io::Error::other("sensor offline");
        guard.record_failure(Some(&err));
        guard.record_failure(None);

        // With or without a reason, each failure weighs the same.
        assert_eq!(guard.current_state(), LockState::LastAttempt);
    }
}
