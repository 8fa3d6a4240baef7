//! Durable authentication preferences — stored as plain JSON.
//!
//! Holds the failed-attempt counter and the biometric opt-in flag. Nothing
//! in this file is secret; the counter must be readable before any unlock
//! so the lockout state can be derived immediately on app start.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

// ── Preference data ────────────────────────────────────────────────

/// On-disk authentication preferences.
///
/// Persisted to `{data_dir}/auth_preferences.json`. All fields have
/// defaults via [`Default`], so partial or corrupt files degrade
/// gracefully.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthPreferences {
    /// Consecutive failed local-authentication attempts.
    #[serde(default)]
    pub failed_attempt_count: u32,

    /// Whether the user opted into the biometric challenge.
    #[serde(default = "default_biometric_enabled")]
    pub biometric_enabled: bool,
}

impl Default for AuthPreferences {
    fn default() -> Self {
        Self {
            failed_attempt_count: 0,
            biometric_enabled: default_biometric_enabled(),
        }
    }
}

const fn default_biometric_enabled() -> bool {
    true
}

// ── Store ──────────────────────────────────────────────────────────

const PREFERENCES_FILE: &str = "auth_preferences.json";
const PREFERENCES_TMP: &str = ".auth_preferences.json.tmp";

/// Shared, observable handle over the preference file.
///
/// Reads come from memory; every mutation updates memory, notifies
/// counter watchers, then persists. A failed persist is logged and does
/// not roll the in-memory value back — memory is the source of truth for
/// a running session, and the next successful write repairs the file.
#[derive(Debug)]
pub struct PreferenceStore {
    data_dir: PathBuf,
    inner: Mutex<AuthPreferences>,
    counter_tx: watch::Sender<u32>,
}

impl PreferenceStore {
    /// Load preferences from `{data_dir}/auth_preferences.json`.
    ///
    /// Missing or invalid files load as [`AuthPreferences::default()`]
    /// (corrupt-file recovery).
    #[must_use]
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(PREFERENCES_FILE);
        let prefs = fs::read_to_string(&path).map_or_else(
            |_| AuthPreferences::default(),
            |contents| serde_json::from_str(&contents).unwrap_or_default(),
        );
        let (counter_tx, _) = watch::channel(prefs.failed_attempt_count);
        Self {
            data_dir: data_dir.to_path_buf(),
            inner: Mutex::new(prefs),
            counter_tx,
        }
    }

    /// Current failed-attempt counter.
    #[must_use]
    pub fn failed_attempt_count(&self) -> u32 {
        self.lock().failed_attempt_count
    }

    /// Overwrite the failed-attempt counter.
    ///
    /// Watchers observe the new value before the file write happens, so
    /// derived state never lags the counter.
    pub fn set_failed_attempt_count(&self, count: u32) {
        let snapshot = {
            let mut prefs = self.lock();
            prefs.failed_attempt_count = count;
            prefs.clone()
        };
        self.counter_tx.send_replace(count);
        self.persist(&snapshot);
    }

    /// Atomically bump the counter by one (saturating) and return the new
    /// value.
    pub fn increment_failed_attempts(&self) -> u32 {
        let (count, snapshot) = {
            let mut prefs = self.lock();
            prefs.failed_attempt_count = prefs.failed_attempt_count.saturating_add(1);
            (prefs.failed_attempt_count, prefs.clone())
        };
        self.counter_tx.send_replace(count);
        self.persist(&snapshot);
        count
    }

    /// Whether the biometric challenge is enabled.
    #[must_use]
    pub fn biometric_enabled(&self) -> bool {
        self.lock().biometric_enabled
    }

    /// Toggle the biometric challenge opt-in.
    pub fn set_biometric_enabled(&self, enabled: bool) {
        let snapshot = {
            let mut prefs = self.lock();
            prefs.biometric_enabled = enabled;
            prefs.clone()
        };
        self.persist(&snapshot);
    }

    /// Watch the failed-attempt counter for external changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u32> {
        self.counter_tx.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AuthPreferences> {
        // A poisoned lock still holds valid preferences; keep serving them.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist a snapshot with the atomic write pattern (write to `.tmp`,
    /// then rename). Failures are logged, never propagated: the in-memory
    /// state stays authoritative for this session.
    fn persist(&self, prefs: &AuthPreferences) {
        if let Err(e) = write_atomically(&self.data_dir, prefs) {
            tracing::error!(error = %e, "failed to persist auth preferences");
        }
    }
}

fn write_atomically(data_dir: &Path, prefs: &AuthPreferences) -> std::io::Result<()> {
    let path = data_dir.join(PREFERENCES_FILE);
    let tmp = data_dir.join(PREFERENCES_TMP);

    let json = serde_json::to_string_pretty(prefs)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    fs::write(&tmp, &json)?;

    // Restrict file permissions to owner-only on Unix (defense-in-depth)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
    }

    fs::rename(&tmp, &path)?;

    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_zero_attempts_and_biometrics_on() {
        let prefs = AuthPreferences::default();
        assert_eq!(prefs.failed_attempt_count, 0);
        assert!(prefs.biometric_enabled);
    }

    #[test]
    fn load_returns_default_on_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = PreferenceStore::load(dir.path());
        assert_eq!(store.failed_attempt_count(), 0);
        assert!(store.biometric_enabled());
    }

    #[test]
    fn counter_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();

        {
            let store = PreferenceStore::load(dir.path());
            store.set_failed_attempt_count(2);
            store.set_biometric_enabled(false);
        }

        let reloaded = PreferenceStore::load(dir.path());
        assert_eq!(reloaded.failed_attempt_count(), 2);
        assert!(!reloaded.biometric_enabled());
    }

    #[test]
    fn load_recovers_from_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PREFERENCES_FILE);
        fs::write(&path, "{ this is not valid json }}}").unwrap();

        let store = PreferenceStore::load(dir.path());
        assert_eq!(store.failed_attempt_count(), 0);
    }

    #[test]
    fn load_handles_partial_json_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PREFERENCES_FILE);
        // Only the counter is set — the flag should default.
        fs::write(&path, r#"{"failedAttemptCount":5}"#).unwrap();

        let store = PreferenceStore::load(dir.path());
        assert_eq!(store.failed_attempt_count(), 5);
        assert!(store.biometric_enabled());
    }

    #[test]
    fn save_is_atomic_via_tmp_file() {
        let dir = TempDir::new().unwrap();
        let store = PreferenceStore::load(dir.path());
        store.set_failed_attempt_count(1);

        // The tmp file should NOT exist after a successful save.
        assert!(!dir.path().join(PREFERENCES_TMP).exists());
        assert!(dir.path().join(PREFERENCES_FILE).exists());
    }

    #[cfg(unix)]
    #[test]
    fn save_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = PreferenceStore::load(dir.path());
        store.set_failed_attempt_count(1);

        let path = dir.path().join(PREFERENCES_FILE);
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "auth_preferences.json should be owner-only (0600)");
    }

    #[test]
    fn serde_uses_camel_case() {
        let json = serde_json::to_string(&AuthPreferences::default()).unwrap();
        assert!(json.contains("failedAttemptCount"));
        assert!(json.contains("biometricEnabled"));
        assert!(!json.contains("failed_attempt_count"));
        assert!(!json.contains("biometric_enabled"));
    }

    #[test]
    fn increment_saturates_at_u32_max() {
        let dir = TempDir::new().unwrap();
        let store = PreferenceStore::load(dir.path());
        store.set_failed_attempt_count(u32::MAX);
        assert_eq!(store.increment_failed_attempts(), u32::MAX);
    }

    #[tokio::test]
    async fn watchers_see_the_counter_before_the_file_write() {
        let dir = TempDir::new().unwrap();
        let store = PreferenceStore::load(dir.path());
        let mut rx = store.subscribe();

        store.increment_failed_attempts();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }

    #[test]
    fn persist_failure_keeps_memory_value() {
        let dir = TempDir::new().unwrap();
        let store = PreferenceStore::load(dir.path());
        // Removing the directory makes every subsequent persist fail.
        drop(dir);

        store.set_failed_attempt_count(3);
        assert_eq!(store.failed_attempt_count(), 3);
    }
}
