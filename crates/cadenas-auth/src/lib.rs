//! `cadenas-auth` — Local authentication for CADENAS.
//!
//! Tracks failed unlock attempts in a durable counter, derives the
//! lockout state machine from it, and wraps the platform biometric or
//! passcode challenge behind a provider trait.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod authenticator;
pub mod challenge;
pub mod error;
pub mod guard;
pub mod preferences;

pub use authenticator::{BiometryState, LocalAuthenticator};
pub use challenge::{BiometryKind, ChallengeError, ChallengeProvider, NullChallengeProvider};
pub use error::AuthError;
pub use guard::{AttemptGuard, LockState, DEFAULT_MAX_ATTEMPTS};
pub use preferences::{AuthPreferences, PreferenceStore};
