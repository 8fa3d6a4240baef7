//! Raw container key material.
//!
//! The 256-bit key is derived upstream (account crypto, not this crate) and
//! handed over already stretched; the container injects it verbatim into
//! `SQLCipher`. Wrapped here so it is zeroized on drop and never printed.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::StoreError;

/// Raw 256-bit key for one store container. Zeroized on drop.
pub struct StoreKey {
    bytes: [u8; 32],
}

impl StoreKey {
    /// Wrap an externally derived key.
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Generate a fresh key from the system CSPRNG.
    ///
    /// Used when a brand-new local cache is provisioned; re-opening an
    /// existing cache always goes through [`new`](Self::new) with the key
    /// the caller re-derived.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the system CSPRNG fails.
    pub fn random() -> Result<Self, StoreError> {
        let mut bytes = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
        Ok(Self { bytes })
    }

    /// Expose the raw bytes for `PRAGMA key` injection.
    #[must_use]
    pub const fn expose(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl Drop for StoreKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StoreKey(***)")
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
