//! Store error types for `cadenas-store`.

use thiserror::Error;

/// Errors produced by local datasource operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A batch upsert could not be fully applied. The whole batch rolls
    /// back; no partial rows remain.
    #[error("failed to batch insert entity {entity}: {detail}")]
    BatchInsert {
        /// Name of the entity table the batch targeted.
        entity: &'static str,
        /// Low-level cause or the unconfirmed-result description.
        detail: String,
    },

    /// A batch delete could not be executed. Zero matching rows is a
    /// success, not this error.
    #[error("failed to batch delete entity {entity}: {detail}")]
    BatchDelete {
        /// Name of the entity table the delete targeted.
        entity: &'static str,
        /// Low-level cause.
        detail: String,
    },

    /// The cached key material for a vault is internally inconsistent:
    /// vault keys and item keys must pair up one-to-one by rotation.
    #[error(
        "corrupted keys for vault {vault_id}: {vault_key_count} vault key(s) \
         but {item_key_count} item key(s)"
    )]
    CorruptedVaultKeys {
        /// The vault whose key sets disagree.
        vault_id: String,
        /// Number of cached vault keys.
        vault_key_count: usize,
        /// Number of cached item keys.
        item_key_count: usize,
    },

    /// Incorrect store key — the `SQLCipher` database could not be
    /// decrypted.
    #[error("invalid store key")]
    InvalidKey,

    /// The file decrypted fine but was created by some other application.
    #[error("not a cadenas container (application_id {0:#x})")]
    UnsupportedContainer(i64),

    /// `SQLCipher` database error.
    #[error("database error: {0}")]
    Database(String),

    /// Migration error during schema upgrade.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error from the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The background context finished without delivering a result
    /// (worker panic or runtime shutdown mid-operation).
    #[error("background context for {entity} aborted: {detail}")]
    ContextAborted {
        /// Name of the entity table the operation targeted.
        entity: &'static str,
        /// Join failure description.
        detail: String,
    },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        // SQLITE_NOTADB (code 26) signals an incorrect encryption key.
        if let rusqlite::Error::SqliteFailure(ref ffi_err, _) = err {
            if ffi_err.code == rusqlite::ffi::ErrorCode::NotADatabase {
                return Self::InvalidKey;
            }
        }
        Self::Database(err.to_string())
    }
}
