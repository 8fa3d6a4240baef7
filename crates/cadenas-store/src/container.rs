//! `SQLCipher` container, raw key injection, and migration runner.
//!
//! This module manages the encrypted cache database underneath every local
//! datasource. The encryption key is injected as a raw 256-bit key via
//! `PRAGMA key = "x'<hex>'"` with `PRAGMA kdf_iter = 1` to skip
//! `SQLCipher`'s internal PBKDF2 (the account crypto already derived it).
//!
//! The container itself keeps no open connection. Every store operation
//! asks for a private [`TaskContext`] — a fresh keyed connection tagged
//! with the kind of work it will do — so no two concurrent operations ever
//! share a connection. WAL journal mode lets fetch contexts read a stable
//! snapshot while an insert or delete context writes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use zeroize::Zeroize;

use crate::error::StoreError;
use crate::key::StoreKey;

// ---------------------------------------------------------------------------
// Embedded migrations
// ---------------------------------------------------------------------------

/// Forward-only schema migrations, embedded at build time. The slice
/// position maps to `user_version`: index 0 brings a fresh file to
/// version 1.
const MIGRATIONS: &[&str] = &[
    include_str!("../migrations/001_initial_schema.sql"),
    include_str!("../migrations/002_add_item_pinned.sql"),
];

/// `PRAGMA application_id` stamp ("CDNS") marking a cadenas container.
const APPLICATION_ID: i64 = 0x4344_4E53;

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Task contexts
// ---------------------------------------------------------------------------

/// What a private context was minted for. Used for transaction tagging
/// in logs and error details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Batch upsert work.
    Insert,
    /// Batch delete work.
    Delete,
    /// Read-only fetch and count work.
    Fetch,
}

impl ContextKind {
    /// Short label for logging.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Delete => "delete",
            Self::Fetch => "fetch",
        }
    }
}

/// A private keyed connection serving exactly one store operation.
pub(crate) struct TaskContext {
    conn: Connection,
    kind: ContextKind,
}

impl TaskContext {
    /// Begin an IMMEDIATE transaction.
    ///
    /// IMMEDIATE takes the writer lock up front, so a batch either owns the
    /// database for its whole transaction or waits in the busy timeout —
    /// the committed result of two racing writers is whichever finished
    /// last, row by row.
    pub(crate) fn transaction(&mut self) -> Result<Transaction<'_>, StoreError> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)
    }

    pub(crate) const fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) const fn kind(&self) -> ContextKind {
        self.kind
    }
}

// ---------------------------------------------------------------------------
// StoreContainer
// ---------------------------------------------------------------------------

/// Handle to an encrypted cache container on disk.
///
/// Opening verifies the key, stamps (or checks) the application id, and
/// brings the schema up to date. Afterwards the container only hands out
/// per-operation [`TaskContext`]s; it holds no connection of its own.
pub struct StoreContainer {
    path: PathBuf,
    key: StoreKey,
}

impl fmt::Debug for StoreContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StoreContainer(***)")
    }
}

impl StoreContainer {
    /// Open (or create) the encrypted container at `path`.
    ///
    /// The ceremony: key the file with the raw 256-bit key (internal
    /// PBKDF2 off), prove the key by reading `sqlite_master`, stamp a
    /// fresh file with the cadenas application id (rejecting files
    /// stamped by anyone else), switch on WAL and foreign keys, and run
    /// whatever migrations are still pending.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidKey`] if the key is wrong.
    /// - [`StoreError::UnsupportedContainer`] if the file belongs to
    ///   another application.
    /// - [`StoreError::Migration`] if a migration fails.
    /// - [`StoreError::Database`] for other `SQLCipher` errors.
    pub fn open(path: &Path, key: StoreKey) -> Result<Self, StoreError> {
        let mut conn = Connection::open(path)?;

        // --- Raw key injection ---
        inject_raw_key(&conn, &key)?;

        // --- Verify key (wrong key → SQLITE_NOTADB on first read) ---
        verify_key(&conn)?;

        // --- Application id: stamp fresh files, reject foreign ones ---
        check_application_id(&conn)?;

        // --- WAL is persistent in the file; foreign keys are per-connection ---
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        // --- Run pending migrations ---
        run_migrations(&mut conn)?;

        drop(conn);
        Ok(Self {
            path: path.to_path_buf(),
            key,
        })
    }

    /// Mint a private context for one operation.
    ///
    /// The connection is keyed, verified, and configured from scratch;
    /// nothing is shared with any other in-flight operation.
    pub(crate) fn context(&self, kind: ContextKind) -> Result<TaskContext, StoreError> {
        let conn = Connection::open(&self.path)?;
        inject_raw_key(&conn, &self.key)?;
        verify_key(&conn)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(TaskContext { conn, kind })
    }

    /// The schema version the container currently sits at
    /// (`PRAGMA user_version`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the pragma query fails.
    pub fn schema_version(&self) -> Result<i32, StoreError> {
        let ctx = self.context(ContextKind::Fetch)?;
        let v: i32 = ctx
            .connection()
            .pragma_query_value(None, "user_version", |row| row.get(0))?;
        Ok(v)
    }

    /// The linked `SQLCipher` version string.
    ///
    /// Empty when the binary ended up linked against plain `SQLite`,
    /// where the pragma returns no rows at all.
    #[must_use]
    pub fn cipher_version(&self) -> String {
        self.context(ContextKind::Fetch).map_or_else(
            |_| String::new(),
            |ctx| {
                ctx.connection()
                    .pragma_query_value(None, "cipher_version", |row| row.get(0))
                    .unwrap_or_default()
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Key the connection: `PRAGMA key` with the raw hex literal, then
/// `PRAGMA kdf_iter = 1` since the key arrives already stretched.
///
/// Both heap copies of the key material are zeroized before this
/// returns, on the error path included.
fn inject_raw_key(conn: &Connection, key: &StoreKey) -> Result<(), StoreError> {
    let mut hex_key = encode_hex(key.expose());
    let mut pragma = format!("PRAGMA key = \"x'{hex_key}'\";");

    let result = conn.execute_batch(&pragma);

    hex_key.zeroize();
    pragma.zeroize();

    result?;
    conn.execute_batch("PRAGMA kdf_iter = 1;")?;
    Ok(())
}

/// Prove the key by reading `sqlite_master`.
///
/// `SQLCipher` does not check the key at `PRAGMA key` time; the first
/// page read does, failing with `SQLITE_NOTADB`, which the error
/// conversion turns into [`StoreError::InvalidKey`].
fn verify_key(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch("SELECT count(*) FROM sqlite_master;")?;
    Ok(())
}

/// Stamp a fresh file with [`APPLICATION_ID`], or reject a file stamped
/// by another application. An id of 0 means fresh (or pre-stamp) and is
/// claimed in place.
fn check_application_id(conn: &Connection) -> Result<(), StoreError> {
    let found: i64 = conn.pragma_query_value(None, "application_id", |row| row.get(0))?;
    if found == 0 {
        conn.pragma_update(None, "application_id", APPLICATION_ID)?;
        return Ok(());
    }
    if found == APPLICATION_ID {
        return Ok(());
    }
    Err(StoreError::UnsupportedContainer(found))
}

/// Bring the schema up to the latest embedded version.
///
/// One transaction per migration; the `user_version` bump commits with
/// the migration's DDL, so a crash can never leave a half-applied step
/// marked as done.
fn run_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    let current: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    for (idx, sql) in MIGRATIONS.iter().enumerate() {
        let version = idx
            .checked_add(1)
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| StoreError::Migration("migration index overflow".into()))?;

        if version <= current {
            continue; // already applied
        }

        let tx = conn.transaction().map_err(|e| {
            StoreError::Migration(format!("could not begin migration {version}: {e}"))
        })?;

        tx.execute_batch(sql)
            .map_err(|e| StoreError::Migration(format!("migration {version} failed: {e}")))?;

        tx.pragma_update(None, "user_version", version)
            .map_err(|e| {
                StoreError::Migration(format!("failed to update user_version to {version}: {e}"))
            })?;

        tx.commit().map_err(|e| {
            StoreError::Migration(format!("failed to commit migration {version}: {e}"))
        })?;
    }

    Ok(())
}

/// Lowercase hex of a byte slice, for the `PRAGMA key` literal.
#[must_use]
pub(crate) fn encode_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len().saturating_mul(2));
    for &b in bytes {
        // write! into a String cannot fail short of an allocation panic.
        let _ = write!(s, "{b:02x}");
    }
    s
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
