#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! Integration tests for `StoreContainer` — `SQLCipher` key injection,
//! application id stamping, migration runner, and wrong key detection.

use cadenas_store::{StoreContainer, StoreError, StoreKey};

/// Fresh random key material the test keeps hold of for re-opens.
fn random_key_bytes() -> [u8; 32] {
    *StoreKey::random().expect("CSPRNG should succeed").expose()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Open a raw keyed connection to inspect what the container wrote on disk.
fn raw_connection(path: &std::path::Path, key_bytes: &[u8; 32]) -> rusqlite::Connection {
    let conn = rusqlite::Connection::open(path).expect("open raw connection");
    let key_hex = hex(key_bytes);
    conn.execute_batch(&format!("PRAGMA key = \"x'{key_hex}'\";"))
        .expect("key pragma");
    conn.execute_batch("PRAGMA kdf_iter = 1;")
        .expect("kdf pragma");
    conn
}

// -------------------------------------------------------------------------
// Raw key injection
// -------------------------------------------------------------------------

#[test]
fn open_creates_encrypted_container_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.db");

    let _container =
        StoreContainer::open(&path, StoreKey::new(random_key_bytes())).expect("open");

    // File must exist and have non-trivial size (SQLCipher header + schema).
    let metadata = std::fs::metadata(&path).expect("file should exist");
    assert!(metadata.len() > 0, "container file should not be empty");
}

#[test]
fn cipher_version_returns_non_empty_string() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.db");
    let container = StoreContainer::open(&path, StoreKey::new(random_key_bytes())).expect("open");

    let version = container.cipher_version();
    assert!(
        !version.is_empty(),
        "cipher_version should be non-empty (confirms SQLCipher, not plain SQLite)"
    );
}

#[test]
fn open_with_correct_key_succeeds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.db");
    let key_bytes = random_key_bytes();

    // Create container.
    {
        let container = StoreContainer::open(&path, StoreKey::new(key_bytes)).expect("create");
        drop(container);
    }

    // Re-open with same key.
    let container = StoreContainer::open(&path, StoreKey::new(key_bytes))
        .expect("re-open should succeed");
    let version = container.schema_version().expect("schema_version");
    assert!(version >= 1, "should have at least migration 1 applied");
}

#[test]
fn open_with_wrong_key_returns_invalid_key() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.db");

    // Create container with key A.
    {
        let container =
            StoreContainer::open(&path, StoreKey::new(random_key_bytes())).expect("create");
        drop(container);
    }

    // Try to open with key B.
    let result = StoreContainer::open(&path, StoreKey::new(random_key_bytes()));

    assert!(result.is_err(), "wrong key should fail");
    match result {
        Err(StoreError::InvalidKey) => {} // expected
        Err(other) => panic!("expected InvalidKey, got: {other}"),
        Ok(_) => panic!("should not succeed with wrong key"),
    }
}

// -------------------------------------------------------------------------
// Application id stamping
// -------------------------------------------------------------------------

#[test]
fn foreign_application_id_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.db");
    let key_bytes = [0xAB_u8; 32];

    // Build an encrypted database with the right key but someone else's
    // application id stamp.
    {
        let conn = rusqlite::Connection::open(&path).expect("open");
        let key_hex = hex(&key_bytes);
        conn.execute_batch(&format!("PRAGMA key = \"x'{key_hex}'\";"))
            .expect("key pragma");
        conn.execute_batch("PRAGMA kdf_iter = 1;").expect("kdf");
        conn.execute_batch("CREATE TABLE other_app (id INTEGER);")
            .expect("init file");
        conn.pragma_update(None, "application_id", 0x1234_5678_i64)
            .expect("stamp");
    }

    let result = StoreContainer::open(&path, StoreKey::new(key_bytes));
    match result {
        Err(StoreError::UnsupportedContainer(id)) => assert_eq!(id, 0x1234_5678),
        Err(other) => panic!("expected UnsupportedContainer, got: {other}"),
        Ok(_) => panic!("foreign stamp should be rejected"),
    }
}

#[test]
fn fresh_container_is_stamped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.db");
    let key_bytes = random_key_bytes();

    {
        let _container = StoreContainer::open(&path, StoreKey::new(key_bytes)).expect("create");
    }

    let conn = raw_connection(&path, &key_bytes);
    let stamped: i64 = conn
        .pragma_query_value(None, "application_id", |row| row.get(0))
        .expect("pragma query");
    assert_eq!(stamped, 0x4344_4E53, "fresh file should carry the CDNS stamp");
}

// -------------------------------------------------------------------------
// Migration runner
// -------------------------------------------------------------------------

#[test]
fn migrations_apply_schema_and_set_user_version() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.db");
    let container = StoreContainer::open(&path, StoreKey::new(random_key_bytes())).expect("open");

    let version = container.schema_version().expect("schema_version");
    assert_eq!(version, 2, "user_version should be 2 after all migrations");
}

#[test]
fn initial_schema_creates_all_cache_tables() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.db");
    let key_bytes = random_key_bytes();
    let _container = StoreContainer::open(&path, StoreKey::new(key_bytes)).expect("open");

    let conn = raw_connection(&path, &key_bytes);
    for table in ["vaults", "items", "vault_keys", "item_keys"] {
        let count: i32 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [table],
                |row| row.get(0),
            )
            .expect("query should succeed");
        assert_eq!(count, 1, "table {table} should exist");
    }
}

#[test]
fn initial_schema_creates_indexes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.db");
    let key_bytes = random_key_bytes();
    let _container = StoreContainer::open(&path, StoreKey::new(key_bytes)).expect("open");

    let conn = raw_connection(&path, &key_bytes);
    let expected_indexes = ["idx_vaults_user_id", "idx_items_vault_id", "idx_items_vault_state"];

    for idx_name in &expected_indexes {
        let count: i32 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='index' AND name=?1",
                [idx_name],
                |row| row.get(0),
            )
            .expect("query should succeed");
        assert_eq!(count, 1, "index {idx_name} should exist");
    }
}

#[test]
fn second_migration_adds_pinned_column() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.db");
    let key_bytes = random_key_bytes();
    let _container = StoreContainer::open(&path, StoreKey::new(key_bytes)).expect("open");

    let conn = raw_connection(&path, &key_bytes);
    let count: i32 = conn
        .query_row(
            "SELECT count(*) FROM pragma_table_info('items') WHERE name='pinned'",
            [],
            |row| row.get(0),
        )
        .expect("query should succeed");
    assert_eq!(count, 1, "items.pinned should exist after migration 2");
}

#[test]
fn reopening_container_skips_applied_migrations() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.db");
    let key_bytes = random_key_bytes();

    // Open once — applies all migrations.
    let container = StoreContainer::open(&path, StoreKey::new(key_bytes)).expect("first open");
    assert_eq!(container.schema_version().expect("v"), 2);
    drop(container);

    // Open again — migrations already applied, should be skipped.
    let container = StoreContainer::open(&path, StoreKey::new(key_bytes)).expect("second open");
    assert_eq!(container.schema_version().expect("v"), 2);
    drop(container);

    // Open a third time — still version 2, schema intact.
    let container = StoreContainer::open(&path, StoreKey::new(key_bytes)).expect("third open");
    assert_eq!(container.schema_version().expect("v"), 2);

    let conn = raw_connection(&path, &key_bytes);
    let count: i32 = conn
        .query_row(
            "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='items'",
            [],
            |row| row.get(0),
        )
        .expect("query");
    assert_eq!(count, 1);
}

// -------------------------------------------------------------------------
// Journal mode
// -------------------------------------------------------------------------

#[test]
fn wal_mode_persists_in_the_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.db");
    let key_bytes = random_key_bytes();
    let _container = StoreContainer::open(&path, StoreKey::new(key_bytes)).expect("open");

    let conn = raw_connection(&path, &key_bytes);
    let journal_mode: String = conn
        .pragma_query_value(None, "journal_mode", |row| row.get(0))
        .expect("pragma query");
    assert_eq!(journal_mode.to_lowercase(), "wal");
}

// -------------------------------------------------------------------------
// Debug masking
// -------------------------------------------------------------------------

#[test]
fn container_debug_is_masked() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.db");
    let container = StoreContainer::open(&path, StoreKey::new(random_key_bytes())).expect("open");

    let debug = format!("{container:?}");
    assert_eq!(debug, "StoreContainer(***)");
}

// -------------------------------------------------------------------------
// Open on non-existent path creates a new container
// -------------------------------------------------------------------------

#[test]
fn open_nonexistent_path_creates_new_container() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("brand_new.db");

    assert!(!path.exists(), "file should not exist yet");

    let container = StoreContainer::open(&path, StoreKey::new(random_key_bytes()))
        .expect("open should create new container");

    assert!(path.exists(), "file should now exist");
    assert_eq!(container.schema_version().expect("v"), 2);
}

// -------------------------------------------------------------------------
// Schema constraints
// -------------------------------------------------------------------------

#[test]
fn invalid_item_state_is_rejected_by_check_constraint() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.db");
    let key_bytes = random_key_bytes();
    let _container = StoreContainer::open(&path, StoreKey::new(key_bytes)).expect("open");

    let conn = raw_connection(&path, &key_bytes);
    let result = conn.execute(
        "INSERT INTO items (vault_id, item_id, revision, state, content, key_rotation, create_time, modify_time) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params!["v1", "i1", 1, 9, &[0u8; 16][..], 1, 0, 0],
    );
    assert!(
        result.is_err(),
        "state outside 1..=2 should be rejected by CHECK constraint"
    );
}
