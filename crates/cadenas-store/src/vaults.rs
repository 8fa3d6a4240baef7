//! Vault metadata cache — records, domain type, and datasource.
//!
//! A vault row caches the encrypted metadata blob the backend returned for
//! one vault of one user. Removal cascades over the vault's items and key
//! material so a deleted vault leaves nothing behind.

use rusqlite::types::Value;
use rusqlite::Row;

use crate::error::StoreError;
use crate::filter::{Filter, Sort};
use crate::items::ItemRecord;
use crate::keys::{ItemKeyRecord, VaultKeyRecord};
use crate::record::Record;
use crate::store::LocalStore;

// ---------------------------------------------------------------------------
// Domain type
// ---------------------------------------------------------------------------

/// One cached vault, as exchanged with callers.
///
/// `content` is ciphertext; decryption happens upstream with the vault key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vault {
    /// Backend identifier.
    pub vault_id: String,
    /// Encrypted vault metadata (name, color, ...).
    pub content: Vec<u8>,
    /// Rotation of the key that encrypted `content`.
    pub key_rotation: i64,
    /// Whether the current user owns the vault.
    pub owner: bool,
    /// Creation epoch seconds, as reported by the backend.
    pub create_time: i64,
}

// ---------------------------------------------------------------------------
// Stored record
// ---------------------------------------------------------------------------

/// Row shape of the `vaults` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaultRecord {
    pub vault_id: String,
    pub user_id: String,
    pub content: Vec<u8>,
    pub key_rotation: i64,
    pub owner: bool,
    pub create_time: i64,
}

impl VaultRecord {
    /// Fill every column from a domain vault scoped to `user_id`.
    pub fn hydrate_from(&mut self, user_id: &str, vault: &Vault) {
        self.vault_id = vault.vault_id.clone();
        self.user_id = user_id.to_owned();
        self.content = vault.content.clone();
        self.key_rotation = vault.key_rotation;
        self.owner = vault.owner;
        self.create_time = vault.create_time;
    }

    /// Convert back to the domain type.
    #[must_use]
    pub fn to_vault(&self) -> Vault {
        Vault {
            vault_id: self.vault_id.clone(),
            content: self.content.clone(),
            key_rotation: self.key_rotation,
            owner: self.owner,
            create_time: self.create_time,
        }
    }
}

impl Record for VaultRecord {
    const ENTITY: &'static str = "vaults";
    const COLUMNS: &'static [&'static str] = &[
        "vault_id",
        "user_id",
        "content",
        "key_rotation",
        "owner",
        "create_time",
    ];

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            vault_id: row.get(0)?,
            user_id: row.get(1)?,
            content: row.get(2)?,
            key_rotation: row.get(3)?,
            owner: row.get(4)?,
            create_time: row.get(5)?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.vault_id.clone()),
            Value::Text(self.user_id.clone()),
            Value::Blob(self.content.clone()),
            Value::Integer(self.key_rotation),
            Value::Integer(i64::from(self.owner)),
            Value::Integer(self.create_time),
        ]
    }
}

// ---------------------------------------------------------------------------
// Datasource
// ---------------------------------------------------------------------------

/// Vault cache operations for one store.
#[derive(Debug, Clone)]
pub struct LocalVaultDatasource {
    store: LocalStore,
}

impl LocalVaultDatasource {
    #[must_use]
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Reconcile `vaults` into the cache for `user_id`.
    ///
    /// Vault identity within the user scope is `vault_id`: a matching row
    /// is updated in place, anything else inserts.
    ///
    /// # Errors
    ///
    /// Propagates [`LocalStore::upsert`] failures.
    pub async fn upsert_vaults(&self, user_id: &str, vaults: Vec<Vault>) -> Result<(), StoreError> {
        let scope = Filter::eq("user_id", user_id.to_owned());
        let uid = user_id.to_owned();
        self.store
            .upsert(
                vaults,
                scope,
                |vault: &Vault, record: &VaultRecord| record.vault_id == vault.vault_id,
                move |vault, record| record.hydrate_from(&uid, vault),
            )
            .await
    }

    /// All cached vaults of `user_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates [`LocalStore::fetch`] failures.
    pub async fn get_vaults(&self, user_id: &str) -> Result<Vec<Vault>, StoreError> {
        let records: Vec<VaultRecord> = self
            .store
            .fetch(
                Filter::eq("user_id", user_id.to_owned()),
                Some(Sort::asc("create_time")),
            )
            .await?;
        Ok(records.iter().map(VaultRecord::to_vault).collect())
    }

    /// One cached vault of `user_id`, if present.
    ///
    /// # Errors
    ///
    /// Propagates [`LocalStore::fetch`] failures.
    pub async fn get_vault(
        &self,
        user_id: &str,
        vault_id: &str,
    ) -> Result<Option<Vault>, StoreError> {
        let records: Vec<VaultRecord> = self
            .store
            .fetch(
                Filter::eq("user_id", user_id.to_owned()).and_eq("vault_id", vault_id.to_owned()),
                None,
            )
            .await?;
        debug_assert!(records.len() <= 1, "vault_id is unique within a user");
        Ok(records.first().map(VaultRecord::to_vault))
    }

    /// Number of cached vaults for `user_id`.
    ///
    /// # Errors
    ///
    /// Propagates [`LocalStore::count`] failures.
    pub async fn count_vaults(&self, user_id: &str) -> Result<u64, StoreError> {
        self.store
            .count::<VaultRecord>(Filter::eq("user_id", user_id.to_owned()))
            .await
    }

    /// Remove one vault and everything cached under it: items, vault keys,
    /// item keys, then the vault row itself.
    ///
    /// Each entity clears in its own transactional scope, in dependency
    /// order, so an interrupted cascade never leaves orphans pointing at a
    /// missing vault.
    ///
    /// # Errors
    ///
    /// Propagates the first failing [`LocalStore::batch_delete`].
    pub async fn remove_vault(&self, vault_id: &str) -> Result<(), StoreError> {
        let by_vault = || Filter::eq("vault_id", vault_id.to_owned());
        self.store.batch_delete::<ItemRecord>(by_vault()).await?;
        self.store
            .batch_delete::<VaultKeyRecord>(by_vault())
            .await?;
        self.store.batch_delete::<ItemKeyRecord>(by_vault()).await?;
        self.store.batch_delete::<VaultRecord>(by_vault()).await
    }

    /// Remove every vault of `user_id`, cascading like
    /// [`remove_vault`](Self::remove_vault).
    ///
    /// # Errors
    ///
    /// Propagates fetch or delete failures.
    pub async fn remove_all_vaults(&self, user_id: &str) -> Result<(), StoreError> {
        let vault_ids: Vec<Value> = self
            .get_vaults(user_id)
            .await?
            .into_iter()
            .map(|vault| Value::Text(vault.vault_id))
            .collect();

        let in_vaults = || Filter::all().and_in("vault_id", vault_ids.clone());
        self.store.batch_delete::<ItemRecord>(in_vaults()).await?;
        self.store
            .batch_delete::<VaultKeyRecord>(in_vaults())
            .await?;
        self.store
            .batch_delete::<ItemKeyRecord>(in_vaults())
            .await?;
        self.store
            .batch_delete::<VaultRecord>(Filter::eq("user_id", user_id.to_owned()))
            .await
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
