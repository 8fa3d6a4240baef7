//! Key material cache — vault keys, item keys, and their pairing.
//!
//! Every vault carries one vault key and one item key per rotation. The
//! datasource stores the two families independently but only ever hands
//! them out paired; a rotation with one half missing marks the whole
//! vault's key cache as corrupted.

use rusqlite::types::Value;
use rusqlite::Row;

use crate::error::StoreError;
use crate::filter::{Filter, Sort};
use crate::record::Record;
use crate::store::LocalStore;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Encrypted vault key for one rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultKey {
    pub rotation: i64,
    /// Key material, encrypted with the user key.
    pub key_data: Vec<u8>,
    pub create_time: i64,
}

/// Encrypted item key for one rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemKey {
    pub rotation: i64,
    /// Key material, encrypted with the vault key of the same rotation.
    pub key_data: Vec<u8>,
    pub create_time: i64,
}

/// Both halves of one rotation's key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub rotation: i64,
    pub vault_key: VaultKey,
    pub item_key: ItemKey,
}

// ---------------------------------------------------------------------------
// Stored records
// ---------------------------------------------------------------------------

/// Row shape of the `vault_keys` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaultKeyRecord {
    pub vault_id: String,
    pub key_rotation: i64,
    pub key_data: Vec<u8>,
    pub create_time: i64,
}

impl VaultKeyRecord {
    fn hydrate_from(&mut self, vault_id: &str, key: &VaultKey) {
        self.vault_id = vault_id.to_owned();
        self.key_rotation = key.rotation;
        self.key_data = key.key_data.clone();
        self.create_time = key.create_time;
    }

    #[must_use]
    fn to_vault_key(&self) -> VaultKey {
        VaultKey {
            rotation: self.key_rotation,
            key_data: self.key_data.clone(),
            create_time: self.create_time,
        }
    }
}

impl Record for VaultKeyRecord {
    const ENTITY: &'static str = "vault_keys";
    const COLUMNS: &'static [&'static str] =
        &["vault_id", "key_rotation", "key_data", "create_time"];

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            vault_id: row.get(0)?,
            key_rotation: row.get(1)?,
            key_data: row.get(2)?,
            create_time: row.get(3)?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.vault_id.clone()),
            Value::Integer(self.key_rotation),
            Value::Blob(self.key_data.clone()),
            Value::Integer(self.create_time),
        ]
    }
}

/// Row shape of the `item_keys` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemKeyRecord {
    pub vault_id: String,
    pub key_rotation: i64,
    pub key_data: Vec<u8>,
    pub create_time: i64,
}

impl ItemKeyRecord {
    fn hydrate_from(&mut self, vault_id: &str, key: &ItemKey) {
        self.vault_id = vault_id.to_owned();
        self.key_rotation = key.rotation;
        self.key_data = key.key_data.clone();
        self.create_time = key.create_time;
    }

    #[must_use]
    fn to_item_key(&self) -> ItemKey {
        ItemKey {
            rotation: self.key_rotation,
            key_data: self.key_data.clone(),
            create_time: self.create_time,
        }
    }
}

impl Record for ItemKeyRecord {
    const ENTITY: &'static str = "item_keys";
    const COLUMNS: &'static [&'static str] =
        &["vault_id", "key_rotation", "key_data", "create_time"];

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            vault_id: row.get(0)?,
            key_rotation: row.get(1)?,
            key_data: row.get(2)?,
            create_time: row.get(3)?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.vault_id.clone()),
            Value::Integer(self.key_rotation),
            Value::Blob(self.key_data.clone()),
            Value::Integer(self.create_time),
        ]
    }
}

// ---------------------------------------------------------------------------
// Pairing
// ---------------------------------------------------------------------------

/// Zip the two key families of one vault into rotation pairs.
///
/// Both inputs must already be sorted by rotation. Count or rotation
/// mismatches are corruption: decryption would fail anyway, so it is
/// reported up front with both counts attached.
fn pair_up(
    vault_id: &str,
    vault_keys: Vec<VaultKeyRecord>,
    item_keys: Vec<ItemKeyRecord>,
) -> Result<Vec<KeyPair>, StoreError> {
    let corrupted = || StoreError::CorruptedVaultKeys {
        vault_id: vault_id.to_owned(),
        vault_key_count: vault_keys.len(),
        item_key_count: item_keys.len(),
    };

    if vault_keys.len() != item_keys.len() {
        return Err(corrupted());
    }
    for (vault_key, item_key) in vault_keys.iter().zip(item_keys.iter()) {
        if vault_key.key_rotation != item_key.key_rotation {
            return Err(corrupted());
        }
    }

    Ok(vault_keys
        .iter()
        .zip(item_keys.iter())
        .map(|(vault_key, item_key)| KeyPair {
            rotation: vault_key.key_rotation,
            vault_key: vault_key.to_vault_key(),
            item_key: item_key.to_item_key(),
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Datasource
// ---------------------------------------------------------------------------

/// Key cache operations for one store.
#[derive(Debug, Clone)]
pub struct LocalKeyDatasource {
    store: LocalStore,
}

impl LocalKeyDatasource {
    #[must_use]
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Reconcile vault keys into the cache for `vault_id`.
    ///
    /// Key identity within the vault scope is the rotation number.
    ///
    /// # Errors
    ///
    /// Propagates [`LocalStore::upsert`] failures.
    pub async fn upsert_vault_keys(
        &self,
        vault_id: &str,
        keys: Vec<VaultKey>,
    ) -> Result<(), StoreError> {
        let scope = Filter::eq("vault_id", vault_id.to_owned());
        let vid = vault_id.to_owned();
        self.store
            .upsert(
                keys,
                scope,
                |key: &VaultKey, record: &VaultKeyRecord| record.key_rotation == key.rotation,
                move |key, record| record.hydrate_from(&vid, key),
            )
            .await
    }

    /// Reconcile item keys into the cache for `vault_id`.
    ///
    /// # Errors
    ///
    /// Propagates [`LocalStore::upsert`] failures.
    pub async fn upsert_item_keys(
        &self,
        vault_id: &str,
        keys: Vec<ItemKey>,
    ) -> Result<(), StoreError> {
        let scope = Filter::eq("vault_id", vault_id.to_owned());
        let vid = vault_id.to_owned();
        self.store
            .upsert(
                keys,
                scope,
                |key: &ItemKey, record: &ItemKeyRecord| record.key_rotation == key.rotation,
                move |key, record| record.hydrate_from(&vid, key),
            )
            .await
    }

    /// Every rotation's key pair for `vault_id`, oldest rotation first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptedVaultKeys`] when the two families
    /// disagree on count or rotations; propagates fetch failures.
    pub async fn get_key_pairs(&self, vault_id: &str) -> Result<Vec<KeyPair>, StoreError> {
        let by_vault = Filter::eq("vault_id", vault_id.to_owned());
        let vault_keys: Vec<VaultKeyRecord> = self
            .store
            .fetch(by_vault.clone(), Some(Sort::asc("key_rotation")))
            .await?;
        let item_keys: Vec<ItemKeyRecord> = self
            .store
            .fetch(by_vault, Some(Sort::asc("key_rotation")))
            .await?;
        pair_up(vault_id, vault_keys, item_keys)
    }

    /// Drop all cached key material of `vault_id`, both families.
    ///
    /// # Errors
    ///
    /// Propagates [`LocalStore::batch_delete`] failures.
    pub async fn remove_keys(&self, vault_id: &str) -> Result<(), StoreError> {
        let by_vault = || Filter::eq("vault_id", vault_id.to_owned());
        self.store
            .batch_delete::<VaultKeyRecord>(by_vault())
            .await?;
        self.store.batch_delete::<ItemKeyRecord>(by_vault()).await
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn vault_key_record(rotation: i64) -> VaultKeyRecord {
        VaultKeyRecord {
            vault_id: "v1".into(),
            key_rotation: rotation,
            key_data: vec![rotation as u8; 4],
            create_time: 1_700_000_000 + rotation,
        }
    }

    fn item_key_record(rotation: i64) -> ItemKeyRecord {
        ItemKeyRecord {
            vault_id: "v1".into(),
            key_rotation: rotation,
            key_data: vec![rotation as u8; 4],
            create_time: 1_700_000_000 + rotation,
        }
    }

    #[test]
    fn pairs_matching_rotations() {
        let pairs = pair_up(
            "v1",
            vec![vault_key_record(1), vault_key_record(2)],
            vec![item_key_record(1), item_key_record(2)],
        )
        .unwrap();

        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].rotation, 1);
        assert_eq!(pairs[1].rotation, 2);
        assert_eq!(pairs[1].vault_key.rotation, pairs[1].item_key.rotation);
    }

    #[test]
    fn empty_families_pair_to_nothing() {
        assert!(pair_up("v1", vec![], vec![]).unwrap().is_empty());
    }

    #[test]
    fn count_mismatch_is_corruption() {
        let err = pair_up(
            "v1",
            vec![vault_key_record(1), vault_key_record(2)],
            vec![item_key_record(1)],
        )
        .unwrap_err();

        match err {
            StoreError::CorruptedVaultKeys {
                vault_id,
                vault_key_count,
                item_key_count,
            } => {
                assert_eq!(vault_id, "v1");
                assert_eq!(vault_key_count, 2);
                assert_eq!(item_key_count, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rotation_mismatch_is_corruption() {
        let err = pair_up(
            "v1",
            vec![vault_key_record(1)],
            vec![item_key_record(3)],
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::CorruptedVaultKeys { .. }));
    }
}
