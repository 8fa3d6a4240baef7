//! Item cache — state enum, records, domain type, and datasource.

use rusqlite::types::Value;
use rusqlite::Row;

use crate::error::StoreError;
use crate::filter::{Filter, Sort};
use crate::record::Record;
use crate::store::LocalStore;

// ---------------------------------------------------------------------------
// Item state
// ---------------------------------------------------------------------------

/// Lifecycle state of a cached item.
///
/// Stored as the backend's numeric code. Deleted items never reach the
/// cache; they are removed outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemState {
    /// Visible in the vault.
    Active,
    /// Moved to trash, pending restore or deletion.
    Trashed,
}

impl ItemState {
    /// Numeric code persisted in the `state` column.
    #[must_use]
    pub const fn as_db(self) -> i64 {
        match self {
            Self::Active => 1,
            Self::Trashed => 2,
        }
    }

    /// Parse the persisted code back into a state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] for codes outside the schema's
    /// CHECK constraint. A row like that means the container was written
    /// by something newer than this build.
    pub fn from_db(value: i64) -> Result<Self, StoreError> {
        match value {
            1 => Ok(Self::Active),
            2 => Ok(Self::Trashed),
            other => Err(StoreError::Database(format!("unknown item state: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain type
// ---------------------------------------------------------------------------

/// One cached item revision, as exchanged with callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Backend identifier, unique within the vault.
    pub item_id: String,
    /// Monotonic revision counter from the backend.
    pub revision: i64,
    /// Current lifecycle state.
    pub state: ItemState,
    /// Encrypted item content.
    pub content: Vec<u8>,
    /// Rotation of the item key that encrypted `content`.
    pub key_rotation: i64,
    /// Creation epoch seconds.
    pub create_time: i64,
    /// Last modification epoch seconds.
    pub modify_time: i64,
    /// Last autofill use, if any.
    pub last_used_time: Option<i64>,
    /// Pinned to the top of listings.
    pub pinned: bool,
}

// ---------------------------------------------------------------------------
// Stored record
// ---------------------------------------------------------------------------

/// Row shape of the `items` table.
///
/// `state` stays numeric here; [`to_item`](Self::to_item) is where an
/// out-of-range code turns into an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemRecord {
    pub vault_id: String,
    pub item_id: String,
    pub revision: i64,
    pub state: i64,
    pub content: Vec<u8>,
    pub key_rotation: i64,
    pub create_time: i64,
    pub modify_time: i64,
    pub last_used_time: Option<i64>,
    pub pinned: bool,
}

impl ItemRecord {
    /// Fill every column from a domain item scoped to `vault_id`.
    pub fn hydrate_from(&mut self, vault_id: &str, item: &Item) {
        self.vault_id = vault_id.to_owned();
        self.item_id = item.item_id.clone();
        self.revision = item.revision;
        self.state = item.state.as_db();
        self.content = item.content.clone();
        self.key_rotation = item.key_rotation;
        self.create_time = item.create_time;
        self.modify_time = item.modify_time;
        self.last_used_time = item.last_used_time;
        self.pinned = item.pinned;
    }

    /// Convert back to the domain type.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the stored state code is unknown.
    pub fn to_item(&self) -> Result<Item, StoreError> {
        Ok(Item {
            item_id: self.item_id.clone(),
            revision: self.revision,
            state: ItemState::from_db(self.state)?,
            content: self.content.clone(),
            key_rotation: self.key_rotation,
            create_time: self.create_time,
            modify_time: self.modify_time,
            last_used_time: self.last_used_time,
            pinned: self.pinned,
        })
    }
}

impl Record for ItemRecord {
    const ENTITY: &'static str = "items";
    const COLUMNS: &'static [&'static str] = &[
        "vault_id",
        "item_id",
        "revision",
        "state",
        "content",
        "key_rotation",
        "create_time",
        "modify_time",
        "last_used_time",
        "pinned",
    ];

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            vault_id: row.get(0)?,
            item_id: row.get(1)?,
            revision: row.get(2)?,
            state: row.get(3)?,
            content: row.get(4)?,
            key_rotation: row.get(5)?,
            create_time: row.get(6)?,
            modify_time: row.get(7)?,
            last_used_time: row.get(8)?,
            pinned: row.get(9)?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.vault_id.clone()),
            Value::Text(self.item_id.clone()),
            Value::Integer(self.revision),
            Value::Integer(self.state),
            Value::Blob(self.content.clone()),
            Value::Integer(self.key_rotation),
            Value::Integer(self.create_time),
            Value::Integer(self.modify_time),
            self.last_used_time.map_or(Value::Null, Value::Integer),
            Value::Integer(i64::from(self.pinned)),
        ]
    }
}

// ---------------------------------------------------------------------------
// Datasource
// ---------------------------------------------------------------------------

/// Item cache operations for one store.
#[derive(Debug, Clone)]
pub struct LocalItemDatasource {
    store: LocalStore,
}

impl LocalItemDatasource {
    #[must_use]
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Reconcile `items` into the cache for `vault_id`.
    ///
    /// Item identity within the vault scope is `item_id`; re-upserting an
    /// existing id overwrites the cached revision wholesale.
    ///
    /// # Errors
    ///
    /// Propagates [`LocalStore::upsert`] failures.
    pub async fn upsert_items(&self, vault_id: &str, items: Vec<Item>) -> Result<(), StoreError> {
        let scope = Filter::eq("vault_id", vault_id.to_owned());
        let vid = vault_id.to_owned();
        self.store
            .upsert(
                items,
                scope,
                |item: &Item, record: &ItemRecord| record.item_id == item.item_id,
                move |item, record| record.hydrate_from(&vid, item),
            )
            .await
    }

    /// Cached items of `vault_id`, most recently modified first.
    ///
    /// `state` narrows the listing to active or trashed items; `None`
    /// returns both.
    ///
    /// # Errors
    ///
    /// Propagates fetch failures and unknown state codes.
    pub async fn get_items(
        &self,
        vault_id: &str,
        state: Option<ItemState>,
    ) -> Result<Vec<Item>, StoreError> {
        let mut filter = Filter::eq("vault_id", vault_id.to_owned());
        if let Some(state) = state {
            filter = filter.and_eq("state", state.as_db());
        }
        let records: Vec<ItemRecord> = self
            .store
            .fetch(filter, Some(Sort::desc("modify_time")))
            .await?;
        records.iter().map(ItemRecord::to_item).collect()
    }

    /// One cached item, if present.
    ///
    /// # Errors
    ///
    /// Propagates fetch failures and unknown state codes.
    pub async fn get_item(
        &self,
        vault_id: &str,
        item_id: &str,
    ) -> Result<Option<Item>, StoreError> {
        let records: Vec<ItemRecord> = self
            .store
            .fetch(
                Filter::eq("vault_id", vault_id.to_owned()).and_eq("item_id", item_id.to_owned()),
                None,
            )
            .await?;
        debug_assert!(records.len() <= 1, "item_id is unique within a vault");
        records.first().map(ItemRecord::to_item).transpose()
    }

    /// Stamp the autofill timestamp on one item.
    ///
    /// Missing items are a no-op: the item may have been deleted between
    /// the autofill and the stamp, and that is not an error.
    ///
    /// # Errors
    ///
    /// Propagates fetch or upsert failures.
    pub async fn update_last_used_time(
        &self,
        vault_id: &str,
        item_id: &str,
        last_used_time: i64,
    ) -> Result<(), StoreError> {
        let Some(mut item) = self.get_item(vault_id, item_id).await? else {
            return Ok(());
        };
        item.last_used_time = Some(last_used_time);
        self.upsert_items(vault_id, vec![item]).await
    }

    /// Remove specific items from one vault.
    ///
    /// Ids not present in the cache are ignored.
    ///
    /// # Errors
    ///
    /// Propagates [`LocalStore::batch_delete`] failures.
    pub async fn delete_items(&self, vault_id: &str, item_ids: &[String]) -> Result<(), StoreError> {
        let filter = Filter::eq("vault_id", vault_id.to_owned()).and_in(
            "item_id",
            item_ids.iter().map(|id| Value::Text(id.clone())),
        );
        self.store.batch_delete::<ItemRecord>(filter).await
    }

    /// Remove every cached item of the given vaults.
    ///
    /// # Errors
    ///
    /// Propagates [`LocalStore::batch_delete`] failures.
    pub async fn remove_all_items(&self, vault_ids: &[String]) -> Result<(), StoreError> {
        let filter = Filter::all().and_in(
            "vault_id",
            vault_ids.iter().map(|id| Value::Text(id.clone())),
        );
        self.store.batch_delete::<ItemRecord>(filter).await
    }

    /// Number of cached items in `vault_id`, active and trashed alike.
    ///
    /// # Errors
    ///
    /// Propagates [`LocalStore::count`] failures.
    pub async fn count_items(&self, vault_id: &str) -> Result<u64, StoreError> {
        self.store
            .count::<ItemRecord>(Filter::eq("vault_id", vault_id.to_owned()))
            .await
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
