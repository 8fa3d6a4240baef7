//! `cadenas-store` — Encrypted local cache for CADENAS.
//!
//! Persists vaults, items, and key material in a `SQLCipher` container and
//! reconciles backend snapshots into it through batch upserts. Every
//! operation runs on its own short-lived keyed connection off the async
//! runtime's blocking pool.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod container;
pub mod error;
pub mod filter;
pub mod key;
pub mod record;
pub mod store;

pub mod vaults;

pub mod items;

pub mod keys;

pub use container::{ContextKind, StoreContainer};
pub use error::StoreError;
pub use filter::{Filter, Sort};
pub use items::{Item, ItemRecord, ItemState, LocalItemDatasource};
pub use key::StoreKey;
pub use keys::{ItemKey, ItemKeyRecord, KeyPair, LocalKeyDatasource, VaultKey, VaultKeyRecord};
pub use record::Record;
pub use store::LocalStore;
pub use vaults::{LocalVaultDatasource, Vault, VaultRecord};
