//! Generic batch datasource over the encrypted container.
//!
//! Four operations cover every concrete datasource: `upsert`,
//! `batch_delete`, `fetch`, and `count`. Each call mints its own private
//! task context and moves the transactional work onto the blocking thread
//! pool; the calling task suspends until the work commits or fails. There
//! is no fire-and-forget path and no mid-transaction cancellation.
//!
//! Upsert reconciles a batch of incoming items against the rows matching a
//! scope filter: an item whose identity predicate matches an existing row
//! hydrates that row in place, any other item hydrates a fresh row. The
//! whole batch commits in one IMMEDIATE transaction — all rows land or
//! none do. Within a batch, later items win over earlier ones that share
//! an identity; across racing calls, the later committer wins. Callers
//! needing a specific order serialize their calls themselves.

use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use tokio::task;

use crate::container::{ContextKind, StoreContainer};
use crate::error::StoreError;
use crate::filter::{Filter, Sort};
use crate::key::StoreKey;
use crate::record::Record;

// ---------------------------------------------------------------------------
// LocalStore
// ---------------------------------------------------------------------------

/// Cheaply cloneable handle to the container, shared by every concrete
/// datasource.
#[derive(Debug, Clone)]
pub struct LocalStore {
    container: Arc<StoreContainer>,
}

impl LocalStore {
    /// Wrap an already opened container.
    #[must_use]
    pub fn new(container: Arc<StoreContainer>) -> Self {
        Self { container }
    }

    /// Open (or create) the container at `path` and wrap it.
    ///
    /// Blocking: runs the key ceremony and migrations on the calling
    /// thread. Do this once at startup, before serving operations.
    ///
    /// # Errors
    ///
    /// Propagates [`StoreContainer::open`] failures.
    pub fn open(path: &std::path::Path, key: StoreKey) -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(StoreContainer::open(path, key)?)))
    }

    /// The shared container.
    #[must_use]
    pub fn container(&self) -> &Arc<StoreContainer> {
        &self.container
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Reconcile `items` into the rows matching `scope`, atomically.
    ///
    /// For each item, the first stored row satisfying `is_match` is
    /// hydrated in place; items matching no row hydrate a fresh
    /// `R::default()`. Only touched rows are written back. An empty batch
    /// succeeds without touching the store.
    ///
    /// # Errors
    ///
    /// [`StoreError::BatchInsert`] naming the entity if any row write
    /// fails or cannot confirm success; the transaction rolls back and no
    /// partial rows remain. [`StoreError::ContextAborted`] if the worker
    /// never delivers a result.
    pub async fn upsert<T, R, M, H>(
        &self,
        items: Vec<T>,
        scope: Filter,
        is_match: M,
        hydrate: H,
    ) -> Result<(), StoreError>
    where
        T: Send + 'static,
        R: Record + Default + 'static,
        M: Fn(&T, &R) -> bool + Send + 'static,
        H: Fn(&T, &mut R) + Send + 'static,
    {
        if items.is_empty() {
            return Ok(());
        }
        let container = Arc::clone(&self.container);
        run_context::<R, _, _>(move || {
            let mut ctx = container.context(ContextKind::Insert)?;
            let context = ctx.kind().as_str();
            let tx = ctx.transaction()?;

            let mut rows = load_matching::<R>(&tx, &scope)?;
            for item in &items {
                if let Some(row) = rows.iter_mut().find(|row| is_match(item, &row.record)) {
                    hydrate(item, &mut row.record);
                    row.dirty = true;
                } else {
                    let mut record = R::default();
                    hydrate(item, &mut record);
                    rows.push(StoredRow {
                        rowid: None,
                        record,
                        dirty: true,
                    });
                }
            }

            let mut inserted = 0_usize;
            let mut updated = 0_usize;
            for row in rows.iter().filter(|row| row.dirty) {
                match row.rowid {
                    Some(rowid) => {
                        update_row(&tx, rowid, &row.record)?;
                        updated = updated.saturating_add(1);
                    }
                    None => {
                        insert_row(&tx, &row.record)?;
                        inserted = inserted.saturating_add(1);
                    }
                }
            }

            tx.commit().map_err(|e| StoreError::BatchInsert {
                entity: R::ENTITY,
                detail: format!("commit failed: {e}"),
            })?;
            tracing::debug!(
                entity = R::ENTITY,
                context,
                inserted,
                updated,
                "batch upsert committed"
            );
            Ok(())
        })
        .await
    }

    /// Delete every row matching `filter`.
    ///
    /// Zero matching rows is a success.
    ///
    /// # Errors
    ///
    /// [`StoreError::BatchDelete`] naming the entity if the delete cannot
    /// execute; [`StoreError::ContextAborted`] if the worker never
    /// delivers a result.
    pub async fn batch_delete<R>(&self, filter: Filter) -> Result<(), StoreError>
    where
        R: Record + 'static,
    {
        let container = Arc::clone(&self.container);
        run_context::<R, _, _>(move || {
            let mut ctx = container.context(ContextKind::Delete)?;
            let context = ctx.kind().as_str();
            let tx = ctx.transaction()?;
            let sql = format!("DELETE FROM {}{}", R::ENTITY, filter.where_sql());
            let removed = tx
                .execute(&sql, params_from_iter(filter.params().iter()))
                .map_err(|e| StoreError::BatchDelete {
                    entity: R::ENTITY,
                    detail: e.to_string(),
                })?;
            tx.commit().map_err(|e| StoreError::BatchDelete {
                entity: R::ENTITY,
                detail: format!("commit failed: {e}"),
            })?;
            tracing::debug!(
                entity = R::ENTITY,
                context,
                removed,
                "batch delete committed"
            );
            Ok(())
        })
        .await
    }

    /// Fetch every record matching `filter`, optionally sorted.
    ///
    /// Read-only; WAL gives the fetch context a stable snapshot that
    /// concurrent writers cannot block.
    ///
    /// # Errors
    ///
    /// [`StoreError::Database`] on query failure;
    /// [`StoreError::ContextAborted`] if the worker never delivers a
    /// result.
    pub async fn fetch<R>(&self, filter: Filter, sort: Option<Sort>) -> Result<Vec<R>, StoreError>
    where
        R: Record + 'static,
    {
        let container = Arc::clone(&self.container);
        run_context::<R, _, _>(move || {
            let ctx = container.context(ContextKind::Fetch)?;
            let order = sort.map_or_else(String::new, |s| s.order_sql());
            let sql = format!(
                "SELECT {} FROM {}{}{order}",
                R::COLUMNS.join(", "),
                R::ENTITY,
                filter.where_sql(),
            );
            let mut stmt = ctx.connection().prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(filter.params().iter()), |row| {
                R::read(row)
            })?;
            rows.collect::<Result<Vec<R>, _>>().map_err(StoreError::from)
        })
        .await
    }

    /// Count the rows matching `filter`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Database`] on query failure;
    /// [`StoreError::ContextAborted`] if the worker never delivers a
    /// result.
    pub async fn count<R>(&self, filter: Filter) -> Result<u64, StoreError>
    where
        R: Record + 'static,
    {
        let container = Arc::clone(&self.container);
        run_context::<R, _, _>(move || {
            let ctx = container.context(ContextKind::Fetch)?;
            let sql = format!("SELECT count(*) FROM {}{}", R::ENTITY, filter.where_sql());
            let n: i64 = ctx.connection().query_row(
                &sql,
                params_from_iter(filter.params().iter()),
                |row| row.get(0),
            )?;
            Ok(u64::try_from(n).unwrap_or_default())
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Blocking bridge
// ---------------------------------------------------------------------------

/// Run `work` on the blocking pool and await its result.
///
/// The caller suspends until the closure returns; a worker that never
/// returns (panic, runtime teardown) surfaces as `ContextAborted` for the
/// entity instead of vanishing.
async fn run_context<R, T, F>(work: F) -> Result<T, StoreError>
where
    R: Record,
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::ContextAborted {
            entity: R::ENTITY,
            detail: e.to_string(),
        })?
}

// ---------------------------------------------------------------------------
// Row plumbing
// ---------------------------------------------------------------------------

/// One stored row staged during an upsert.
struct StoredRow<R> {
    /// `None` for rows created by this batch.
    rowid: Option<i64>,
    record: R,
    dirty: bool,
}

/// Load the rows matching `scope`, with their rowids, for in-place
/// hydration. Part of the upsert batch, so failures carry the entity name.
fn load_matching<R: Record>(
    conn: &Connection,
    scope: &Filter,
) -> Result<Vec<StoredRow<R>>, StoreError> {
    let batch_err = |e: rusqlite::Error| StoreError::BatchInsert {
        entity: R::ENTITY,
        detail: e.to_string(),
    };
    let sql = format!(
        "SELECT {}, rowid FROM {}{}",
        R::COLUMNS.join(", "),
        R::ENTITY,
        scope.where_sql(),
    );
    let mut stmt = conn.prepare(&sql).map_err(batch_err)?;
    let rows = stmt
        .query_map(params_from_iter(scope.params().iter()), |row| {
            let record = R::read(row)?;
            let rowid: i64 = row.get(R::COLUMNS.len())?;
            Ok(StoredRow {
                rowid: Some(rowid),
                record,
                dirty: false,
            })
        })
        .map_err(batch_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(batch_err)
}

/// Insert one freshly hydrated row.
fn insert_row<R: Record>(conn: &Connection, record: &R) -> Result<(), StoreError> {
    let placeholders = vec!["?"; R::COLUMNS.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        R::ENTITY,
        R::COLUMNS.join(", "),
    );
    let affected = conn
        .execute(&sql, params_from_iter(record.values()))
        .map_err(|e| StoreError::BatchInsert {
            entity: R::ENTITY,
            detail: e.to_string(),
        })?;
    confirm_single_row::<R>(affected)
}

/// Write a hydrated row back over its stored original.
fn update_row<R: Record>(conn: &Connection, rowid: i64, record: &R) -> Result<(), StoreError> {
    let assignments = R::COLUMNS
        .iter()
        .map(|column| format!("{column} = ?"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("UPDATE {} SET {assignments} WHERE rowid = ?", R::ENTITY);
    let mut values = record.values();
    values.push(Value::Integer(rowid));
    let affected = conn
        .execute(&sql, params_from_iter(values))
        .map_err(|e| StoreError::BatchInsert {
            entity: R::ENTITY,
            detail: e.to_string(),
        })?;
    confirm_single_row::<R>(affected)
}

/// A row write that does not affect exactly one row is an unconfirmed
/// result and fails the batch.
fn confirm_single_row<R: Record>(affected: usize) -> Result<(), StoreError> {
    if affected == 1 {
        return Ok(());
    }
    Err(StoreError::BatchInsert {
        entity: R::ENTITY,
        detail: format!("row write affected {affected} rows, expected 1"),
    })
}
