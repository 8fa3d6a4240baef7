//! Stored-record contract shared by every entity table.

use rusqlite::types::Value;
use rusqlite::Row;

/// A row type the generic store machinery can read, create, and write back.
///
/// Implementations own one entity table each. The column list fixes the
/// order for both [`read`](Record::read) and [`values`](Record::values);
/// the two must stay in lockstep with the migration that created the table.
///
/// `Default` (required by upsert) plays the part of an empty freshly
/// inserted row: the caller's hydrate closure is responsible for filling
/// every column, identity columns included.
pub trait Record: Sized + Send {
    /// Entity table name.
    const ENTITY: &'static str;

    /// Column names, in read/bind order.
    const COLUMNS: &'static [&'static str];

    /// Read one record from a row laid out as [`COLUMNS`](Record::COLUMNS).
    ///
    /// # Errors
    ///
    /// Returns the underlying `rusqlite` error when a column is missing or
    /// has an incompatible type.
    fn read(row: &Row<'_>) -> rusqlite::Result<Self>;

    /// Bind values, in [`COLUMNS`](Record::COLUMNS) order.
    fn values(&self) -> Vec<Value>;
}
