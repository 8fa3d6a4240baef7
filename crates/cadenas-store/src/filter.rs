//! Typed predicates and sort descriptors for store operations.
//!
//! A [`Filter`] renders to a parameterized `WHERE` clause; the values ride
//! alongside as positional parameters so nothing caller-supplied is ever
//! spliced into SQL. Column names are crate-internal constants.

use rusqlite::types::Value;

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Conjunction of column predicates scoping a store operation.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Filter {
    /// Matches every row of the entity.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches rows where `column` equals `value`.
    #[must_use]
    pub fn eq(column: &'static str, value: impl Into<Value>) -> Self {
        Self::all().and_eq(column, value)
    }

    /// Adds an equality predicate (AND).
    #[must_use]
    pub fn and_eq(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.clauses.push(format!("{column} = ?"));
        self.params.push(value.into());
        self
    }

    /// Adds a set-membership predicate (AND).
    ///
    /// An empty set matches nothing — `IN ()` is not valid SQL, so the
    /// clause degrades to a constant false.
    #[must_use]
    pub fn and_in<I>(mut self, column: &'static str, values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let values: Vec<Value> = values.into_iter().collect();
        if values.is_empty() {
            self.clauses.push("1 = 0".to_owned());
            return self;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        self.clauses.push(format!("{column} IN ({placeholders})"));
        self.params.extend(values);
        self
    }

    /// Render the `WHERE` clause, empty string when unfiltered.
    pub(crate) fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            return String::new();
        }
        format!(" WHERE {}", self.clauses.join(" AND "))
    }

    /// Positional parameters, in clause order.
    pub(crate) fn params(&self) -> &[Value] {
        &self.params
    }
}

// ---------------------------------------------------------------------------
// Sort
// ---------------------------------------------------------------------------

/// Single-column sort descriptor for fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    column: &'static str,
    ascending: bool,
}

impl Sort {
    /// Ascending order on `column`.
    #[must_use]
    pub const fn asc(column: &'static str) -> Self {
        Self {
            column,
            ascending: true,
        }
    }

    /// Descending order on `column`.
    #[must_use]
    pub const fn desc(column: &'static str) -> Self {
        Self {
            column,
            ascending: false,
        }
    }

    /// Render the `ORDER BY` clause.
    pub(crate) fn order_sql(&self) -> String {
        let direction = if self.ascending { "ASC" } else { "DESC" };
        format!(" ORDER BY {} {direction}", self.column)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
