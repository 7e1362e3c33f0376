//! Row compatibility adapter.
//!
//! Every backend produces rows in its own shape; `CompatibleRow` normalizes
//! them so call sites can use positional access, key access, or dict-style
//! iteration interchangeably without knowing which driver ran the query.

use serde_json::Value;

/// A single result row with column order preserved.
///
/// Values are JSON-typed, matching what the backend decoders produce.
/// `row[0]` and `row["col"]` both work; out-of-range indexing panics like
/// any slice index, while [`CompatibleRow::get`] and
/// [`CompatibleRow::get_named`] are the fallible forms.
#[derive(Clone, PartialEq, Default)]
pub struct CompatibleRow {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl CompatibleRow {
    /// Build a row from an ordered column/value mapping.
    pub fn new(entries: Vec<(String, Value)>) -> Self {
        let (columns, values) = entries.into_iter().unzip();
        Self { columns, values }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at a positional index, or `None` when out of range.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value for a column name, or `None` when the column is absent.
    pub fn get_named(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Membership test for a positional index.
    pub fn contains_index(&self, index: usize) -> bool {
        index < self.values.len()
    }

    /// Membership test for a column name.
    pub fn contains_key(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Column names in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    /// Values in column order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    /// `(column, value)` pairs in column order.
    pub fn items(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Convert into a JSON object, preserving column order.
    pub fn into_map(self) -> serde_json::Map<String, Value> {
        self.columns.into_iter().zip(self.values).collect()
    }
}

impl std::ops::Index<usize> for CompatibleRow {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

impl std::ops::Index<&str> for CompatibleRow {
    type Output = Value;

    fn index(&self, column: &str) -> &Value {
        self.get_named(column)
            .unwrap_or_else(|| panic!("no such column: {column}"))
    }
}

/// Iteration yields values in column order, mirroring tuple-style access.
impl<'a> IntoIterator for &'a CompatibleRow {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

impl std::fmt::Debug for CompatibleRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (column, value) in self.items() {
            map.entry(&column, value);
        }
        map.finish()
    }
}
