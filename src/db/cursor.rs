//! Cursor adapter over a drained statement result.
//!
//! The wrapper executes and drains the statement first, so fetching can
//! never fail afterwards: `fetchone` on an empty or consumed cursor is
//! `None`, `fetchall` is an empty vector. Callers rely on this
//! falsy-on-no-rows behavior; do not make fetch fallible.

use crate::db::row::CompatibleRow;

/// Result of one executed statement.
#[derive(Debug, Default)]
pub struct Cursor {
    rows: Vec<CompatibleRow>,
    position: usize,
    rowcount: u64,
    lastrowid: Option<i64>,
}

impl Cursor {
    pub(crate) fn new(rows: Vec<CompatibleRow>, rowcount: u64, lastrowid: Option<i64>) -> Self {
        Self {
            rows,
            position: 0,
            rowcount,
            lastrowid,
        }
    }

    /// Rows affected by a write, or the number of rows returned by a read.
    /// `0` when the driver reported nothing.
    pub fn rowcount(&self) -> u64 {
        self.rowcount
    }

    /// Last inserted row id, when the backend reports one (SQLite and MySQL
    /// inserts). `None` otherwise - never an error.
    pub fn lastrowid(&self) -> Option<i64> {
        self.lastrowid
    }

    /// Next unread row, or `None` once the cursor is consumed.
    pub fn fetchone(&mut self) -> Option<CompatibleRow> {
        let row = self.rows.get(self.position).cloned();
        if row.is_some() {
            self.position += 1;
        }
        row
    }

    /// All remaining unread rows. Empty once the cursor is consumed.
    pub fn fetchall(&mut self) -> Vec<CompatibleRow> {
        let rest = self.rows.split_off(self.position.min(self.rows.len()));
        self.position = self.rows.len();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: i64) -> CompatibleRow {
        CompatibleRow::new(vec![("id".to_string(), json!(id))])
    }

    #[test]
    fn test_fetchone_advances() {
        let mut cursor = Cursor::new(vec![row(1), row(2)], 2, None);
        assert_eq!(cursor.fetchone().unwrap()["id"], json!(1));
        assert_eq!(cursor.fetchone().unwrap()["id"], json!(2));
        assert!(cursor.fetchone().is_none());
        assert!(cursor.fetchone().is_none());
    }

    #[test]
    fn test_fetchall_drains_remainder() {
        let mut cursor = Cursor::new(vec![row(1), row(2), row(3)], 3, None);
        cursor.fetchone();
        let rest = cursor.fetchall();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0]["id"], json!(2));
        assert!(cursor.fetchall().is_empty());
        assert!(cursor.fetchone().is_none());
    }

    #[test]
    fn test_empty_cursor_never_fails() {
        let mut cursor = Cursor::new(vec![], 0, None);
        assert!(cursor.fetchone().is_none());
        assert!(cursor.fetchall().is_empty());
        assert_eq!(cursor.rowcount(), 0);
        assert_eq!(cursor.lastrowid(), None);
    }

    #[test]
    fn test_write_metadata() {
        let mut cursor = Cursor::new(vec![], 1, Some(42));
        assert_eq!(cursor.rowcount(), 1);
        assert_eq!(cursor.lastrowid(), Some(42));
        assert!(cursor.fetchall().is_empty());
    }
}
