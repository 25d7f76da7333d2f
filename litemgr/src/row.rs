///
/// Read-only view of the current result row.
///
/// A `Row` is handed to the row callback for the duration of one call and
/// reads straight from the statement handle; nothing is materialized unless
/// the caller asks for an owned `Value`.
///

use rusqlite::ffi;

use crate::cache::StatementInfo;
use crate::raw::RawStatement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Blob,
    Null,
}

impl ColumnType {
    fn from_code(code: i32) -> Self {
        match code {
            c if c == ffi::SQLITE_INTEGER as i32 => ColumnType::Integer,
            c if c == ffi::SQLITE_FLOAT as i32 => ColumnType::Float,
            c if c == ffi::SQLITE_TEXT as i32 => ColumnType::Text,
            c if c == ffi::SQLITE_BLOB as i32 => ColumnType::Blob,
            _ => ColumnType::Null,
        }
    }
}

/// Owned copy of a column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Null,
}

pub struct Row<'s> {
    stmt: &'s RawStatement,
    info: &'s StatementInfo,
    index: u64,
}

impl<'s> Row<'s> {
    pub(crate) fn new(stmt: &'s RawStatement, info: &'s StatementInfo, index: u64) -> Self {
        Self { stmt, info, index }
    }

    /// Zero-based position of this row in the result set.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn statement(&self) -> &StatementInfo {
        self.info
    }

    /// SQL with the bound values substituted in.
    pub fn expanded_sql(&self) -> Option<String> {
        self.stmt.expanded_sql()
    }

    pub fn column_count(&self) -> usize {
        self.stmt.column_count()
    }

    pub fn column_name(&self, column: usize) -> Option<&str> {
        if column >= self.column_count() {
            return None;
        }
        self.stmt.column_name(column)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        (0..self.column_count()).find(|&i| {
            self.stmt
                .column_name(i)
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
    }

    pub fn column_type(&self, column: usize) -> ColumnType {
        if column >= self.column_count() {
            return ColumnType::Null;
        }
        ColumnType::from_code(self.stmt.column_type(column))
    }

    pub fn is_null(&self, column: usize) -> bool {
        self.column_type(column) == ColumnType::Null
    }

    pub fn get_i64(&self, column: usize) -> i64 {
        if column >= self.column_count() {
            return 0;
        }
        self.stmt.column_i64(column)
    }

    /// Truncates like `sqlite3_column_int`.
    pub fn get_i32(&self, column: usize) -> i32 {
        self.get_i64(column) as i32
    }

    pub fn get_f64(&self, column: usize) -> f64 {
        if column >= self.column_count() {
            return 0.0;
        }
        self.stmt.column_f64(column)
    }

    /// `None` for NULL, out-of-range columns, and text that is not UTF-8.
    pub fn get_text(&self, column: usize) -> Option<&str> {
        if self.is_null(column) {
            return None;
        }
        let bytes = self.stmt.column_text(column)?;
        std::str::from_utf8(bytes).ok()
    }

    pub fn get_blob(&self, column: usize) -> Option<&[u8]> {
        if self.is_null(column) {
            return None;
        }
        Some(self.stmt.column_blob(column))
    }

    pub fn value(&self, column: usize) -> Value {
        match self.column_type(column) {
            ColumnType::Integer => Value::Integer(self.stmt.column_i64(column)),
            ColumnType::Float => Value::Float(self.stmt.column_f64(column)),
            ColumnType::Text => {
                let bytes = self.stmt.column_text(column).unwrap_or_default();
                Value::Text(String::from_utf8_lossy(bytes).into_owned())
            }
            ColumnType::Blob => Value::Blob(self.stmt.column_blob(column).to_vec()),
            ColumnType::Null => Value::Null,
        }
    }

    pub fn values(&self) -> Vec<Value> {
        (0..self.column_count()).map(|i| self.value(i)).collect()
    }
}

impl std::fmt::Debug for Row<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Row")
            .field("sql", &self.info.sql)
            .field("index", &self.index)
            .field("values", &self.values())
            .finish()
    }
}
