///
/// Thin owner of a compiled `sqlite3_stmt`.
///
/// Everything that touches the statement C API lives here: compile (with
/// busy retry), bind, step (with busy retry), reset, column access and
/// finalize-on-drop. Callers above this module never see raw pointers.
///
/// A `RawStatement` must be dropped before the connection it was compiled
/// on is closed. `Database` guarantees this by clearing the cache before
/// closing.
///

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::ptr;
use std::time::Duration;

use rusqlite::ffi;

use crate::config::BusyPolicy;
use crate::errors::DbError;

const SQLITE_OK: c_int = ffi::SQLITE_OK as c_int;
const SQLITE_ROW: c_int = ffi::SQLITE_ROW as c_int;
const SQLITE_DONE: c_int = ffi::SQLITE_DONE as c_int;
const SQLITE_BUSY: c_int = ffi::SQLITE_BUSY as c_int;

/// Result of one logical step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Row,
    Done,
    /// Still busy after the retry budget was spent.
    Busy(Duration),
    Error(c_int),
}

#[derive(Debug)]
pub struct RawStatement {
    stmt: *mut ffi::sqlite3_stmt,
}

impl RawStatement {
    /// Compiles the first statement in `sql`. Empty input (only whitespace
    /// or comments) compiles to no statement and is reported as an error.
    pub fn prepare(
        db: *mut ffi::sqlite3,
        sql: &str,
        persistent: bool,
        busy: &BusyPolicy,
    ) -> Result<Self, DbError> {
        let c_sql = CString::new(sql).map_err(|_| DbError::InteriorNul)?;
        let flags = if persistent {
            ffi::SQLITE_PREPARE_PERSISTENT as u32
        } else {
            0
        };

        let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
        let (rc, waited) = busy.retry(|| unsafe {
            ffi::sqlite3_prepare_v3(
                db,
                c_sql.as_ptr(),
                -1,
                flags as _,
                &mut stmt,
                ptr::null_mut(),
            )
        });

        if rc != SQLITE_OK {
            if !stmt.is_null() {
                unsafe {
                    ffi::sqlite3_finalize(stmt);
                }
            }
            if rc & 0xff == SQLITE_BUSY {
                return Err(DbError::Busy { waited });
            }
            return Err(connection_error(db, rc));
        }

        if stmt.is_null() {
            return Err(DbError::Sqlite {
                code: ffi::SQLITE_MISUSE as i32,
                message: "no statement in SQL text".to_string(),
            });
        }

        Ok(Self { stmt })
    }

    pub fn sql(&self) -> String {
        unsafe {
            let text = ffi::sqlite3_sql(self.stmt);
            if text.is_null() {
                return String::new();
            }
            CStr::from_ptr(text).to_string_lossy().into_owned()
        }
    }

    /// SQL text with current bindings substituted, for diagnostics.
    pub fn expanded_sql(&self) -> Option<String> {
        unsafe {
            let text = ffi::sqlite3_expanded_sql(self.stmt);
            if text.is_null() {
                return None;
            }
            let owned = CStr::from_ptr(text).to_string_lossy().into_owned();
            ffi::sqlite3_free(text as *mut c_void);
            Some(owned)
        }
    }

    pub fn column_count(&self) -> usize {
        unsafe { ffi::sqlite3_column_count(self.stmt) as usize }
    }

    pub fn parameter_count(&self) -> usize {
        unsafe { ffi::sqlite3_bind_parameter_count(self.stmt) as usize }
    }

    pub fn bind_i64(&self, index: usize, value: i64) -> c_int {
        unsafe { ffi::sqlite3_bind_int64(self.stmt, index as c_int, value) }
    }

    pub fn bind_f64(&self, index: usize, value: f64) -> c_int {
        unsafe { ffi::sqlite3_bind_double(self.stmt, index as c_int, value) }
    }

    pub fn bind_null(&self, index: usize) -> c_int {
        unsafe { ffi::sqlite3_bind_null(self.stmt, index as c_int) }
    }

    /// Binds text. With `copy == false` SQLite keeps a pointer to `value`;
    /// the caller must clear bindings before `value` goes out of scope.
    pub fn bind_text(&self, index: usize, value: &str, copy: bool) -> c_int {
        unsafe {
            ffi::sqlite3_bind_text(
                self.stmt,
                index as c_int,
                value.as_ptr() as *const c_char,
                value.len() as c_int,
                destructor(copy),
            )
        }
    }

    /// Binds a blob. Same lifetime contract as `bind_text`.
    pub fn bind_blob(&self, index: usize, value: &[u8], copy: bool) -> c_int {
        unsafe {
            ffi::sqlite3_bind_blob(
                self.stmt,
                index as c_int,
                value.as_ptr() as *const c_void,
                value.len() as c_int,
                destructor(copy),
            )
        }
    }

    pub fn clear_bindings(&self) {
        unsafe {
            ffi::sqlite3_clear_bindings(self.stmt);
        }
    }

    pub fn reset(&self) {
        unsafe {
            ffi::sqlite3_reset(self.stmt);
        }
    }

    pub fn step(&self, busy: &BusyPolicy) -> StepStatus {
        let (rc, waited) = busy.retry(|| unsafe { ffi::sqlite3_step(self.stmt) });
        match rc & 0xff {
            SQLITE_ROW => StepStatus::Row,
            SQLITE_DONE => StepStatus::Done,
            SQLITE_BUSY => StepStatus::Busy(waited),
            _ => StepStatus::Error(rc),
        }
    }

    /// Builds an error from the connection's last error message.
    pub fn error(&self, rc: c_int) -> DbError {
        let db = unsafe { ffi::sqlite3_db_handle(self.stmt) };
        connection_error(db, rc)
    }

    pub fn column_type(&self, column: usize) -> c_int {
        unsafe { ffi::sqlite3_column_type(self.stmt, column as c_int) }
    }

    pub fn column_name(&self, column: usize) -> Option<&str> {
        unsafe {
            let name = ffi::sqlite3_column_name(self.stmt, column as c_int);
            if name.is_null() {
                return None;
            }
            CStr::from_ptr(name).to_str().ok()
        }
    }

    pub fn column_i64(&self, column: usize) -> i64 {
        unsafe { ffi::sqlite3_column_int64(self.stmt, column as c_int) }
    }

    pub fn column_f64(&self, column: usize) -> f64 {
        unsafe { ffi::sqlite3_column_double(self.stmt, column as c_int) }
    }

    /// Text bytes of the current row. Valid until the next step or reset,
    /// which the borrow of `self` enforces for callers holding a `Row`.
    pub fn column_text(&self, column: usize) -> Option<&[u8]> {
        unsafe {
            let text = ffi::sqlite3_column_text(self.stmt, column as c_int);
            if text.is_null() {
                return None;
            }
            let len = ffi::sqlite3_column_bytes(self.stmt, column as c_int) as usize;
            Some(std::slice::from_raw_parts(text as *const u8, len))
        }
    }

    pub fn column_blob(&self, column: usize) -> &[u8] {
        unsafe {
            let blob = ffi::sqlite3_column_blob(self.stmt, column as c_int);
            let len = ffi::sqlite3_column_bytes(self.stmt, column as c_int) as usize;
            if blob.is_null() || len == 0 {
                return &[];
            }
            std::slice::from_raw_parts(blob as *const u8, len)
        }
    }
}

impl Drop for RawStatement {
    fn drop(&mut self) {
        if !self.stmt.is_null() {
            unsafe {
                ffi::sqlite3_finalize(self.stmt);
            }
            self.stmt = ptr::null_mut();
        }
    }
}

fn destructor(copy: bool) -> ffi::sqlite3_destructor_type {
    if copy {
        ffi::SQLITE_TRANSIENT()
    } else {
        ffi::SQLITE_STATIC()
    }
}

pub(crate) fn connection_error(db: *mut ffi::sqlite3, rc: c_int) -> DbError {
    let message = if db.is_null() {
        unsafe { CStr::from_ptr(ffi::sqlite3_errstr(rc)) }
            .to_string_lossy()
            .into_owned()
    } else {
        unsafe { CStr::from_ptr(ffi::sqlite3_errmsg(db)) }
            .to_string_lossy()
            .into_owned()
    };
    DbError::Sqlite { code: rc, message }
}

/// Compiles `sql` and throws the handle away. Compilation failure is the
/// signal; nothing is executed.
pub fn compiles(db: *mut ffi::sqlite3, sql: &str, busy: &BusyPolicy) -> Result<(), DbError> {
    RawStatement::prepare(db, sql, false, busy).map(drop)
}
