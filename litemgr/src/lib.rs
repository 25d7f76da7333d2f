///
/// litemgr - Embedded SQLite Access Layer
///
/// Manages one SQLite connection and everything that runs on it:
/// - open / verify / create / close with explicit creation dispositions
/// - an ordered prepared-statement cache with resettable index handles
/// - typed positional binding (integers, floats, text, blobs, null)
/// - busy-retry stepping with a per-row callback
/// - PRAGMA execution through integer substitution, never cached
/// - row change notification through the SQLite update hook
///
/// ```no_run
/// use litemgr::{Database, Disposition, OpenOptions, RowAction};
///
/// let mut db = Database::default();
/// db.open(
///     OpenOptions::new("app.db")
///         .disposition(Disposition::OpenAlways)
///         .verify_queries(["SELECT id, name FROM users"])
///         .create_queries(["CREATE TABLE users(id INTEGER PRIMARY KEY, name TEXT)"]),
/// )?;
/// db.execute("INSERT INTO users(name) VALUES (?)", &["ada".into()])?;
/// db.query("SELECT id, name FROM users", &[], |_, row| {
///     println!("{} {:?}", row.get_i64(0), row.get_text(1));
///     RowAction::Continue
/// })?;
/// # Ok::<(), litemgr::DbError>(())
/// ```
///

mod binder;
pub mod cache;
pub mod classify;
pub mod config;
pub mod database;
pub mod engine;
pub mod errors;
mod raw;
pub mod row;
pub mod value;

pub use cache::{IndexHandle, InternalStatement, StatementIndex, StatementInfo};
pub use classify::{StatementKind, classify};
pub use config::{BusyPolicy, ManagerConfig};
pub use database::{
    Access, ChangeAction, ChangeCallback, ChangeEvent, Database, Disposition, OpenOptions,
    OpenStatus,
};
pub use engine::{ExecOutcome, RowAction, RowCallback, Target};
pub use errors::{DbError, Status};
pub use row::{ColumnType, Row, Value};
pub use value::{BindArgument, BindMode, Float, Integer};
