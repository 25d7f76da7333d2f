///
/// # Connection Manager
///
/// `Database` owns at most one SQLite connection together with its
/// statement cache. Opening is driven by `OpenOptions`:
///
/// | Disposition    | Missing / invalid file        | Valid file          |
/// |----------------|-------------------------------|---------------------|
/// | `CreateAlways` | create                        | delete, then create |
/// | `OpenAlways`   | delete if present, then create| open                |
/// | `OpenExisting` | fail                          | open                |
///
/// "Valid" means the file opens and every verify query compiles. A freshly
/// created file is populated by running the create queries in order; each
/// must be a CREATE TABLE.
///
/// Opening the path that is already open (with a disposition other than
/// `CreateAlways`) and passing verification is a no-op that reports
/// `OpenStatus::AlreadyOpen`, leaving the cache and every index intact.
///
/// After a successful open the cache holds exactly the internal statements
/// (see `InternalStatement`). Any failed open leaves the manager closed.
///

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rusqlite::hooks::Action;
use rusqlite::{Connection, OpenFlags, ffi};
use tracing::{debug, trace, warn};

use crate::cache::{IndexHandle, InternalStatement, StatementCache, StatementIndex, StatementInfo};
use crate::classify::{StatementKind, classify};
use crate::config::ManagerConfig;
use crate::errors::{DbError, Status};
use crate::raw;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    ReadOnly,
    #[default]
    ReadWrite,
}

impl Access {
    fn flags(self) -> OpenFlags {
        let access = match self {
            Access::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
            Access::ReadWrite => OpenFlags::SQLITE_OPEN_READ_WRITE,
        };
        access | OpenFlags::SQLITE_OPEN_NO_MUTEX
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    CreateAlways,
    OpenAlways,
    #[default]
    OpenExisting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

impl ChangeAction {
    fn from_hook(action: Action) -> Option<Self> {
        match action {
            Action::SQLITE_INSERT => Some(ChangeAction::Insert),
            Action::SQLITE_UPDATE => Some(ChangeAction::Update),
            Action::SQLITE_DELETE => Some(ChangeAction::Delete),
            _ => None,
        }
    }
}

/// One row changed by INSERT, UPDATE or DELETE on a rowid table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent<'a> {
    pub action: ChangeAction,
    pub database: &'a str,
    pub table: &'a str,
    pub row_id: i64,
}

pub type ChangeCallback = Box<dyn FnMut(ChangeEvent<'_>) + Send>;

// rusqlite drops the hook when a close attempt fails, so the callback is
// shared to allow registering it again.
type SharedChangeCallback = Arc<Mutex<ChangeCallback>>;

pub struct OpenOptions {
    path: PathBuf,
    access: Access,
    disposition: Disposition,
    verify_queries: Vec<String>,
    create_queries: Option<Vec<String>>,
    on_change: Option<ChangeCallback>,
}

impl OpenOptions {
    /// Read-write, `OpenExisting`, no verify or create queries.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            access: Access::default(),
            disposition: Disposition::default(),
            verify_queries: Vec::new(),
            create_queries: None,
            on_change: None,
        }
    }

    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn disposition(mut self, disposition: Disposition) -> Self {
        self.disposition = disposition;
        self
    }

    /// SELECT statements that must compile against an existing file for it
    /// to count as valid.
    pub fn verify_queries<I, S>(mut self, queries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.verify_queries = queries.into_iter().map(Into::into).collect();
        self
    }

    /// CREATE TABLE statements run, in order, on a freshly created file.
    pub fn create_queries<I, S>(mut self, queries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.create_queries = Some(queries.into_iter().map(Into::into).collect());
        self
    }

    pub fn on_change<F>(mut self, callback: F) -> Self
    where
        F: FnMut(ChangeEvent<'_>) + Send + 'static,
    {
        self.on_change = Some(Box::new(callback));
        self
    }

    fn validate(&self) -> Result<(), DbError> {
        if self.disposition == Disposition::OpenExisting {
            return Ok(());
        }
        if self.access == Access::ReadOnly {
            return Err(DbError::InvalidOptions(
                "read-only access requires the OpenExisting disposition",
            ));
        }
        match &self.create_queries {
            None => Err(DbError::InvalidOptions(
                "create queries are required when the file may be created",
            )),
            Some(queries) if queries.is_empty() => Err(DbError::EmptyCreateList),
            Some(_) => Ok(()),
        }
    }
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("path", &self.path)
            .field("access", &self.access)
            .field("disposition", &self.disposition)
            .field("verify_queries", &self.verify_queries)
            .field("create_queries", &self.create_queries)
            .field("on_change", &self.on_change.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStatus {
    Opened,
    AlreadyOpen,
}

impl OpenStatus {
    pub fn status(&self) -> Status {
        match self {
            OpenStatus::Opened => Status::Success,
            OpenStatus::AlreadyOpen => Status::AlreadyOpen,
        }
    }
}

pub struct Database {
    // Declared before `conn`: cached statements must be finalized before
    // the connection is dropped.
    pub(crate) cache: StatementCache,
    conn: Option<Connection>,
    path: Option<PathBuf>,
    on_change: Option<SharedChangeCallback>,
    pub(crate) config: ManagerConfig,
}

impl Default for Database {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

impl Database {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            cache: StatementCache::new(),
            conn: None,
            path: None,
            on_change: None,
            config,
        }
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Rows modified by the most recent INSERT, UPDATE or DELETE.
    pub fn changes(&self) -> u64 {
        self.conn.as_ref().map_or(0, |conn| conn.changes() as u64)
    }

    pub fn last_insert_rowid(&self) -> i64 {
        self.conn.as_ref().map_or(0, Connection::last_insert_rowid)
    }

    pub(crate) fn raw_handle(&self) -> Result<*mut ffi::sqlite3, DbError> {
        self.conn
            .as_ref()
            .map(|conn| unsafe { conn.handle() })
            .ok_or(DbError::NotOpen)
    }

    pub fn open(&mut self, options: OpenOptions) -> Result<OpenStatus, DbError> {
        options.validate()?;

        if self.is_open() {
            if options.disposition != Disposition::CreateAlways
                && self.path.as_deref() == Some(options.path.as_path())
                && self.verify_schema(&options.verify_queries).is_ok()
            {
                debug!(path = %options.path.display(), "database already open");
                return Ok(OpenStatus::AlreadyOpen);
            }
            self.close(false, false)?;
        }

        let path = options.path.clone();
        match self.open_closed(options) {
            Ok(()) => {
                debug!(path = %path.display(), "database opened");
                Ok(OpenStatus::Opened)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "open failed");
                self.abandon();
                Err(err)
            }
        }
    }

    fn open_closed(&mut self, options: OpenOptions) -> Result<(), DbError> {
        let OpenOptions {
            path,
            access,
            disposition,
            verify_queries,
            create_queries,
            on_change,
        } = options;

        if disposition == Disposition::CreateAlways {
            remove_db_file(&path)?;
        }

        let flags = access.flags();
        let existing = self
            .connect(&path, flags)
            .and_then(|()| self.verify_schema(&verify_queries));

        if let Err(err) = existing {
            self.abandon();
            if disposition == Disposition::OpenExisting {
                return Err(err);
            }
            trace!(path = %path.display(), error = %err, "creating database");
            if disposition == Disposition::OpenAlways {
                remove_db_file(&path)?;
            }
            self.connect(&path, flags | OpenFlags::SQLITE_OPEN_CREATE)?;
            self.create_schema(create_queries.as_deref().unwrap_or_default())?;
        }

        self.seed_internal()?;
        self.on_change = on_change.map(|callback| Arc::new(Mutex::new(callback)));
        self.register_change_hook();
        self.path = Some(path);
        Ok(())
    }

    fn connect(&mut self, path: &Path, flags: OpenFlags) -> Result<(), DbError> {
        let conn = Connection::open_with_flags(path, flags)?;
        // Busy waits are governed by `BusyPolicy`, not SQLite's handler.
        conn.busy_timeout(Duration::ZERO)?;
        self.conn = Some(conn);
        Ok(())
    }

    fn create_schema(&mut self, queries: &[String]) -> Result<(), DbError> {
        if queries.is_empty() {
            return Err(DbError::EmptyCreateList);
        }
        for sql in queries {
            if classify(sql) != StatementKind::CreateTable {
                return Err(DbError::NotCreateTable { sql: sql.clone() });
            }
            self.execute_once(sql, &[])?;
        }
        Ok(())
    }

    /// Drops the connection without touching the file, keeping it only if
    /// SQLite refuses to close.
    fn abandon(&mut self) {
        self.cache.clear(false);
        self.on_change = None;
        self.path = None;
        if let Some(conn) = self.conn.take() {
            if let Err((conn, err)) = conn.close() {
                warn!(error = %err, "failed to close connection");
                self.conn = Some(conn);
            }
        }
    }

    fn seed_internal(&mut self) -> Result<(), DbError> {
        let db = self.raw_handle()?;
        let busy = self.config.busy_policy();
        self.cache
            .seed_internal(db, self.config.persistent_statements, &busy)
    }

    fn register_change_hook(&self) {
        let (Some(conn), Some(callback)) = (&self.conn, &self.on_change) else {
            return;
        };
        let callback = Arc::clone(callback);
        conn.update_hook(Some(
            move |action: Action, database: &str, table: &str, row_id: i64| {
                let Some(action) = ChangeAction::from_hook(action) else {
                    return;
                };
                // A callback that panicked earlier poisons the lock; keep
                // delivering to it.
                let mut callback = callback.lock().unwrap_or_else(PoisonError::into_inner);
                (*callback)(ChangeEvent {
                    action,
                    database,
                    table,
                    row_id,
                });
            },
        ));
    }

    /// Compiles every verify query against the open connection. All must be
    /// SELECT statements. An empty list passes.
    pub fn verify_schema<S: AsRef<str>>(&self, queries: &[S]) -> Result<(), DbError> {
        if queries.is_empty() {
            return Ok(());
        }
        let db = self.raw_handle()?;
        let busy = self.config.busy_policy();

        for sql in queries {
            let sql = sql.as_ref();
            if classify(sql) != StatementKind::Select {
                return Err(DbError::SchemaVerification {
                    sql: sql.to_string(),
                    reason: "not a SELECT statement".to_string(),
                });
            }
            raw::compiles(db, sql, &busy).map_err(|err| DbError::SchemaVerification {
                sql: sql.to_string(),
                reason: err.to_string(),
            })?;
        }
        Ok(())
    }

    /// Closes the connection. A no-op when nothing is open.
    ///
    /// `reset_indices` resets every `IndexHandle` still pointing at its own
    /// slot. If SQLite refuses to close (a statement is still running), the
    /// connection stays open with the internal statements re-seeded.
    pub fn close(&mut self, delete_file: bool, reset_indices: bool) -> Result<(), DbError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        self.cache.clear(reset_indices);

        if let Err((conn, err)) = conn.close() {
            warn!(error = %err, "close failed, keeping connection");
            self.conn = Some(conn);
            self.register_change_hook();
            if let Err(seed_err) = self.seed_internal() {
                warn!(error = %seed_err, "failed to re-seed internal statements");
            }
            return Err(err.into());
        }

        self.on_change = None;
        let path = self.path.take();
        if let Some(path) = &path {
            debug!(path = %path.display(), delete_file, "database closed");
            if delete_file {
                remove_db_file(path)?;
            }
        }
        Ok(())
    }

    /// Compiles `sql` into the next cache slot.
    pub fn prepare(&mut self, sql: &str) -> Result<StatementIndex, DbError> {
        self.insert(sql, false).map(|(index, _)| index)
    }

    /// Like `prepare`, but returns a handle that is reset when the cache is
    /// cleared with `reset_indices`.
    pub fn prepare_tracked(&mut self, sql: &str) -> Result<IndexHandle, DbError> {
        let (index, handle) = self.insert(sql, true)?;
        handle.ok_or_else(|| DbError::NotFound(index.to_string()))
    }

    fn insert(
        &mut self,
        sql: &str,
        track: bool,
    ) -> Result<(StatementIndex, Option<IndexHandle>), DbError> {
        let db = self.raw_handle()?;
        let busy = self.config.busy_policy();
        self.cache
            .insert(db, sql, self.config.persistent_statements, &busy, track)
    }

    pub fn find_prepared(&self, sql: &str) -> Result<StatementIndex, DbError> {
        self.cache
            .find(sql)
            .ok_or_else(|| DbError::NotFound(sql.trim().to_string()))
    }

    pub fn prepared_info(&self, index: StatementIndex) -> Result<&StatementInfo, DbError> {
        self.cache
            .info(index)
            .ok_or_else(|| DbError::NotFound(index.to_string()))
    }

    pub fn prepared_count(&self) -> usize {
        self.cache.len()
    }

    /// Drops every cached statement and re-seeds the internal set, so user
    /// statements prepared afterwards start right after it.
    pub fn clear_prepared(&mut self, reset_indices: bool) -> Result<(), DbError> {
        self.cache.clear(reset_indices);
        if self.is_open() {
            self.seed_internal()?;
        }
        Ok(())
    }

    pub fn begin(&mut self) -> Result<(), DbError> {
        self.execute(InternalStatement::Begin, &[]).map(drop)
    }

    /// Takes the write lock up front.
    pub fn begin_immediate(&mut self) -> Result<(), DbError> {
        self.execute(InternalStatement::BeginImmediate, &[]).map(drop)
    }

    pub fn commit(&mut self) -> Result<(), DbError> {
        self.execute(InternalStatement::Commit, &[]).map(drop)
    }

    pub fn rollback(&mut self) -> Result<(), DbError> {
        self.execute(InternalStatement::Rollback, &[]).map(drop)
    }

    pub fn vacuum(&mut self) -> Result<(), DbError> {
        self.execute(InternalStatement::Vacuum, &[]).map(drop)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(err) = self.close(false, false) {
            warn!(error = %err, "failed to close database on drop");
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .field("prepared", &self.cache.len())
            .field("config", &self.config)
            .finish()
    }
}

fn remove_db_file(path: &Path) -> Result<(), DbError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(DbError::RemoveFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}
