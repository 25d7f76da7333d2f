///
/// # Prepared Statement Cache
///
/// An ordered list of compiled statements. Each slot gets the next index at
/// insertion time and keeps it until the cache is cleared; indices are never
/// reused within one generation.
///
/// ## Index Handles
///
/// Callers that want to hold on to an index across a possible cache reset
/// ask for an `IndexHandle` instead of a bare `StatementIndex`. The handle is
/// a shared cell: the caller can read or overwrite it, and
/// `clear(reset_indices = true)` puts every handle that still points at its
/// own slot back to "no index". A handle the caller already re-pointed is
/// left alone.
///
/// ## Snapshots
///
/// Slots hold their statement behind an `Rc`. Execution clones the `Rc` out
/// of the cache before stepping, so a row callback may prepare new
/// statements (growing the slot vector) or even clear the cache without
/// invalidating the statement that is still running.
///
/// ## Internal Statements
///
/// Transaction control and VACUUM are always present at fixed indices. They
/// are re-materialized from `InternalStatement::ALL` whenever the cache is
/// rebuilt.
///

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use rusqlite::ffi;
use tracing::{debug, trace};

use crate::classify::{StatementKind, classify};
use crate::config::BusyPolicy;
use crate::errors::DbError;
use crate::raw::RawStatement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementIndex(pub usize);

impl fmt::Display for StatementIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Snapshot of what a compiled statement looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementInfo {
    pub sql: String,
    pub kind: StatementKind,
    pub column_count: usize,
    pub parameter_count: usize,
}

impl StatementInfo {
    /// PRAGMA text is never compiled ahead of time, so its shape comes from
    /// the text itself.
    pub(crate) fn pragma(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            kind: StatementKind::Pragma,
            column_count: 0,
            parameter_count: sql.matches('?').count(),
        }
    }
}

#[derive(Debug)]
pub struct CompiledStatement {
    pub(crate) info: StatementInfo,
    pub(crate) raw: RawStatement,
    /// Set while an execution is stepping `raw`.
    pub(crate) in_use: Cell<bool>,
}

impl CompiledStatement {
    pub(crate) fn compile(
        db: *mut ffi::sqlite3,
        sql: &str,
        persistent: bool,
        busy: &BusyPolicy,
    ) -> Result<Self, DbError> {
        let raw = RawStatement::prepare(db, sql, persistent, busy)?;
        let canonical = raw.sql();
        let info = StatementInfo {
            kind: classify(&canonical),
            column_count: raw.column_count(),
            parameter_count: raw.parameter_count(),
            sql: canonical,
        };
        Ok(Self {
            info,
            raw,
            in_use: Cell::new(false),
        })
    }

    pub fn info(&self) -> &StatementInfo {
        &self.info
    }
}

#[derive(Clone, Default)]
pub struct IndexHandle(Rc<Cell<Option<StatementIndex>>>);

impl IndexHandle {
    fn new(index: StatementIndex) -> Self {
        Self(Rc::new(Cell::new(Some(index))))
    }

    pub fn index(&self) -> Option<StatementIndex> {
        self.0.get()
    }

    pub fn is_valid(&self) -> bool {
        self.0.get().is_some()
    }

    pub fn set(&self, index: Option<StatementIndex>) {
        self.0.set(index);
    }
}

impl fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index() {
            Some(index) => write!(f, "IndexHandle({})", index),
            None => write!(f, "IndexHandle(none)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalStatement {
    Begin,
    BeginImmediate,
    Commit,
    Rollback,
    Vacuum,
}

impl InternalStatement {
    pub const ALL: [InternalStatement; 5] = [
        InternalStatement::Begin,
        InternalStatement::BeginImmediate,
        InternalStatement::Commit,
        InternalStatement::Rollback,
        InternalStatement::Vacuum,
    ];

    pub fn sql(self) -> &'static str {
        match self {
            InternalStatement::Begin => "BEGIN;",
            InternalStatement::BeginImmediate => "BEGIN IMMEDIATE;",
            InternalStatement::Commit => "COMMIT;",
            InternalStatement::Rollback => "ROLLBACK;",
            InternalStatement::Vacuum => "VACUUM;",
        }
    }

    pub fn index(self) -> StatementIndex {
        StatementIndex(self as usize)
    }
}

struct StatementSlot {
    statement: Rc<CompiledStatement>,
    handle: Option<IndexHandle>,
}

#[derive(Default)]
pub(crate) struct StatementCache {
    slots: Vec<StatementSlot>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn insert(
        &mut self,
        db: *mut ffi::sqlite3,
        sql: &str,
        persistent: bool,
        busy: &BusyPolicy,
        track: bool,
    ) -> Result<(StatementIndex, Option<IndexHandle>), DbError> {
        if classify(sql).is_pragma() {
            return Err(DbError::PragmaNotCacheable {
                sql: sql.to_string(),
            });
        }

        let statement = CompiledStatement::compile(db, sql, persistent, busy)?;
        let index = StatementIndex(self.slots.len());
        let handle = track.then(|| IndexHandle::new(index));
        debug!(%index, sql = %statement.info.sql, kind = ?statement.info.kind, "prepared statement");

        self.slots.push(StatementSlot {
            statement: Rc::new(statement),
            handle: handle.clone(),
        });
        Ok((index, handle))
    }

    pub fn find(&self, sql: &str) -> Option<StatementIndex> {
        let wanted = sql.trim();
        self.slots
            .iter()
            .position(|slot| slot.statement.info.sql.trim() == wanted)
            .map(StatementIndex)
    }

    pub fn info(&self, index: StatementIndex) -> Option<&StatementInfo> {
        self.slots.get(index.0).map(|slot| &slot.statement.info)
    }

    pub(crate) fn snapshot(&self, index: StatementIndex) -> Result<Rc<CompiledStatement>, DbError> {
        self.slots
            .get(index.0)
            .map(|slot| Rc::clone(&slot.statement))
            .ok_or_else(|| DbError::NotFound(index.to_string()))
    }

    pub fn clear(&mut self, reset_indices: bool) {
        if self.slots.is_empty() {
            return;
        }
        trace!(count = self.slots.len(), reset_indices, "clearing statement cache");

        for (position, slot) in self.slots.drain(..).enumerate() {
            if reset_indices {
                if let Some(handle) = &slot.handle {
                    if handle.index() == Some(StatementIndex(position)) {
                        handle.set(None);
                    }
                }
            }
        }
    }

    /// Rebuilds the cache so that it holds exactly the internal statements.
    /// Leaves the cache empty if any of them fails to compile.
    pub(crate) fn seed_internal(
        &mut self,
        db: *mut ffi::sqlite3,
        persistent: bool,
        busy: &BusyPolicy,
    ) -> Result<(), DbError> {
        self.clear(false);
        for internal in InternalStatement::ALL {
            if let Err(err) = self.insert(db, internal.sql(), persistent, busy, false) {
                self.clear(false);
                return Err(err);
            }
        }
        Ok(())
    }
}
