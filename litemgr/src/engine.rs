///
/// # Execution Engine
///
/// Drives one statement from bind to completion:
///
/// ```text
/// Idle -> Binding -> Stepping -> RowReady -> Stepping ... -> Done | Error
/// ```
///
/// Each step goes through the busy-retry loop in `BusyPolicy::retry`; a step
/// that is retried while the file is locked still counts as one logical
/// step. `SQLITE_DONE` on the very first logical step of a SELECT means the
/// query matched nothing and is reported as `ExecOutcome::NoResult`.
///
/// Whatever happens, bindings are cleared and the statement reset before
/// the call returns (see `ResetGuard`). PRAGMA and one-shot statements are
/// owned by the call and finalized when it ends.
///

use std::cell::Cell;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::binder::{bind_all, substitute_pragma};
use crate::cache::{CompiledStatement, IndexHandle, InternalStatement, StatementIndex, StatementInfo};
use crate::classify::{StatementKind, classify};
use crate::config::BusyPolicy;
use crate::database::Database;
use crate::errors::{DbError, Status};
use crate::raw::{RawStatement, StepStatus};
use crate::row::Row;
use crate::value::BindArgument;

/// What the row callback wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAction {
    Continue,
    /// Stop stepping; the call returns `ExecOutcome::Stopped`.
    Stop,
    /// Stop stepping; the call returns `DbError::CallbackFailed`.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    Completed { rows: u64 },
    /// A SELECT that finished on its first step.
    NoResult,
    Stopped { rows: u64 },
}

impl ExecOutcome {
    pub fn status(&self) -> Status {
        match self {
            ExecOutcome::Completed { .. } => Status::Success,
            ExecOutcome::NoResult => Status::NotFound,
            ExecOutcome::Stopped { .. } => Status::StopCallback,
        }
    }

    /// Rows handed out before the statement finished or was stopped.
    pub fn rows(&self) -> u64 {
        match self {
            ExecOutcome::Completed { rows } | ExecOutcome::Stopped { rows } => *rows,
            ExecOutcome::NoResult => 0,
        }
    }
}

/// Which statement to run.
#[derive(Debug, Clone, Copy)]
pub enum Target<'q> {
    /// Cached statement with this text, compiled and cached on first use.
    /// PRAGMA text is compiled for this call only.
    Sql(&'q str),
    Index(StatementIndex),
    Handle(&'q IndexHandle),
    Internal(InternalStatement),
}

impl<'q> From<&'q str> for Target<'q> {
    fn from(sql: &'q str) -> Self {
        Target::Sql(sql)
    }
}

impl<'q> From<&'q String> for Target<'q> {
    fn from(sql: &'q String) -> Self {
        Target::Sql(sql.as_str())
    }
}

impl From<StatementIndex> for Target<'_> {
    fn from(index: StatementIndex) -> Self {
        Target::Index(index)
    }
}

impl<'q> From<&'q IndexHandle> for Target<'q> {
    fn from(handle: &'q IndexHandle) -> Self {
        Target::Handle(handle)
    }
}

impl From<InternalStatement> for Target<'_> {
    fn from(internal: InternalStatement) -> Self {
        Target::Internal(internal)
    }
}

/// Row callback. It gets the database back so it may prepare or run other
/// statements while rows are being produced.
pub type RowCallback<'c> = dyn FnMut(&mut Database, &Row<'_>) -> RowAction + 'c;

enum Prepared {
    Cached(Rc<CompiledStatement>),
    Transient(CompiledStatement),
    Pragma(StatementInfo),
}

/// Clears bindings and resets the statement on every exit path.
struct ResetGuard<'s>(&'s RawStatement);

impl Drop for ResetGuard<'_> {
    fn drop(&mut self) {
        self.0.clear_bindings();
        self.0.reset();
    }
}

/// Marks a cached statement as stepping for the lifetime of one execution.
struct InUse<'s>(&'s Cell<bool>);

impl<'s> InUse<'s> {
    fn take(flag: &'s Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for InUse<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Database {
    /// Runs a statement to completion, discarding any rows.
    pub fn execute<'q>(
        &mut self,
        target: impl Into<Target<'q>>,
        args: &[BindArgument<'_>],
    ) -> Result<ExecOutcome, DbError> {
        let prepared = self.resolve(target.into())?;
        self.run(prepared, args, None)
    }

    /// Runs a statement, calling `on_row` for every result row.
    pub fn query<'q, F>(
        &mut self,
        target: impl Into<Target<'q>>,
        args: &[BindArgument<'_>],
        mut on_row: F,
    ) -> Result<ExecOutcome, DbError>
    where
        F: FnMut(&mut Database, &Row<'_>) -> RowAction,
    {
        let prepared = self.resolve(target.into())?;
        let on_row: &mut RowCallback<'_> = &mut on_row;
        self.run(prepared, args, Some(on_row))
    }

    /// Compiles, runs and finalizes `sql` without touching the cache.
    pub(crate) fn execute_once(
        &mut self,
        sql: &str,
        args: &[BindArgument<'_>],
    ) -> Result<ExecOutcome, DbError> {
        let db = self.raw_handle()?;
        let busy = self.config.busy_policy();
        let statement = CompiledStatement::compile(db, sql, false, &busy)?;
        self.run(Prepared::Transient(statement), args, None)
    }

    fn resolve(&mut self, target: Target<'_>) -> Result<Prepared, DbError> {
        self.raw_handle()?;

        let index = match target {
            Target::Sql(sql) => match self.cache.find(sql) {
                Some(index) => index,
                None if classify(sql).is_pragma() => {
                    return Ok(Prepared::Pragma(StatementInfo::pragma(sql)));
                }
                None => self.prepare(sql)?,
            },
            Target::Index(index) => index,
            Target::Handle(handle) => handle
                .index()
                .ok_or_else(|| DbError::NotFound("handle holds no index".to_string()))?,
            Target::Internal(internal) => internal.index(),
        };
        Ok(Prepared::Cached(self.cache.snapshot(index)?))
    }

    fn run(
        &mut self,
        prepared: Prepared,
        args: &[BindArgument<'_>],
        on_row: Option<&mut RowCallback<'_>>,
    ) -> Result<ExecOutcome, DbError> {
        let busy = self.config.busy_policy();

        match prepared {
            Prepared::Cached(statement) => {
                if statement.in_use.get() {
                    // An outer call is still stepping this handle; run a
                    // private copy so its cursor and bindings stay intact.
                    trace!(sql = %statement.info.sql, "statement in use, compiling a transient copy");
                    let db = self.raw_handle()?;
                    let copy = CompiledStatement::compile(db, &statement.info.sql, false, &busy)?;
                    return self.run(Prepared::Transient(copy), args, on_row);
                }
                let _lease = InUse::take(&statement.in_use);
                let _guard = ResetGuard(&statement.raw);
                bind_all(&statement.raw, &statement.info, args)?;
                self.step_all(&statement.raw, &statement.info, &busy, on_row)
            }
            Prepared::Transient(statement) => {
                let _guard = ResetGuard(&statement.raw);
                bind_all(&statement.raw, &statement.info, args)?;
                self.step_all(&statement.raw, &statement.info, &busy, on_row)
            }
            Prepared::Pragma(info) => {
                let sql = substitute_pragma(&info, args)?;
                let db = self.raw_handle()?;
                let raw = RawStatement::prepare(db, &sql, false, &busy)?;
                let info = StatementInfo {
                    column_count: raw.column_count(),
                    ..info
                };
                trace!(sql = %sql, "running pragma");
                let _guard = ResetGuard(&raw);
                self.step_all(&raw, &info, &busy, on_row)
            }
        }
    }

    fn step_all(
        &mut self,
        raw: &RawStatement,
        info: &StatementInfo,
        busy: &BusyPolicy,
        mut on_row: Option<&mut RowCallback<'_>>,
    ) -> Result<ExecOutcome, DbError> {
        let mut steps: u64 = 0;
        let mut rows: u64 = 0;

        loop {
            let status = raw.step(busy);
            steps += 1;

            match status {
                StepStatus::Row => {
                    if let Some(callback) = on_row.as_deref_mut() {
                        let row = Row::new(raw, info, rows);
                        match callback(self, &row) {
                            RowAction::Continue => {}
                            RowAction::Stop => {
                                trace!(sql = %info.sql, rows = rows + 1, "row callback stopped");
                                return Ok(ExecOutcome::Stopped { rows: rows + 1 });
                            }
                            RowAction::Fail => {
                                debug!(sql = %info.sql, row = rows, "row callback failed");
                                return Err(DbError::CallbackFailed);
                            }
                        }
                    }
                    rows += 1;
                }
                StepStatus::Done => {
                    trace!(
                        sql = %info.sql,
                        steps,
                        rows,
                        ddl = info.kind.is_ddl(),
                        transaction = info.kind.is_transaction_control(),
                        "statement done"
                    );
                    if info.kind == StatementKind::Select && steps == 1 {
                        return Ok(ExecOutcome::NoResult);
                    }
                    return Ok(ExecOutcome::Completed { rows });
                }
                StepStatus::Busy(waited) => {
                    warn!(sql = %info.sql, waited_ms = waited.as_millis() as u64, "busy timeout exhausted");
                    return Err(DbError::Busy { waited });
                }
                StepStatus::Error(rc) => {
                    let err = raw.error(rc);
                    debug!(
                        sql = %info.sql,
                        expanded = raw.expanded_sql().as_deref().unwrap_or(""),
                        error = %err,
                        "step failed"
                    );
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Disposition, OpenOptions};

    fn open_scratch(dir: &tempfile::TempDir) -> Database {
        let mut db = Database::default();
        db.open(
            OpenOptions::new(dir.path().join("engine.db"))
                .disposition(Disposition::CreateAlways)
                .create_queries(["CREATE TABLE t(id INTEGER, name TEXT)"]),
        )
        .unwrap();
        db
    }

    #[test]
    fn test_outcome_status_mapping() {
        assert_eq!(ExecOutcome::Completed { rows: 3 }.status(), Status::Success);
        assert_eq!(ExecOutcome::NoResult.status(), Status::NotFound);
        assert_eq!(ExecOutcome::Stopped { rows: 1 }.status(), Status::StopCallback);
        assert_eq!(ExecOutcome::Stopped { rows: 1 }.rows(), 1);
        assert_eq!(ExecOutcome::NoResult.rows(), 0);
    }

    #[test]
    fn test_execute_by_text_caches_statement() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_scratch(&dir);
        let before = db.prepared_count();

        let insert = "INSERT INTO t VALUES (?, ?)";
        db.execute(insert, &[1i64.into(), "a".into()]).unwrap();
        db.execute(insert, &[2i64.into(), "b".into()]).unwrap();
        assert_eq!(db.prepared_count(), before + 1);
        assert!(db.find_prepared(insert).is_ok());
    }

    #[test]
    fn test_parameter_count_checked_before_binding() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_scratch(&dir);
        let err = db
            .execute("INSERT INTO t VALUES (?, ?)", &[1i64.into()])
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::ParameterCount {
                expected: 2,
                actual: 1
            }
        ));

        let err = db.execute("SELECT * FROM t", &[1i64.into()]).unwrap_err();
        assert!(matches!(err, DbError::ParameterCount { expected: 0, actual: 1 }));
    }

    #[test]
    fn test_statement_reusable_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_scratch(&dir);
        db.execute("CREATE UNIQUE INDEX t_id ON t(id)", &[]).unwrap();

        let insert = db.prepare("INSERT INTO t VALUES (?, ?)").unwrap();
        db.execute(insert, &[1i64.into(), "a".into()]).unwrap();
        let err = db.execute(insert, &[1i64.into(), "dup".into()]).unwrap_err();
        assert_eq!(err.sqlite_code(), Some(rusqlite::ffi::SQLITE_CONSTRAINT as i32));
        db.execute(insert, &[2i64.into(), "b".into()]).unwrap();

        let mut count = 0;
        db.query("SELECT id FROM t", &[], |_, _| {
            count += 1;
            RowAction::Continue
        })
        .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_borrowed_text_is_not_read_after_call() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_scratch(&dir);
        {
            let name = String::from("scoped");
            db.execute(
                "INSERT INTO t VALUES (?, ?)",
                &[7i64.into(), BindArgument::text_borrowed(&name)],
            )
            .unwrap();
        }

        let mut seen = None;
        db.query("SELECT name FROM t WHERE id = ?", &[7i64.into()], |_, row| {
            seen = row.get_text(0).map(str::to_string);
            RowAction::Continue
        })
        .unwrap();
        assert_eq!(seen.as_deref(), Some("scoped"));
    }

    #[test]
    fn test_pragma_runs_without_caching() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_scratch(&dir);
        let before = db.prepared_count();

        db.execute("PRAGMA user_version = ?", &[42i32.into()]).unwrap();
        let mut version = 0;
        let outcome = db
            .query("PRAGMA user_version", &[], |_, row| {
                version = row.get_i64(0);
                RowAction::Continue
            })
            .unwrap();
        assert_eq!(version, 42);
        assert_eq!(outcome, ExecOutcome::Completed { rows: 1 });
        assert_eq!(db.prepared_count(), before);

        let err = db
            .execute("PRAGMA user_version = ?", &[BindArgument::from(1.5f64)])
            .unwrap_err();
        assert!(matches!(err, DbError::PragmaArgument { position: 1, kind: "float" }));
    }

    #[test]
    fn test_callback_may_prepare_while_stepping() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_scratch(&dir);
        for id in 0..5i64 {
            db.execute("INSERT INTO t VALUES (?, ?)", &[id.into(), "x".into()])
                .unwrap();
        }

        let mut ids = Vec::new();
        let outcome = db
            .query("SELECT id FROM t ORDER BY id", &[], |db, row| {
                let id = row.get_i64(0);
                ids.push(id);
                db.prepare(&format!("SELECT name FROM t WHERE id = {}", id))
                    .unwrap();
                RowAction::Continue
            })
            .unwrap();
        assert_eq!(outcome, ExecOutcome::Completed { rows: 5 });
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_execute_requires_open_database() {
        let mut db = Database::default();
        let err = db.execute("SELECT 1", &[]).unwrap_err();
        assert!(matches!(err, DbError::NotOpen));
    }

    #[test]
    fn test_callback_reruns_statement_it_is_stepping() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_scratch(&dir);
        for id in 0..3i64 {
            db.execute("INSERT INTO t VALUES (?, ?)", &[id.into(), "x".into()])
                .unwrap();
        }
        let cached = db.prepared_count();

        let select = "SELECT id FROM t ORDER BY id";
        let mut ids = Vec::new();
        let mut inner = Vec::new();
        let outcome = db
            .query(select, &[], |db, row| {
                ids.push(row.get_i64(0));
                inner.push(db.execute(select, &[]).unwrap());
                if ids.len() > 10 { RowAction::Stop } else { RowAction::Continue }
            })
            .unwrap();

        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(outcome, ExecOutcome::Completed { rows: 3 });
        assert!(inner.iter().all(|o| *o == ExecOutcome::Completed { rows: 3 }));
        assert_eq!(db.prepared_count(), cached + 1);

        // The cached statement is free again once the outer call returns.
        assert_eq!(db.execute(select, &[]).unwrap(), ExecOutcome::Completed { rows: 3 });
    }

    #[test]
    fn test_callback_reruns_bound_statement() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_scratch(&dir);
        for id in 0..3i64 {
            db.execute("INSERT INTO t VALUES (?, ?)", &[id.into(), "x".into()])
                .unwrap();
        }

        let select = db.prepare("SELECT id FROM t WHERE id >= ? ORDER BY id").unwrap();
        let mut ids = Vec::new();
        let mut inner = Vec::new();
        let outcome = db
            .query(select, &[0i64.into()], |db, row| {
                ids.push(row.get_i64(0));
                inner.push(db.execute(select, &[1i64.into()]));
                RowAction::Continue
            })
            .unwrap();

        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(outcome, ExecOutcome::Completed { rows: 3 });
        for result in inner {
            assert_eq!(result.unwrap(), ExecOutcome::Completed { rows: 2 });
        }
    }
}
