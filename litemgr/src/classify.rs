///
/// Statement classification by leading verb phrase.
///
/// Only the common SQLite statement forms are recognised. Matching is an
/// ASCII case-insensitive prefix test after leading whitespace. The phrase
/// table is ordered longest-first within each verb family, and the first
/// match wins.
///

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    AlterTable,
    Analyze,
    Attach,
    Begin,
    Commit,
    CreateIndex,
    CreateTable,
    CreateTrigger,
    CreateView,
    CreateVirtualTable,
    Delete,
    Detach,
    DropIndex,
    DropTable,
    DropTrigger,
    DropView,
    Insert,
    Pragma,
    Reindex,
    Release,
    Rollback,
    Savepoint,
    Select,
    Update,
    Vacuum,
    Unknown,
}

const PHRASES: &[(&str, StatementKind)] = &[
    ("ALTER TABLE", StatementKind::AlterTable),
    ("ANALYZE", StatementKind::Analyze),
    ("ATTACH", StatementKind::Attach),
    ("BEGIN IMMEDIATE", StatementKind::Begin),
    ("BEGIN", StatementKind::Begin),
    ("COMMIT", StatementKind::Commit),
    ("CREATE UNIQUE INDEX", StatementKind::CreateIndex),
    ("CREATE INDEX", StatementKind::CreateIndex),
    ("CREATE TEMPORARY TABLE", StatementKind::CreateTable),
    ("CREATE TEMP TABLE", StatementKind::CreateTable),
    ("CREATE TABLE", StatementKind::CreateTable),
    ("CREATE TEMPORARY TRIGGER", StatementKind::CreateTrigger),
    ("CREATE TEMP TRIGGER", StatementKind::CreateTrigger),
    ("CREATE TRIGGER", StatementKind::CreateTrigger),
    ("CREATE TEMPORARY VIEW", StatementKind::CreateView),
    ("CREATE TEMP VIEW", StatementKind::CreateView),
    ("CREATE VIEW", StatementKind::CreateView),
    ("CREATE VIRTUAL TABLE", StatementKind::CreateVirtualTable),
    ("DELETE FROM", StatementKind::Delete),
    ("DETACH", StatementKind::Detach),
    ("DROP INDEX", StatementKind::DropIndex),
    ("DROP TABLE", StatementKind::DropTable),
    ("DROP TRIGGER", StatementKind::DropTrigger),
    ("DROP VIEW", StatementKind::DropView),
    ("INSERT INTO", StatementKind::Insert),
    ("PRAGMA", StatementKind::Pragma),
    ("REINDEX", StatementKind::Reindex),
    ("RELEASE", StatementKind::Release),
    ("ROLLBACK", StatementKind::Rollback),
    ("SAVEPOINT", StatementKind::Savepoint),
    ("SELECT", StatementKind::Select),
    ("UPDATE", StatementKind::Update),
    ("VACUUM", StatementKind::Vacuum),
];

pub fn classify(sql: &str) -> StatementKind {
    let text = sql.trim_start().as_bytes();
    for (phrase, kind) in PHRASES {
        let phrase = phrase.as_bytes();
        if text.len() >= phrase.len() && text[..phrase.len()].eq_ignore_ascii_case(phrase) {
            return *kind;
        }
    }
    StatementKind::Unknown
}

impl StatementKind {
    pub fn is_pragma(self) -> bool {
        self == StatementKind::Pragma
    }

    pub fn is_ddl(self) -> bool {
        matches!(
            self,
            StatementKind::AlterTable
                | StatementKind::CreateIndex
                | StatementKind::CreateTable
                | StatementKind::CreateTrigger
                | StatementKind::CreateView
                | StatementKind::CreateVirtualTable
                | StatementKind::DropIndex
                | StatementKind::DropTable
                | StatementKind::DropTrigger
                | StatementKind::DropView
        )
    }

    pub fn is_transaction_control(self) -> bool {
        matches!(
            self,
            StatementKind::Begin
                | StatementKind::Commit
                | StatementKind::Rollback
                | StatementKind::Savepoint
                | StatementKind::Release
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dml_verbs() {
        assert_eq!(classify("SELECT * FROM t"), StatementKind::Select);
        assert_eq!(classify("insert into t VALUES (1)"), StatementKind::Insert);
        assert_eq!(classify("Update t SET a = 1"), StatementKind::Update);
        assert_eq!(classify("delete FROM t"), StatementKind::Delete);
    }

    #[test]
    fn test_create_variants() {
        assert_eq!(classify("CREATE TABLE t(a)"), StatementKind::CreateTable);
        assert_eq!(classify("create temp table t(a)"), StatementKind::CreateTable);
        assert_eq!(classify("CREATE TEMPORARY TABLE t(a)"), StatementKind::CreateTable);
        assert_eq!(classify("CREATE UNIQUE INDEX i ON t(a)"), StatementKind::CreateIndex);
        assert_eq!(classify("CREATE INDEX i ON t(a)"), StatementKind::CreateIndex);
        assert_eq!(
            classify("CREATE VIRTUAL TABLE f USING fts5(body)"),
            StatementKind::CreateVirtualTable
        );
        assert_eq!(classify("CREATE TEMP VIEW v AS SELECT 1"), StatementKind::CreateView);
        assert_eq!(
            classify("CREATE TRIGGER tr AFTER INSERT ON t BEGIN SELECT 1; END"),
            StatementKind::CreateTrigger
        );
    }

    #[test]
    fn test_transaction_and_admin() {
        assert_eq!(classify("BEGIN;"), StatementKind::Begin);
        assert_eq!(classify("BEGIN IMMEDIATE;"), StatementKind::Begin);
        assert_eq!(classify("COMMIT;"), StatementKind::Commit);
        assert_eq!(classify("ROLLBACK"), StatementKind::Rollback);
        assert_eq!(classify("SAVEPOINT sp"), StatementKind::Savepoint);
        assert_eq!(classify("RELEASE sp"), StatementKind::Release);
        assert_eq!(classify("pragma user_version"), StatementKind::Pragma);
        assert_eq!(classify("VACUUM;"), StatementKind::Vacuum);
        assert_eq!(classify("ANALYZE"), StatementKind::Analyze);
        assert_eq!(classify("ATTACH 'x.db' AS x"), StatementKind::Attach);
        assert_eq!(classify("DETACH x"), StatementKind::Detach);
        assert_eq!(classify("REINDEX"), StatementKind::Reindex);
    }

    #[test]
    fn test_drop_variants() {
        assert_eq!(classify("DROP TABLE t"), StatementKind::DropTable);
        assert_eq!(classify("DROP INDEX i"), StatementKind::DropIndex);
        assert_eq!(classify("DROP VIEW v"), StatementKind::DropView);
        assert_eq!(classify("DROP TRIGGER tr"), StatementKind::DropTrigger);
    }

    #[test]
    fn test_unknown_and_short_input() {
        assert_eq!(classify(""), StatementKind::Unknown);
        assert_eq!(classify("SEL"), StatementKind::Unknown);
        assert_eq!(classify("WITH x AS (SELECT 1) SELECT * FROM x"), StatementKind::Unknown);
        assert_eq!(classify("EXPLAIN SELECT 1"), StatementKind::Unknown);
    }

    #[test]
    fn test_leading_whitespace_ignored() {
        assert_eq!(classify("  \n\tSELECT 1"), StatementKind::Select);
    }

    #[test]
    fn test_kind_groups() {
        assert!(StatementKind::CreateTable.is_ddl());
        assert!(StatementKind::DropView.is_ddl());
        assert!(!StatementKind::Select.is_ddl());
        assert!(StatementKind::Savepoint.is_transaction_control());
        assert!(StatementKind::Pragma.is_pragma());
    }
}
