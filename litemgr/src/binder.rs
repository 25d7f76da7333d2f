///
/// Parameter binding.
///
/// Two separate paths:
/// - `bind_all` attaches arguments to a compiled statement positionally,
///   starting at placeholder 1.
/// - `substitute_pragma` rewrites PRAGMA text, replacing each `?` with the
///   decimal rendering of an integer argument. PRAGMA statements are never
///   compiled ahead of time, so they have no placeholders to bind to. Only
///   integer arguments are accepted on this path.
///

use crate::cache::StatementInfo;
use crate::errors::DbError;
use crate::raw::RawStatement;
use crate::value::{BindArgument, BindMode};

const SQLITE_OK: i32 = rusqlite::ffi::SQLITE_OK as i32;

fn check_count(info: &StatementInfo, args: &[BindArgument<'_>]) -> Result<(), DbError> {
    if info.parameter_count != args.len() {
        return Err(DbError::ParameterCount {
            expected: info.parameter_count,
            actual: args.len(),
        });
    }
    Ok(())
}

/// Binds `args` to `stmt`. Borrowed text and blobs stay referenced by the
/// statement until its bindings are cleared, which the engine does before
/// the arguments' lifetime ends.
pub(crate) fn bind_all(
    stmt: &RawStatement,
    info: &StatementInfo,
    args: &[BindArgument<'_>],
) -> Result<(), DbError> {
    check_count(info, args)?;

    for (offset, arg) in args.iter().enumerate() {
        let position = offset + 1;
        let rc = match *arg {
            BindArgument::Int(value) => stmt.bind_i64(position, value.to_i64()),
            BindArgument::Float(value) => stmt.bind_f64(position, value.to_f64()),
            BindArgument::Text(text, mode) => {
                check_len(position, text.len())?;
                stmt.bind_text(position, text, mode == BindMode::Copy)
            }
            BindArgument::Blob(bytes, mode) => {
                check_len(position, bytes.len())?;
                stmt.bind_blob(position, bytes, mode == BindMode::Copy)
            }
            BindArgument::Null => stmt.bind_null(position),
        };
        if rc != SQLITE_OK {
            return Err(stmt.error(rc));
        }
    }
    Ok(())
}

fn check_len(position: usize, len: usize) -> Result<(), DbError> {
    if len > i32::MAX as usize {
        return Err(DbError::ArgumentTooLarge { position, len });
    }
    Ok(())
}

/// Returns the PRAGMA text with every `?` replaced by its integer argument.
pub(crate) fn substitute_pragma(
    info: &StatementInfo,
    args: &[BindArgument<'_>],
) -> Result<String, DbError> {
    check_count(info, args)?;

    let mut out = String::with_capacity(info.sql.len() + args.len() * 8);
    let mut args = args.iter().enumerate();
    for ch in info.sql.chars() {
        if ch != '?' {
            out.push(ch);
            continue;
        }
        match args.next() {
            Some((_, BindArgument::Int(value))) => out.push_str(&value.to_string()),
            Some((offset, other)) => {
                return Err(DbError::PragmaArgument {
                    position: offset + 1,
                    kind: other.kind_name(),
                });
            }
            None => unreachable!("placeholder count checked above"),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Integer;

    #[test]
    fn test_pragma_substitution_in_order() {
        let info = StatementInfo::pragma("PRAGMA cache_size = ?; PRAGMA user_version = ?");
        assert_eq!(info.parameter_count, 2);
        let sql = substitute_pragma(
            &info,
            &[BindArgument::from(-2000i32), BindArgument::from(7u8)],
        )
        .unwrap();
        assert_eq!(sql, "PRAGMA cache_size = -2000; PRAGMA user_version = 7");
    }

    #[test]
    fn test_pragma_substitution_renders_full_unsigned_range() {
        let info = StatementInfo::pragma("PRAGMA mmap_size = ?");
        let sql = substitute_pragma(&info, &[BindArgument::Int(Integer::U64(u64::MAX))]).unwrap();
        assert_eq!(sql, "PRAGMA mmap_size = 18446744073709551615");
    }

    #[test]
    fn test_pragma_rejects_non_integer() {
        let info = StatementInfo::pragma("PRAGMA journal_mode = ?");
        let err = substitute_pragma(&info, &[BindArgument::text("wal")]).unwrap_err();
        match err {
            DbError::PragmaArgument { position, kind } => {
                assert_eq!(position, 1);
                assert_eq!(kind, "text");
            }
            other => panic!("unexpected error: {other}"),
        }

        let info = StatementInfo::pragma("PRAGMA a = ?; PRAGMA b = ?");
        let err = substitute_pragma(&info, &[BindArgument::from(1i64), BindArgument::Null])
            .unwrap_err();
        assert!(matches!(err, DbError::PragmaArgument { position: 2, kind: "null" }));
    }

    #[test]
    fn test_pragma_count_mismatch() {
        let info = StatementInfo::pragma("PRAGMA user_version = ?");
        let err = substitute_pragma(&info, &[]).unwrap_err();
        assert!(matches!(
            err,
            DbError::ParameterCount {
                expected: 1,
                actual: 0
            }
        ));
    }

    #[test]
    fn test_pragma_without_placeholders() {
        let info = StatementInfo::pragma("PRAGMA user_version");
        assert_eq!(substitute_pragma(&info, &[]).unwrap(), "PRAGMA user_version");
    }
}
