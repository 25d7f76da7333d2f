///
/// # Manager Configuration
///
/// Tunables for a `Database` instance, loadable from TOML. Every field has a
/// default, so an empty document is a valid configuration.
///
/// ## Example
///
/// ```toml
/// busy_timeout_secs = 30
/// busy_retry_interval_ms = 500
/// persistent_statements = true
/// ```
///
/// `busy_timeout_secs` bounds how long a compile or step keeps retrying
/// while another connection holds the file lock; `busy_retry_interval_ms`
/// is the fixed sleep between attempts.
///

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::DbError;

pub const DEFAULT_BUSY_TIMEOUT_SECS: u32 = 30;
pub const DEFAULT_BUSY_RETRY_INTERVAL_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub busy_timeout_secs: u32,
    pub busy_retry_interval_ms: u64,
    /// Compile cached statements with `SQLITE_PREPARE_PERSISTENT`.
    pub persistent_statements: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            busy_timeout_secs: DEFAULT_BUSY_TIMEOUT_SECS,
            busy_retry_interval_ms: DEFAULT_BUSY_RETRY_INTERVAL_MS,
            persistent_statements: true,
        }
    }
}

impl ManagerConfig {
    pub fn load(path: &Path) -> Result<Self, DbError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, DbError> {
        let config: ManagerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DbError> {
        if self.busy_retry_interval_ms == 0 {
            return Err(DbError::Config(
                "busy_retry_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn busy_policy(&self) -> BusyPolicy {
        BusyPolicy {
            timeout: Duration::from_secs(u64::from(self.busy_timeout_secs)),
            interval: Duration::from_millis(self.busy_retry_interval_ms.max(1)),
        }
    }
}

/// Retry budget applied to `SQLITE_BUSY` results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl BusyPolicy {
    /// Runs `attempt` until it stops reporting busy or the accumulated wait
    /// reaches the timeout. Returns the last status and the time spent
    /// sleeping.
    pub fn retry<F>(&self, mut attempt: F) -> (i32, Duration)
    where
        F: FnMut() -> i32,
    {
        let mut waited = Duration::ZERO;
        loop {
            let rc = attempt();
            if rc & 0xff != rusqlite::ffi::SQLITE_BUSY as i32 || waited >= self.timeout {
                return (rc, waited);
            }
            tracing::trace!(waited_ms = waited.as_millis() as u64, "database busy, retrying");
            std::thread::sleep(self.interval);
            waited += self.interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ManagerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ManagerConfig::default());
        assert_eq!(config.busy_timeout_secs, 30);
        assert_eq!(config.busy_retry_interval_ms, 500);
        assert!(config.persistent_statements);
    }

    #[test]
    fn test_partial_document() {
        let config = ManagerConfig::from_toml_str(
            r#"
busy_timeout_secs = 2
persistent_statements = false
"#,
        )
        .unwrap();
        assert_eq!(config.busy_timeout_secs, 2);
        assert_eq!(config.busy_retry_interval_ms, 500);
        assert!(!config.persistent_statements);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = ManagerConfig::from_toml_str("busy_retry_interval_ms = 0").unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let err = ManagerConfig::from_toml_str("busy_timeout_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, DbError::Toml(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("litemgr.toml");
        std::fs::write(&path, "busy_timeout_secs = 5\n").unwrap();
        let config = ManagerConfig::load(&path).unwrap();
        assert_eq!(config.busy_timeout_secs, 5);
    }

    #[test]
    fn test_retry_stops_on_first_non_busy() {
        let policy = BusyPolicy {
            timeout: Duration::from_secs(10),
            interval: Duration::from_millis(1),
        };
        let calls = Cell::new(0);
        let (rc, waited) = policy.retry(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                rusqlite::ffi::SQLITE_BUSY as i32
            } else {
                rusqlite::ffi::SQLITE_DONE as i32
            }
        });
        assert_eq!(rc, rusqlite::ffi::SQLITE_DONE as i32);
        assert_eq!(calls.get(), 3);
        assert_eq!(waited, Duration::from_millis(2));
    }

    #[test]
    fn test_retry_gives_up_after_timeout() {
        let policy = BusyPolicy {
            timeout: Duration::from_millis(3),
            interval: Duration::from_millis(1),
        };
        let calls = Cell::new(0);
        let (rc, waited) = policy.retry(|| {
            calls.set(calls.get() + 1);
            rusqlite::ffi::SQLITE_BUSY as i32
        });
        assert_eq!(rc, rusqlite::ffi::SQLITE_BUSY as i32);
        assert_eq!(waited, Duration::from_millis(3));
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn test_zero_timeout_tries_once() {
        let policy = ManagerConfig {
            busy_timeout_secs: 0,
            ..ManagerConfig::default()
        }
        .busy_policy();
        let calls = Cell::new(0);
        let (rc, _) = policy.retry(|| {
            calls.set(calls.get() + 1);
            rusqlite::ffi::SQLITE_BUSY as i32
        });
        assert_eq!(rc & 0xff, rusqlite::ffi::SQLITE_BUSY as i32);
        assert_eq!(calls.get(), 1);
    }
}
