//! SQLite-backed store for signals and issues.
//!
//! The database lives at `~/.opspulse/opspulse.db`. Signals are append-mostly
//! (status and consumption fields are the only mutable columns); issues are
//! mutable but never deleted. Query methods are split across submodules in
//! `impl PulseDb` blocks: `signals.rs` for the signal store, `issues.rs` for
//! the issue store.

use std::path::PathBuf;

use rusqlite::Connection;
use thiserror::Error;

pub mod issues;
pub mod signals;

pub use issues::IssueFilter;
pub use signals::{FormationGroup, SignalFilter};

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("home directory not found")]
    HomeDirNotFound,

    #[error("failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// SQLite connection wrapper for signal/issue state.
///
/// Intentionally NOT `Clone` or `Sync`; callers that share a connection
/// across threads hold it behind a mutex.
pub struct PulseDb {
    conn: Connection,
}

impl PulseDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Self) -> Result<T, DbError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database at `~/.opspulse/opspulse.db` and apply
    /// pending migrations.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.opspulse/opspulse.db`.
    fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".opspulse").join("opspulse.db"))
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::test_utils::test_db;
    use super::*;

    #[test]
    fn test_open_applies_schema() {
        let db = test_db();
        let count: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM signals", [], |row| row.get(0))
            .expect("signals table");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_transaction_rolls_back_on_err() {
        let db = test_db();
        let result: Result<(), DbError> = db.with_transaction(|db| {
            db.conn_ref().execute(
                "INSERT INTO issues (id, issue_type, issue_subtype, scope_level, scope_id,
                                     headline, severity, priority_score, detected_at, created_at, updated_at)
                 VALUES ('iss-x', 't', 's', 'client', 'c1', 'h', 'medium', 1.0, 'now', 'now', 'now')",
                [],
            )?;
            Err(DbError::Migration("forced".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM issues", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 0, "rollback should discard the insert");
    }
}
