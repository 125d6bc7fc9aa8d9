//! SQLite storage bootstrap and schema evolution entry points.
//!
//! # Responsibility
//! - Open and configure SQLite connections for Questboard core.
//! - Run additive schema migrations at startup.
//!
//! # Invariants
//! - Migration state is tracked in `schema_migrations` and mirrored to
//!   `PRAGMA user_version`.
//! - A failed migration degrades the process; it does not prevent opening.
//!   Callers that need the full schema check [`MigrationReport::ensure_complete`].

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use migrations::{MigrationError, MigrationReport};
pub use open::{open_db, open_db_in_memory, open_db_with_report};

pub type DbResult<T> = Result<T, DbError>;

/// Storage-level failures.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The file was migrated by a newer build; opening it would hide columns.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// A migration step stayed pending after the last run.
    Migration(MigrationError),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite: {err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "store schema v{db_version} was written by a newer build (this build knows v{latest_supported})"
            ),
            Self::Migration(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Migration(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<MigrationError> for DbError {
    fn from(value: MigrationError) -> Self {
        Self::Migration(value)
    }
}
