//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure pragmas the engine relies on.
//! - Run schema migrations before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON` and a busy timeout, so
//!   concurrent writers wait instead of failing.
//! - File databases run in WAL mode so readers do not block the writer.

use super::migrations::{apply_migrations, MigrationReport};
use super::DbResult;
use log::{error, info, warn};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenMode {
    File,
    Memory,
}

impl OpenMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Memory => "memory",
        }
    }
}

/// Opens a SQLite database file and applies pending migrations.
///
/// Migration failures are logged and leave the process in degraded mode;
/// use [`open_db_with_report`] to inspect them.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_db_with_report(path).map(|(conn, _)| conn)
}

/// Opens a SQLite database file and returns the migration report alongside.
pub fn open_db_with_report(path: impl AsRef<Path>) -> DbResult<(Connection, MigrationReport)> {
    let path = path.as_ref();
    open_with(OpenMode::File, || Connection::open(path))
}

/// Opens an in-memory SQLite database and applies all migrations.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_with(OpenMode::Memory, Connection::open_in_memory).map(|(conn, _)| conn)
}

fn open_with(
    mode: OpenMode,
    open: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<(Connection, MigrationReport)> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={}", mode.as_str());

    let mut conn = match open() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_open_failed error={}",
                mode.as_str(),
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&mut conn, mode) {
        Ok(report) => {
            let status = if report.is_degraded() { "degraded" } else { "ok" };
            if report.is_degraded() {
                warn!(
                    "event=db_open module=db status={} mode={} duration_ms={} failed_migrations={}",
                    status,
                    mode.as_str(),
                    started_at.elapsed().as_millis(),
                    report.failed.len()
                );
            } else {
                info!(
                    "event=db_open module=db status={} mode={} duration_ms={} applied_migrations={}",
                    status,
                    mode.as_str(),
                    started_at.elapsed().as_millis(),
                    report.applied.len()
                );
            }
            Ok((conn, report))
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
                mode.as_str(),
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(conn: &mut Connection, mode: OpenMode) -> DbResult<MigrationReport> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    if mode == OpenMode::File {
        let _journal: String =
            conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    }
    apply_migrations(conn)
}
