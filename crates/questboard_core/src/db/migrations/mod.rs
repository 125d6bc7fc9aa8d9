//! Additive schema migration registry and runner.
//!
//! # Responsibility
//! - Register schema migrations in strictly increasing order.
//! - Apply each pending migration in its own immediate write transaction.
//! - Report failures as degraded state instead of aborting startup.
//!
//! # Invariants
//! - Migrations are additive only: create-if-missing or add-column-if-missing.
//! - Each migration moves Pending -> Applied exactly once; the ledger row and
//!   the schema change commit together.
//! - Re-running, or running from several processes at once, is a no-op for
//!   already applied steps. `BEGIN IMMEDIATE` serializes concurrent runners
//!   and the column check happens inside that transaction.
//! - `PRAGMA user_version` mirrors the highest applied version.

use crate::db::{DbError, DbResult};
use log::{error, info, warn};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
enum MigrationStep {
    /// Idempotent DDL batch (`CREATE ... IF NOT EXISTS`).
    Batch(&'static str),
    /// Adds a column when missing, then backfills nulls.
    AddColumn {
        table: &'static str,
        column: &'static str,
        definition: &'static str,
        backfill: Option<&'static str>,
    },
}

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    name: &'static str,
    step: MigrationStep,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "core_tables",
        step: MigrationStep::Batch(include_str!("0001_core_tables.sql")),
    },
    Migration {
        version: 2,
        name: "tasks_campaign",
        step: MigrationStep::AddColumn {
            table: "tasks",
            column: "campaign",
            definition: "TEXT NOT NULL DEFAULT 'unassigned'",
            backfill: Some("'unassigned'"),
        },
    },
    Migration {
        version: 3,
        name: "users_timezone",
        step: MigrationStep::AddColumn {
            table: "users",
            column: "timezone",
            definition: "TEXT NOT NULL DEFAULT 'UTC'",
            backfill: Some("'UTC'"),
        },
    },
    Migration {
        version: 4,
        name: "user_skills_completed_milestones",
        step: MigrationStep::AddColumn {
            table: "user_skills",
            column: "completed_milestones",
            definition: "TEXT NOT NULL DEFAULT '[]'",
            backfill: Some("'[]'"),
        },
    },
    Migration {
        version: 5,
        name: "user_skills_constellation_milestones",
        step: MigrationStep::AddColumn {
            table: "user_skills",
            column: "constellation_milestones",
            definition: "TEXT NOT NULL DEFAULT '[]'",
            backfill: Some("'[]'"),
        },
    },
    Migration {
        version: 6,
        name: "tasks_external_identity_index",
        step: MigrationStep::Batch(include_str!("0006_external_identity.sql")),
    },
    Migration {
        version: 7,
        name: "source_status",
        step: MigrationStep::Batch(include_str!("0007_source_status.sql")),
    },
];

const LEDGER_SQL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000)
);";

/// One migration that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationError {
    pub version: u32,
    pub name: &'static str,
    pub message: String,
}

impl Display for MigrationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "migration {} ({}) failed: {}",
            self.version, self.name, self.message
        )
    }
}

impl Error for MigrationError {}

/// Per-run summary of migration outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Versions applied by this run.
    pub applied: Vec<u32>,
    /// Versions found already applied.
    pub already_applied: Vec<u32>,
    pub failed: Vec<MigrationError>,
}

impl MigrationReport {
    /// True when at least one migration failed and the schema may lack
    /// columns some features depend on.
    pub fn is_degraded(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Fails with the first step that is still pending.
    pub fn ensure_complete(&self) -> DbResult<()> {
        match self.failed.first() {
            Some(failure) => Err(failure.clone().into()),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Applied,
    AlreadyApplied,
}

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Applies every pending migration.
///
/// # Errors
/// - [`DbError::UnsupportedSchemaVersion`] when the database was written by a
///   newer binary.
/// - [`DbError::Sqlite`] when the migration ledger itself cannot be created.
///
/// Individual migration failures are logged and collected in the report;
/// they do not abort the run.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<MigrationReport> {
    let current_version = current_user_version(conn)?;
    let latest = latest_version();
    if current_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current_version,
            latest_supported: latest,
        });
    }

    conn.execute_batch(LEDGER_SQL)?;

    let mut report = MigrationReport::default();
    for migration in MIGRATIONS {
        let started_at = Instant::now();
        match apply_one(conn, migration) {
            Ok(StepOutcome::Applied) => {
                info!(
                    "event=migration_apply module=db status=ok version={} name={} duration_ms={}",
                    migration.version,
                    migration.name,
                    started_at.elapsed().as_millis()
                );
                report.applied.push(migration.version);
            }
            Ok(StepOutcome::AlreadyApplied) => report.already_applied.push(migration.version),
            Err(err) => {
                error!(
                    "event=migration_apply module=db status=error version={} name={} duration_ms={} error={}",
                    migration.version,
                    migration.name,
                    started_at.elapsed().as_millis(),
                    err
                );
                report.failed.push(MigrationError {
                    version: migration.version,
                    name: migration.name,
                    message: err.to_string(),
                });
            }
        }
    }

    if report.is_degraded() {
        warn!(
            "event=migrations module=db status=degraded failed={} applied={}",
            report.failed.len(),
            report.applied.len()
        );
    }

    Ok(report)
}

/// Returns whether `version` is recorded as applied.
pub fn is_applied(conn: &Connection, version: u32) -> DbResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM schema_migrations WHERE version = ?1;",
            [version],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn apply_one(conn: &mut Connection, migration: &Migration) -> DbResult<StepOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    if is_applied(&tx, migration.version)? {
        return Ok(StepOutcome::AlreadyApplied);
    }

    match migration.step {
        MigrationStep::Batch(sql) => tx.execute_batch(sql)?,
        MigrationStep::AddColumn {
            table,
            column,
            definition,
            backfill,
        } => {
            if !column_exists(&tx, table, column)? {
                tx.execute_batch(&format!(
                    "ALTER TABLE {table} ADD COLUMN {column} {definition};"
                ))?;
            }
            if let Some(value) = backfill {
                tx.execute(
                    &format!("UPDATE {table} SET {column} = {value} WHERE {column} IS NULL;"),
                    [],
                )?;
            }
        }
    }

    tx.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (?1, ?2);",
        params![migration.version, migration.name],
    )?;
    let recorded = current_user_version(&tx)?;
    if migration.version > recorded {
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }
    tx.commit()?;

    Ok(StepOutcome::Applied)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> DbResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2;",
        params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::{apply_migrations, column_exists, is_applied, latest_version, MIGRATIONS};
    use crate::db::DbError;
    use rusqlite::Connection;

    #[test]
    fn versions_are_strictly_increasing() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
    }

    #[test]
    fn second_run_applies_nothing() {
        let mut conn = Connection::open_in_memory().unwrap();
        let first = apply_migrations(&mut conn).unwrap();
        assert_eq!(first.applied.len(), MIGRATIONS.len());
        assert!(!first.is_degraded());

        let second = apply_migrations(&mut conn).unwrap();
        assert!(second.applied.is_empty());
        assert_eq!(second.already_applied.len(), MIGRATIONS.len());
        assert!(second.ensure_complete().is_ok());
    }

    #[test]
    fn add_column_tolerates_pre_existing_column() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(include_str!("0001_core_tables.sql"))
            .unwrap();
        conn.execute_batch("ALTER TABLE tasks ADD COLUMN campaign TEXT;")
            .unwrap();
        conn.execute_batch(
            "INSERT INTO users (id, display_name) VALUES ('u1', 'Ada');
             INSERT INTO tasks (id, user_id, title) VALUES ('t1', 'u1', 'legacy');",
        )
        .unwrap();

        let report = apply_migrations(&mut conn).unwrap();
        assert!(!report.is_degraded(), "{:?}", report.failed);
        assert!(is_applied(&conn, 2).unwrap());
        assert!(column_exists(&conn, "tasks", "campaign").unwrap());

        let campaign: String = conn
            .query_row("SELECT campaign FROM tasks WHERE id = 't1';", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(campaign, "unassigned");
    }

    #[test]
    fn failed_step_is_reported_and_later_steps_still_run() {
        let mut conn = Connection::open_in_memory().unwrap();
        // A view named `users` makes the ALTER TABLE step fail on its own.
        conn.execute_batch("CREATE VIEW users AS SELECT 1 AS id;")
            .unwrap();

        let report = apply_migrations(&mut conn).unwrap();
        assert!(report.is_degraded());
        assert!(report.failed.iter().any(|failure| failure.version == 3));
        assert!(report.applied.contains(&6));
        assert!(!is_applied(&conn, 3).unwrap());
        assert!(latest_version() >= 6);
        assert!(matches!(
            report.ensure_complete(),
            Err(DbError::Migration(failure)) if failure.version == 3
        ));
    }
}
