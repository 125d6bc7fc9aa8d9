//! Last known connection state per external source.
//!
//! Rows outlive the process so a later run can report a source that still
//! needs reconnecting. One row per source kind; writes replace it.

use crate::model::task::SourceKind;
use crate::repo::task_repo::{RepoError, RepoResult};
use rusqlite::{params, Connection};

/// Stored form of a source status. `state` is `connected` or
/// `needs_reconnect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStatusRecord {
    pub source: SourceKind,
    pub state: String,
    pub reason: Option<String>,
    pub updated_at_ms: i64,
}

pub trait SourceStatusRepository {
    fn save_status(&self, record: &SourceStatusRecord) -> RepoResult<()>;
    fn load_status(&self, source: SourceKind) -> RepoResult<Option<SourceStatusRecord>>;
}

pub struct SqliteSourceStatusRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSourceStatusRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl SourceStatusRepository for SqliteSourceStatusRepository<'_> {
    fn save_status(&self, record: &SourceStatusRecord) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO source_status (source_kind, state, reason, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(source_kind) DO UPDATE SET
                state = excluded.state,
                reason = excluded.reason,
                updated_at = excluded.updated_at;",
            params![
                record.source.as_str(),
                record.state.as_str(),
                record.reason.as_deref(),
                record.updated_at_ms,
            ],
        )?;
        Ok(())
    }

    fn load_status(&self, source: SourceKind) -> RepoResult<Option<SourceStatusRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_kind, state, reason, updated_at
             FROM source_status WHERE source_kind = ?1;",
        )?;
        let mut rows = stmt.query([source.as_str()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let raw_source: String = row.get("source_kind")?;
        let source = SourceKind::parse(&raw_source)
            .ok_or_else(|| RepoError::InvalidData(format!("unknown source `{raw_source}`")))?;
        Ok(Some(SourceStatusRecord {
            source,
            state: row.get("state")?,
            reason: row.get("reason")?,
            updated_at_ms: row.get("updated_at")?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::{SourceStatusRecord, SourceStatusRepository, SqliteSourceStatusRepository};
    use crate::db::open_db_in_memory;
    use crate::model::task::SourceKind;

    #[test]
    fn save_replaces_previous_row() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteSourceStatusRepository::new(&conn);
        assert_eq!(repo.load_status(SourceKind::Notion).unwrap(), None);

        repo.save_status(&SourceStatusRecord {
            source: SourceKind::Notion,
            state: "needs_reconnect".to_string(),
            reason: Some("unauthorized".to_string()),
            updated_at_ms: 10,
        })
        .unwrap();
        let connected = SourceStatusRecord {
            source: SourceKind::Notion,
            state: "connected".to_string(),
            reason: None,
            updated_at_ms: 20,
        };
        repo.save_status(&connected).unwrap();

        assert_eq!(repo.load_status(SourceKind::Notion).unwrap(), Some(connected));
        assert_eq!(repo.load_status(SourceKind::GoogleCalendar).unwrap(), None);
    }
}
