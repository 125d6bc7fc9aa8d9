//! Idempotent merge of fetched remote records into the task store.
//!
//! # Responsibility
//! - Create tasks for unseen external identities and refresh the remote
//!   projection (title, due) of known ones.
//! - Remove imported tasks whose identities vanished, only when asked.
//! - Purge only judges imports whose due falls inside the fetched window.
//!
//! # Invariants
//! - Each record is applied in its own immediate transaction; earlier
//!   records stay committed if a later one fails.
//! - Completion, gold and recycled state are never written here.
//! - A create that loses the external-identity race is turned into an update
//!   of the winning row.
//! - Date-only values resolve in the owning user's zone.

use crate::model::task::{ExternalOrigin, SourceKind, Task, TaskDue, TaskId, UserId};
use crate::model::user::DEFAULT_TIME_ZONE;
use crate::repo::task_repo::{RepoError, SqliteTaskRepository, TaskRepository};
use crate::repo::user_repo::{SqliteUserRepository, UserRepository};
use crate::sync::adapter::RemoteRecord;
use crate::sync::date::{normalize_due, parse_time_zone};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use log::{info, warn};
use rusqlite::{Connection, TransactionBehavior};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

const UNTITLED: &str = "Untitled";

#[derive(Debug)]
pub enum SyncError {
    Repo(RepoError),
    UserNotFound(UserId),
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::UserNotFound(id) => write!(f, "user not found: {id}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::UserNotFound(_) => None,
        }
    }
}

impl From<RepoError> for SyncError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(value.into())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Per-call reconciliation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
    /// Records not applied: blank external id or a different source.
    pub skipped: u32,
    /// Records applied without a due because their due could not be parsed.
    pub normalization_skipped: u32,
}

impl ReconcileSummary {
    pub fn merge(&mut self, other: ReconcileSummary) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.normalization_skipped += other.normalization_skipped;
    }

    pub fn applied(&self) -> u32 {
        self.created + self.updated + self.unchanged
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgedTask {
    pub task_id: TaskId,
    pub external_id: String,
    pub title: String,
}

/// Rows removed by one purge call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub source: Option<SourceKind>,
    pub removed: Vec<PurgedTask>,
    /// Unseen imports kept because their due lies outside the fetch window.
    pub kept_outside_window: u32,
}

/// Due range a fetch covered, as epoch milliseconds. `start` is inclusive,
/// `end` exclusive; a missing bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DueWindow {
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
}

impl DueWindow {
    pub fn between(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self {
            start_ms: start.map(|at| at.timestamp_millis()),
            end_ms: end.map(|at| at.timestamp_millis()),
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.start_ms.is_some() || self.end_ms.is_some()
    }

    /// Tasks without a due are always covered.
    pub fn covers(&self, due_at_ms: Option<i64>) -> bool {
        let Some(at) = due_at_ms else {
            return true;
        };
        self.start_ms.map_or(true, |start| at >= start)
            && self.end_ms.map_or(true, |end| at < end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Created,
    Updated,
    Unchanged,
}

pub struct SyncReconciler<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> SyncReconciler<'conn> {
    pub fn new(conn: &'conn mut Connection) -> Self {
        Self { conn }
    }

    /// Merges `records` from `source` into `user_id`'s tasks.
    pub fn reconcile(
        &mut self,
        user_id: UserId,
        source: SourceKind,
        records: &[RemoteRecord],
    ) -> SyncResult<ReconcileSummary> {
        let zone = self.user_zone(user_id)?;
        let mut summary = ReconcileSummary::default();

        for record in records {
            let external_id = record.external_id.trim();
            if record.source != source || external_id.is_empty() {
                warn!(
                    "event=reconcile_record module=sync status=skipped source={} record_source={} reason={}",
                    source,
                    record.source,
                    if external_id.is_empty() { "blank_external_id" } else { "source_mismatch" }
                );
                summary.skipped += 1;
                continue;
            }

            let normalized = record.due.as_ref().map(|due| normalize_due(due, zone));
            let due_unparsed = matches!(normalized, Some(None));
            if due_unparsed {
                summary.normalization_skipped += 1;
                info!(
                    "event=reconcile_record module=sync status=degraded source={source} external_id={external_id} reason=unparsed_due"
                );
            }

            let outcome = self.apply_record(
                user_id,
                source,
                external_id,
                record,
                normalized.flatten(),
                due_unparsed,
            )?;
            match outcome {
                Outcome::Created => summary.created += 1,
                Outcome::Updated => summary.updated += 1,
                Outcome::Unchanged => summary.unchanged += 1,
            }
        }

        info!(
            "event=reconcile module=sync status=ok source={} user_id={} created={} updated={} unchanged={} skipped={} normalization_skipped={}",
            source,
            user_id,
            summary.created,
            summary.updated,
            summary.unchanged,
            summary.skipped,
            summary.normalization_skipped
        );
        Ok(summary)
    }

    /// Hard-deletes `user_id`'s tasks from `source` whose external id is not
    /// in `latest_ids`. Recycled imports are included.
    pub fn purge(
        &mut self,
        user_id: UserId,
        source: SourceKind,
        latest_ids: &HashSet<String>,
    ) -> SyncResult<PurgeReport> {
        self.purge_within(user_id, source, latest_ids, DueWindow::default())
    }

    /// Like [`SyncReconciler::purge`], but unseen imports whose due lies
    /// outside `window` are kept.
    pub fn purge_within(
        &mut self,
        user_id: UserId,
        source: SourceKind,
        latest_ids: &HashSet<String>,
        window: DueWindow,
    ) -> SyncResult<PurgeReport> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let repo = SqliteTaskRepository::new(&tx);
        let mut removed = Vec::new();
        let mut kept_outside_window = 0;

        for link in repo.list_external_links(user_id, source)? {
            if latest_ids.contains(link.external_id.trim()) {
                continue;
            }
            if !window.covers(link.due_at_ms) {
                kept_outside_window += 1;
                continue;
            }
            repo.delete_task(link.task_id)?;
            info!(
                "event=purge_task module=sync status=ok source={} task_id={} external_id={} recycled={}",
                source, link.task_id, link.external_id, link.is_recycled
            );
            removed.push(PurgedTask {
                task_id: link.task_id,
                external_id: link.external_id,
                title: link.title,
            });
        }
        tx.commit()?;

        info!(
            "event=purge module=sync status=ok source={} user_id={} removed={} kept={} kept_outside_window={} windowed={}",
            source,
            user_id,
            removed.len(),
            latest_ids.len(),
            kept_outside_window,
            window.is_bounded()
        );
        Ok(PurgeReport {
            source: Some(source),
            removed,
            kept_outside_window,
        })
    }

    fn user_zone(&self, user_id: UserId) -> SyncResult<Tz> {
        let user = SqliteUserRepository::new(&*self.conn)
            .get_user(user_id)?
            .ok_or(SyncError::UserNotFound(user_id))?;
        match parse_time_zone(&user.time_zone) {
            Ok(zone) => Ok(zone),
            Err(err) => {
                warn!(
                    "event=reconcile module=sync status=degraded user_id={user_id} reason=invalid_time_zone fallback={DEFAULT_TIME_ZONE} error={err}"
                );
                Ok(Tz::UTC)
            }
        }
    }

    fn apply_record(
        &mut self,
        user_id: UserId,
        source: SourceKind,
        external_id: &str,
        record: &RemoteRecord,
        due: Option<TaskDue>,
        due_unparsed: bool,
    ) -> SyncResult<Outcome> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let repo = SqliteTaskRepository::new(&tx);

        let outcome = match repo.find_by_external(user_id, source, external_id)? {
            Some(existing) => refresh(&repo, &existing, record, due, due_unparsed)?,
            None => {
                let title = match record.title.trim() {
                    "" => UNTITLED,
                    title => title,
                };
                let mut task =
                    Task::imported(user_id, ExternalOrigin::new(source, external_id), title);
                task.due = due.clone();
                task.duration_minutes = record.duration_minutes.unwrap_or(0);

                match repo.create_task(&task) {
                    Ok(_) => Outcome::Created,
                    Err(RepoError::DuplicateExternalId { .. }) => {
                        warn!(
                            "event=reconcile_record module=sync status=error reason=duplicate_external_id source={source} external_id={external_id}"
                        );
                        let existing = repo
                            .find_by_external(user_id, source, external_id)?
                            .ok_or_else(|| RepoError::DuplicateExternalId {
                                source,
                                external_id: external_id.to_string(),
                            })?;
                        refresh(&repo, &existing, record, due, due_unparsed)?
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };
        tx.commit()?;
        Ok(outcome)
    }
}

/// Rewrites the projection of `existing` when title or due changed.
fn refresh(
    repo: &SqliteTaskRepository<'_>,
    existing: &Task,
    record: &RemoteRecord,
    due: Option<TaskDue>,
    due_unparsed: bool,
) -> SyncResult<Outcome> {
    let title = match record.title.trim() {
        "" => existing.title.as_str(),
        title => title,
    };
    // An unparsable due keeps whatever was stored; an absent due clears it.
    let due = if due_unparsed { existing.due.clone() } else { due };

    if title == existing.title && due == existing.due {
        return Ok(Outcome::Unchanged);
    }
    repo.update_projection(existing.id, title, due.as_ref())?;
    Ok(Outcome::Updated)
}

#[cfg(test)]
mod tests {
    use super::{DueWindow, ReconcileSummary, SyncError, SyncReconciler};
    use crate::db::open_db_in_memory;
    use crate::model::task::SourceKind;
    use crate::model::user::User;
    use crate::repo::task_repo::{SqliteTaskRepository, TaskListQuery, TaskRepository};
    use crate::repo::user_repo::{SqliteUserRepository, UserRepository};
    use crate::sync::adapter::RemoteRecord;
    use crate::sync::date::RemoteDue;
    use std::collections::HashSet;
    use uuid::Uuid;

    fn record(external_id: &str, title: &str, due: Option<&str>) -> RemoteRecord {
        RemoteRecord {
            source: SourceKind::Notion,
            external_id: external_id.to_string(),
            title: title.to_string(),
            due: due.map(|raw| RemoteDue::parse(raw, None)),
            duration_minutes: Some(30),
        }
    }

    #[test]
    fn duplicate_ids_in_one_batch_create_one_task() {
        let mut conn = open_db_in_memory().unwrap();
        let user = User::new("ada");
        SqliteUserRepository::new(&conn).create_user(&user).unwrap();

        let batch = vec![
            record("page-1", "Write report", Some("2024-06-15")),
            record("page-1", "Write report", Some("2024-06-15")),
        ];
        let summary = SyncReconciler::new(&mut conn)
            .reconcile(user.id, SourceKind::Notion, &batch)
            .unwrap();

        assert_eq!(summary.created, 1);
        assert_eq!(summary.unchanged, 1);
        let tasks = SqliteTaskRepository::new(&conn)
            .list_tasks(&TaskListQuery::default())
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].duration_minutes, 30);
    }

    #[test]
    fn skips_blank_ids_and_foreign_records() {
        let mut conn = open_db_in_memory().unwrap();
        let user = User::new("ada");
        SqliteUserRepository::new(&conn).create_user(&user).unwrap();

        let mut foreign = record("evt-1", "Standup", None);
        foreign.source = SourceKind::GoogleCalendar;
        let batch = vec![record("  ", "Blank", None), foreign];

        let summary = SyncReconciler::new(&mut conn)
            .reconcile(user.id, SourceKind::Notion, &batch)
            .unwrap();
        assert_eq!(
            summary,
            ReconcileSummary {
                skipped: 2,
                ..ReconcileSummary::default()
            }
        );
    }

    #[test]
    fn unparsed_due_imports_without_due() {
        let mut conn = open_db_in_memory().unwrap();
        let user = User::new("ada");
        SqliteUserRepository::new(&conn).create_user(&user).unwrap();

        let summary = SyncReconciler::new(&mut conn)
            .reconcile(user.id, SourceKind::Notion, &[record("page-1", "Plan", Some("someday"))])
            .unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.normalization_skipped, 1);

        let task = SqliteTaskRepository::new(&conn)
            .find_by_external(user.id, SourceKind::Notion, "page-1")
            .unwrap()
            .unwrap();
        assert!(task.due.is_none());
    }

    #[test]
    fn unknown_user_is_rejected() {
        let mut conn = open_db_in_memory().unwrap();
        let result = SyncReconciler::new(&mut conn).reconcile(
            Uuid::new_v4(),
            SourceKind::Notion,
            &[record("page-1", "Plan", None)],
        );
        assert!(matches!(result, Err(SyncError::UserNotFound(_))));
    }

    #[test]
    fn purge_with_empty_latest_set_removes_all_imports_of_source() {
        let mut conn = open_db_in_memory().unwrap();
        let user = User::new("ada");
        SqliteUserRepository::new(&conn).create_user(&user).unwrap();
        SyncReconciler::new(&mut conn)
            .reconcile(
                user.id,
                SourceKind::Notion,
                &[record("page-1", "A", None), record("page-2", "B", None)],
            )
            .unwrap();

        let report = SyncReconciler::new(&mut conn)
            .purge(user.id, SourceKind::Notion, &HashSet::new())
            .unwrap();
        assert_eq!(report.removed.len(), 2);
        assert_eq!(report.source, Some(SourceKind::Notion));
    }

    #[test]
    fn window_bounds_are_start_inclusive_end_exclusive() {
        let window = DueWindow {
            start_ms: Some(1_000),
            end_ms: Some(2_000),
        };
        assert!(window.covers(None));
        assert!(window.covers(Some(1_000)));
        assert!(!window.covers(Some(999)));
        assert!(!window.covers(Some(2_000)));
        assert!(DueWindow::default().covers(Some(i64::MIN)));
        assert!(!DueWindow::default().is_bounded());
    }

    #[test]
    fn windowed_purge_keeps_unseen_imports_due_outside_window() {
        let mut conn = open_db_in_memory().unwrap();
        let user = User::new("ada");
        SqliteUserRepository::new(&conn).create_user(&user).unwrap();
        SyncReconciler::new(&mut conn)
            .reconcile(
                user.id,
                SourceKind::Notion,
                &[
                    record("page-old", "Old", Some("2024-01-01T09:00:00Z")),
                    record("page-undated", "Undated", None),
                ],
            )
            .unwrap();

        let window = DueWindow::between(
            Some("2024-02-01T00:00:00Z".parse().unwrap()),
            Some("2024-03-01T00:00:00Z".parse().unwrap()),
        );
        let report = SyncReconciler::new(&mut conn)
            .purge_within(user.id, SourceKind::Notion, &HashSet::new(), window)
            .unwrap();

        assert_eq!(report.kept_outside_window, 1);
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.removed[0].external_id, "page-undated");
    }
}
