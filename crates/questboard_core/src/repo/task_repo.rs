//! Task repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD, completion and external-identity lookups over `tasks`.
//! - Keep SQL details inside the core persistence boundary.
//!
//! # Invariants
//! - Write paths call `Task::validate()` before SQL mutations.
//! - Completion is a conditional update: a task already completed is never
//!   rewritten, so concurrent completions award at most once.
//! - Projection updates touch only title and due columns.
//! - A unique violation on external identity surfaces as
//!   `RepoError::DuplicateExternalId`; the existing row wins.

use crate::db::DbError;
use crate::model::skill::SkillId;
use crate::model::task::{
    ExternalOrigin, ImportanceTier, SourceKind, Task, TaskDue, TaskId, TaskValidationError, UserId,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const TASK_SELECT_SQL: &str = "SELECT
    id,
    user_id,
    title,
    description,
    importance,
    duration_minutes,
    due_at,
    due_time_zone,
    due_all_day,
    scheduled_at,
    is_recycled,
    campaign,
    source_kind,
    external_id,
    gold_reward,
    completed_at
FROM tasks";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error shared by task, user and skill persistence.
#[derive(Debug)]
pub enum RepoError {
    Validation(TaskValidationError),
    Db(DbError),
    NotFound(Uuid),
    InvalidData(String),
    /// Another live task already holds this external identity.
    DuplicateExternalId {
        source: SourceKind,
        external_id: String,
    },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "record not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::DuplicateExternalId {
                source,
                external_id,
            } => write!(
                f,
                "a task already exists for {source} external id `{external_id}`"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound(_) | Self::InvalidData(_) | Self::DuplicateExternalId { .. } => None,
        }
    }
}

impl From<TaskValidationError> for RepoError {
    fn from(value: TaskValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Query options for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskListQuery {
    pub user_id: Option<UserId>,
    pub source: Option<SourceKind>,
    pub include_recycled: bool,
    /// `Some(true)` for completed only, `Some(false)` for open only.
    pub completed: Option<bool>,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Active-vs-recycled counters for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub active: u64,
    pub recycled: u64,
    /// Completed tasks among the active ones.
    pub completed: u64,
}

/// Lightweight view of an imported task used by purge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalLink {
    pub task_id: TaskId,
    pub external_id: String,
    pub title: String,
    pub due_at_ms: Option<i64>,
    pub is_recycled: bool,
}

/// Repository interface for task persistence.
pub trait TaskRepository {
    fn create_task(&self, task: &Task) -> RepoResult<TaskId>;
    /// Updates user-editable fields. Completion, recycle and origin columns
    /// are left alone.
    fn update_task(&self, task: &Task) -> RepoResult<()>;
    fn get_task(&self, id: TaskId, include_recycled: bool) -> RepoResult<Option<Task>>;
    fn list_tasks(&self, query: &TaskListQuery) -> RepoResult<Vec<Task>>;
    /// Finds the task bound to an external identity, preferring a live row
    /// over a recycled one.
    fn find_by_external(
        &self,
        user_id: UserId,
        source: SourceKind,
        external_id: &str,
    ) -> RepoResult<Option<Task>>;
    /// Rewrites the remotely sourced projection (title and due fields).
    fn update_projection(&self, id: TaskId, title: &str, due: Option<&TaskDue>) -> RepoResult<()>;
    /// Sets completion fields when the task is still open and live.
    ///
    /// Returns `false` when another writer completed it first.
    fn mark_completed(&self, id: TaskId, gold: i64, completed_at_ms: i64) -> RepoResult<bool>;
    fn recycle_task(&self, id: TaskId) -> RepoResult<()>;
    fn restore_task(&self, id: TaskId) -> RepoResult<()>;
    /// Hard-deletes a task row.
    fn delete_task(&self, id: TaskId) -> RepoResult<()>;
    fn list_external_links(
        &self,
        user_id: UserId,
        source: SourceKind,
    ) -> RepoResult<Vec<ExternalLink>>;
    fn task_counts(&self, user_id: UserId) -> RepoResult<TaskCounts>;
    fn link_skill(&self, task_id: TaskId, skill_id: SkillId) -> RepoResult<()>;
    fn linked_skills(&self, task_id: TaskId) -> RepoResult<Vec<SkillId>>;
}

/// SQLite-backed task repository.
pub struct SqliteTaskRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTaskRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl TaskRepository for SqliteTaskRepository<'_> {
    fn create_task(&self, task: &Task) -> RepoResult<TaskId> {
        task.validate()?;
        let due = task.due.as_ref();

        let inserted = self.conn.execute(
            "INSERT INTO tasks (
                id,
                user_id,
                title,
                description,
                importance,
                duration_minutes,
                due_at,
                due_time_zone,
                due_all_day,
                scheduled_at,
                is_recycled,
                campaign,
                source_kind,
                external_id,
                gold_reward,
                completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16);",
            params![
                task.id.to_string(),
                task.user_id.to_string(),
                task.title.as_str(),
                task.description.as_str(),
                task.importance.map(ImportanceTier::as_str),
                task.duration_minutes,
                due.map(|value| value.at_ms),
                due.map(|value| value.time_zone.as_str()),
                bool_to_int(due.is_some_and(|value| value.all_day)),
                task.scheduled_at_ms,
                bool_to_int(task.is_recycled),
                task.campaign.as_str(),
                task.origin.as_ref().map(|origin| origin.source.as_str()),
                task.origin.as_ref().map(|origin| origin.external_id.as_str()),
                task.gold_reward,
                task.completed_at_ms,
            ],
        );

        match inserted {
            Ok(_) => Ok(task.id),
            Err(err) if is_unique_violation(&err) && task.origin.is_some() => {
                Err(duplicate_external_id(task.origin.as_ref()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn update_task(&self, task: &Task) -> RepoResult<()> {
        task.validate()?;
        let due = task.due.as_ref();

        let changed = self.conn.execute(
            "UPDATE tasks
             SET
                title = ?1,
                description = ?2,
                importance = ?3,
                duration_minutes = ?4,
                due_at = ?5,
                due_time_zone = ?6,
                due_all_day = ?7,
                scheduled_at = ?8,
                campaign = ?9,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?10;",
            params![
                task.title.as_str(),
                task.description.as_str(),
                task.importance.map(ImportanceTier::as_str),
                task.duration_minutes,
                due.map(|value| value.at_ms),
                due.map(|value| value.time_zone.as_str()),
                bool_to_int(due.is_some_and(|value| value.all_day)),
                task.scheduled_at_ms,
                task.campaign.as_str(),
                task.id.to_string(),
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(task.id));
        }
        Ok(())
    }

    fn get_task(&self, id: TaskId, include_recycled: bool) -> RepoResult<Option<Task>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TASK_SELECT_SQL}
             WHERE id = ?1
               AND (?2 = 1 OR is_recycled = 0);"
        ))?;

        let mut rows = stmt.query(params![id.to_string(), bool_to_int(include_recycled)])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_task_row(row)?));
        }
        Ok(None)
    }

    fn list_tasks(&self, query: &TaskListQuery) -> RepoResult<Vec<Task>> {
        let mut sql = format!("{TASK_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if !query.include_recycled {
            sql.push_str(" AND is_recycled = 0");
        }
        if let Some(user_id) = query.user_id {
            sql.push_str(" AND user_id = ?");
            bind_values.push(Value::Text(user_id.to_string()));
        }
        if let Some(source) = query.source {
            sql.push_str(" AND source_kind = ?");
            bind_values.push(Value::Text(source.as_str().to_string()));
        }
        match query.completed {
            Some(true) => sql.push_str(" AND completed_at IS NOT NULL"),
            Some(false) => sql.push_str(" AND completed_at IS NULL"),
            None => {}
        }

        sql.push_str(" ORDER BY due_at IS NULL, due_at ASC, created_at ASC, id ASC");

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            tasks.push(parse_task_row(row)?);
        }
        Ok(tasks)
    }

    fn find_by_external(
        &self,
        user_id: UserId,
        source: SourceKind,
        external_id: &str,
    ) -> RepoResult<Option<Task>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TASK_SELECT_SQL}
             WHERE user_id = ?1
               AND source_kind = ?2
               AND external_id = ?3
             ORDER BY is_recycled ASC, created_at ASC
             LIMIT 1;"
        ))?;

        let mut rows = stmt.query(params![user_id.to_string(), source.as_str(), external_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_task_row(row)?));
        }
        Ok(None)
    }

    fn update_projection(&self, id: TaskId, title: &str, due: Option<&TaskDue>) -> RepoResult<()> {
        if title.trim().is_empty() {
            return Err(TaskValidationError::BlankTitle.into());
        }
        let changed = self.conn.execute(
            "UPDATE tasks
             SET
                title = ?1,
                due_at = ?2,
                due_time_zone = ?3,
                due_all_day = ?4,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?5;",
            params![
                title,
                due.map(|value| value.at_ms),
                due.map(|value| value.time_zone.as_str()),
                bool_to_int(due.is_some_and(|value| value.all_day)),
                id.to_string(),
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }

    fn mark_completed(&self, id: TaskId, gold: i64, completed_at_ms: i64) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE tasks
             SET
                gold_reward = ?1,
                completed_at = ?2,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?3
               AND completed_at IS NULL
               AND is_recycled = 0;",
            params![gold, completed_at_ms, id.to_string()],
        )?;
        Ok(changed == 1)
    }

    fn recycle_task(&self, id: TaskId) -> RepoResult<()> {
        self.set_recycled(id, true)
    }

    fn restore_task(&self, id: TaskId) -> RepoResult<()> {
        match self.set_recycled(id, false) {
            Err(RepoError::Db(DbError::Sqlite(err))) if is_unique_violation(&err) => {
                let origin = self
                    .get_task(id, true)?
                    .and_then(|task| task.origin);
                Err(duplicate_external_id(origin.as_ref()))
            }
            other => other,
        }
    }

    fn delete_task(&self, id: TaskId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }

    fn list_external_links(
        &self,
        user_id: UserId,
        source: SourceKind,
    ) -> RepoResult<Vec<ExternalLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, external_id, title, due_at, is_recycled
             FROM tasks
             WHERE user_id = ?1
               AND source_kind = ?2
               AND external_id IS NOT NULL
             ORDER BY created_at ASC, id ASC;",
        )?;
        let mut rows = stmt.query(params![user_id.to_string(), source.as_str()])?;
        let mut links = Vec::new();
        while let Some(row) = rows.next()? {
            links.push(ExternalLink {
                task_id: parse_uuid(row, "id")?,
                external_id: row.get("external_id")?,
                title: row.get("title")?,
                due_at_ms: row.get("due_at")?,
                is_recycled: parse_bool(row, "is_recycled")?,
            });
        }
        Ok(links)
    }

    fn task_counts(&self, user_id: UserId) -> RepoResult<TaskCounts> {
        let counts = self.conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN is_recycled = 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN is_recycled = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN is_recycled = 0 AND completed_at IS NOT NULL THEN 1 ELSE 0 END), 0)
             FROM tasks
             WHERE user_id = ?1;",
            [user_id.to_string()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )?;

        Ok(TaskCounts {
            active: non_negative(counts.0, "active count")?,
            recycled: non_negative(counts.1, "recycled count")?,
            completed: non_negative(counts.2, "completed count")?,
        })
    }

    fn link_skill(&self, task_id: TaskId, skill_id: SkillId) -> RepoResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO task_skills (task_id, skill_id) VALUES (?1, ?2);",
            params![task_id.to_string(), skill_id.to_string()],
        )?;
        Ok(())
    }

    fn linked_skills(&self, task_id: TaskId) -> RepoResult<Vec<SkillId>> {
        let mut stmt = self.conn.prepare(
            "SELECT skill_id FROM task_skills WHERE task_id = ?1 ORDER BY skill_id ASC;",
        )?;
        let mut rows = stmt.query([task_id.to_string()])?;
        let mut skills = Vec::new();
        while let Some(row) = rows.next()? {
            skills.push(parse_uuid(row, "skill_id")?);
        }
        Ok(skills)
    }
}

impl SqliteTaskRepository<'_> {
    fn set_recycled(&self, id: TaskId, recycled: bool) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE tasks
             SET
                is_recycled = ?1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?2;",
            params![bool_to_int(recycled), id.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }
}

fn parse_task_row(row: &Row<'_>) -> RepoResult<Task> {
    let importance = match row.get::<_, Option<String>>("importance")? {
        Some(label) => Some(ImportanceTier::parse(&label).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid importance `{label}` in tasks.importance"))
        })?),
        None => None,
    };

    let due = match (
        row.get::<_, Option<i64>>("due_at")?,
        row.get::<_, Option<String>>("due_time_zone")?,
    ) {
        (Some(at_ms), Some(time_zone)) => Some(TaskDue {
            at_ms,
            time_zone,
            all_day: parse_bool(row, "due_all_day")?,
        }),
        (None, _) => None,
        (Some(_), None) => {
            return Err(RepoError::InvalidData(
                "tasks.due_at is set without tasks.due_time_zone".to_string(),
            ));
        }
    };

    let origin = match (
        row.get::<_, Option<String>>("source_kind")?,
        row.get::<_, Option<String>>("external_id")?,
    ) {
        (Some(kind), Some(external_id)) => {
            let source = SourceKind::parse(&kind).ok_or_else(|| {
                RepoError::InvalidData(format!("invalid source kind `{kind}` in tasks.source_kind"))
            })?;
            Some(ExternalOrigin::new(source, external_id))
        }
        _ => None,
    };

    let duration: i64 = row.get("duration_minutes")?;
    let duration_minutes = u32::try_from(duration).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid duration `{duration}` in tasks.duration_minutes"
        ))
    })?;

    let task = Task {
        id: parse_uuid(row, "id")?,
        user_id: parse_uuid(row, "user_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        importance,
        duration_minutes,
        due,
        scheduled_at_ms: row.get("scheduled_at")?,
        is_recycled: parse_bool(row, "is_recycled")?,
        campaign: row.get("campaign")?,
        origin,
        gold_reward: row.get("gold_reward")?,
        completed_at_ms: row.get("completed_at")?,
    };
    task.validate()?;
    Ok(task)
}

pub(crate) fn parse_uuid(row: &Row<'_>, column: &str) -> RepoResult<Uuid> {
    let text: String = row.get(column)?;
    Uuid::parse_str(&text)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{text}` in {column}")))
}

fn parse_bool(row: &Row<'_>, column: &str) -> RepoResult<bool> {
    match row.get::<_, i64>(column)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}

fn non_negative(value: i64, what: &str) -> RepoResult<u64> {
    u64::try_from(value).map_err(|_| RepoError::InvalidData(format!("negative {what}: {value}")))
}

fn duplicate_external_id(origin: Option<&ExternalOrigin>) -> RepoError {
    match origin {
        Some(origin) => RepoError::DuplicateExternalId {
            source: origin.source,
            external_id: origin.external_id.clone(),
        },
        None => RepoError::InvalidData("unique constraint violated on tasks".to_string()),
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
