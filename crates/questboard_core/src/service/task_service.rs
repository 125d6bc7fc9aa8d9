//! Task use-case service.
//!
//! # Responsibility
//! - Create, edit, recycle and list tasks on behalf of a user.
//! - Complete tasks: compute gold, credit the user, award skill experience.
//!
//! # Invariants
//! - Completion runs in one immediate transaction; the conditional
//!   `mark_completed` update is the per-task guard, so a duplicate request
//!   awards nothing.
//! - The gold shown as a preview and the gold awarded come from the same
//!   `compute_gold` call shape.
//! - Experience awarded per linked skill equals the gold earned.

use crate::engine::progression::SkillAward;
use crate::engine::reward::{compute_gold, RewardError};
use crate::model::skill::SkillId;
use crate::model::task::{Task, TaskId, UserId};
use crate::repo::task_repo::{
    RepoError, SqliteTaskRepository, TaskCounts, TaskListQuery, TaskRepository,
};
use crate::repo::user_repo::{SqliteUserRepository, UserRepository};
use crate::service::progression_service::{award_experience_in, ProgressionServiceError};
use log::{info, warn};
use rusqlite::{Connection, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum TaskServiceError {
    Reward(RewardError),
    Progression(ProgressionServiceError),
    Repo(RepoError),
    TaskNotFound(TaskId),
    UserNotFound(UserId),
}

impl Display for TaskServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reward(err) => write!(f, "{err}"),
            Self::Progression(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::TaskNotFound(id) => write!(f, "task not found: {id}"),
            Self::UserNotFound(id) => write!(f, "user not found: {id}"),
        }
    }
}

impl Error for TaskServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Reward(err) => Some(err),
            Self::Progression(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::TaskNotFound(_) | Self::UserNotFound(_) => None,
        }
    }
}

impl From<RewardError> for TaskServiceError {
    fn from(value: RewardError) -> Self {
        Self::Reward(value)
    }
}

impl From<ProgressionServiceError> for TaskServiceError {
    fn from(value: ProgressionServiceError) -> Self {
        Self::Progression(value)
    }
}

impl From<RepoError> for TaskServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<rusqlite::Error> for TaskServiceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(value.into())
    }
}

pub type TaskServiceResult<T> = Result<T, TaskServiceError>;

/// What a successful completion awarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionReceipt {
    pub task_id: TaskId,
    pub gold: i64,
    pub gold_balance: i64,
    pub skill_awards: Vec<(SkillId, SkillAward)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Completed(CompletionReceipt),
    /// The task was already completed; nothing was awarded.
    AlreadyCompleted { gold: Option<i64> },
}

pub struct TaskService<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> TaskService<'conn> {
    pub fn new(conn: &'conn mut Connection) -> Self {
        Self { conn }
    }

    /// Gold the task would earn if completed now.
    pub fn preview_gold(task: &Task) -> Result<u64, RewardError> {
        compute_gold(task.importance, f64::from(task.duration_minutes))
    }

    /// Creates a task and links it to the given skills.
    pub fn create_task(&mut self, task: &Task, skills: &[SkillId]) -> TaskServiceResult<TaskId> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let repo = SqliteTaskRepository::new(&tx);
        let id = repo.create_task(task)?;
        for skill_id in skills {
            repo.link_skill(id, *skill_id)?;
        }
        tx.commit()?;
        Ok(id)
    }

    pub fn update_task(&mut self, task: &Task) -> TaskServiceResult<()> {
        Ok(SqliteTaskRepository::new(&*self.conn).update_task(task)?)
    }

    pub fn get_task(&self, id: TaskId, include_recycled: bool) -> TaskServiceResult<Option<Task>> {
        Ok(SqliteTaskRepository::new(&*self.conn).get_task(id, include_recycled)?)
    }

    pub fn list_tasks(&self, query: &TaskListQuery) -> TaskServiceResult<Vec<Task>> {
        Ok(SqliteTaskRepository::new(&*self.conn).list_tasks(query)?)
    }

    pub fn recycle_task(&mut self, id: TaskId) -> TaskServiceResult<()> {
        Ok(SqliteTaskRepository::new(&*self.conn).recycle_task(id)?)
    }

    pub fn restore_task(&mut self, id: TaskId) -> TaskServiceResult<()> {
        Ok(SqliteTaskRepository::new(&*self.conn).restore_task(id)?)
    }

    /// Active-vs-recycled diagnostic counters.
    pub fn task_counts(&self, user_id: UserId) -> TaskServiceResult<TaskCounts> {
        Ok(SqliteTaskRepository::new(&*self.conn).task_counts(user_id)?)
    }

    /// Completes a task and applies its rewards exactly once.
    ///
    /// Recycled tasks cannot be completed and report `TaskNotFound`.
    pub fn complete_task(
        &mut self,
        id: TaskId,
        completed_at_ms: i64,
    ) -> TaskServiceResult<CompletionOutcome> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let tasks = SqliteTaskRepository::new(&tx);
        let task = tasks
            .get_task(id, false)?
            .ok_or(TaskServiceError::TaskNotFound(id))?;

        if task.is_completed() {
            info!(
                "event=task_complete module=task_service status=skipped reason=already_completed task_id={id}"
            );
            return Ok(CompletionOutcome::AlreadyCompleted {
                gold: task.gold_reward,
            });
        }

        let gold = i64::try_from(Self::preview_gold(&task)?).unwrap_or(i64::MAX);
        if !tasks.mark_completed(id, gold, completed_at_ms)? {
            warn!(
                "event=task_complete module=task_service status=skipped reason=lost_race task_id={id}"
            );
            return Ok(CompletionOutcome::AlreadyCompleted { gold: None });
        }

        let gold_balance = match SqliteUserRepository::new(&tx).add_gold(task.user_id, gold) {
            Ok(balance) => balance,
            Err(RepoError::NotFound(_)) => return Err(TaskServiceError::UserNotFound(task.user_id)),
            Err(err) => return Err(err.into()),
        };

        let mut skill_awards = Vec::new();
        for skill_id in tasks.linked_skills(id)? {
            let award = award_experience_in(&tx, task.user_id, skill_id, gold)?;
            skill_awards.push((skill_id, award));
        }
        tx.commit()?;

        info!(
            "event=task_complete module=task_service status=ok task_id={} gold={} skills={}",
            id,
            gold,
            skill_awards.len()
        );

        Ok(CompletionOutcome::Completed(CompletionReceipt {
            task_id: id,
            gold,
            gold_balance,
            skill_awards,
        }))
    }
}
