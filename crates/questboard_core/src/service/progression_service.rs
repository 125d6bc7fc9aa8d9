//! Skill progression use-case service.
//!
//! # Responsibility
//! - Load, mutate and persist `UserSkill` records inside write transactions.
//! - Create a user's skill record lazily on first use.
//!
//! # Invariants
//! - Every read that informs a leveling decision happens inside the same
//!   immediate transaction as the write, against committed state.

use crate::engine::progression::{ProgressionError, SkillAward};
use crate::model::skill::{ConstellationMilestone, SkillId, UserSkill};
use crate::model::task::UserId;
use crate::repo::skill_repo::{SkillRepository, SqliteSkillRepository};
use crate::repo::task_repo::RepoError;
use log::info;
use rusqlite::{Connection, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum ProgressionServiceError {
    Progression(ProgressionError),
    SkillNotFound(SkillId),
    Repo(RepoError),
}

impl Display for ProgressionServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Progression(err) => write!(f, "{err}"),
            Self::SkillNotFound(id) => write!(f, "skill not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ProgressionServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Progression(err) => Some(err),
            Self::SkillNotFound(_) => None,
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<ProgressionError> for ProgressionServiceError {
    fn from(value: ProgressionError) -> Self {
        Self::Progression(value)
    }
}

impl From<RepoError> for ProgressionServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<rusqlite::Error> for ProgressionServiceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(value.into())
    }
}

pub type ProgressionResult<T> = Result<T, ProgressionServiceError>;

pub struct ProgressionService<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> ProgressionService<'conn> {
    pub fn new(conn: &'conn mut Connection) -> Self {
        Self { conn }
    }

    /// Awards experience to one skill and persists the result.
    pub fn award_experience(
        &mut self,
        user_id: UserId,
        skill_id: SkillId,
        delta: i64,
    ) -> ProgressionResult<SkillAward> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let award = award_experience_in(&tx, user_id, skill_id, delta)?;
        tx.commit()?;
        Ok(award)
    }

    /// Marks a milestone complete. Returns `false` when it already was.
    pub fn complete_milestone(
        &mut self,
        user_id: UserId,
        skill_id: SkillId,
        milestone_id: &str,
    ) -> ProgressionResult<bool> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut user_skill = load_or_new(&tx, user_id, skill_id)?;
        let newly_completed = user_skill.complete_milestone(milestone_id)?;
        if newly_completed {
            SqliteSkillRepository::new(&tx).save_user_skill(&user_skill)?;
            info!(
                "event=milestone_complete module=progression status=ok skill_id={} milestone={}",
                skill_id,
                milestone_id.trim()
            );
        }
        tx.commit()?;
        Ok(newly_completed)
    }

    /// Adds a user-authored constellation node.
    pub fn add_constellation_node(
        &mut self,
        user_id: UserId,
        skill_id: SkillId,
        node: ConstellationMilestone,
    ) -> ProgressionResult<UserSkill> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut user_skill = load_or_new(&tx, user_id, skill_id)?;
        user_skill.add_constellation_node(node)?;
        SqliteSkillRepository::new(&tx).save_user_skill(&user_skill)?;
        tx.commit()?;
        Ok(user_skill)
    }

    pub fn user_skill(
        &self,
        user_id: UserId,
        skill_id: SkillId,
    ) -> ProgressionResult<Option<UserSkill>> {
        Ok(SqliteSkillRepository::new(&*self.conn).get_user_skill(user_id, skill_id)?)
    }
}

/// Awards experience using the caller's open transaction.
pub(crate) fn award_experience_in(
    conn: &Connection,
    user_id: UserId,
    skill_id: SkillId,
    delta: i64,
) -> ProgressionResult<SkillAward> {
    let mut user_skill = load_or_new(conn, user_id, skill_id)?;
    let award = user_skill.apply_experience(delta)?;
    SqliteSkillRepository::new(conn).save_user_skill(&user_skill)?;

    info!(
        "event=xp_award module=progression status=ok skill_id={} delta={} level_from={} level_to={} unlocked={}",
        skill_id,
        delta,
        award.change.previous_level,
        award.change.new_level,
        award.unlocked_milestones.len()
    );
    Ok(award)
}

fn load_or_new(conn: &Connection, user_id: UserId, skill_id: SkillId) -> ProgressionResult<UserSkill> {
    let repo = SqliteSkillRepository::new(conn);
    if repo.get_skill(skill_id)?.is_none() {
        return Err(ProgressionServiceError::SkillNotFound(skill_id));
    }
    Ok(repo
        .get_user_skill(user_id, skill_id)?
        .unwrap_or_else(|| UserSkill::new(user_id, skill_id)))
}
