//! Skill catalog and per-user skill progress persistence.
//!
//! # Invariants
//! - Milestone lists are stored as JSON arrays and decoded strictly; a
//!   malformed column is reported, never silently reset to empty.
//! - `save_user_skill` is an upsert keyed by `(user_id, skill_id)`.

use crate::engine::progression::SkillProgress;
use crate::model::skill::{ConstellationMilestone, MilestoneId, Skill, SkillId, UserSkill};
use crate::model::task::UserId;
use crate::repo::task_repo::{parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection, Row};

pub trait SkillRepository {
    fn create_skill(&self, skill: &Skill) -> RepoResult<SkillId>;
    fn get_skill(&self, id: SkillId) -> RepoResult<Option<Skill>>;
    fn list_skills(&self) -> RepoResult<Vec<Skill>>;
    fn get_user_skill(&self, user_id: UserId, skill_id: SkillId) -> RepoResult<Option<UserSkill>>;
    fn list_user_skills(&self, user_id: UserId) -> RepoResult<Vec<UserSkill>>;
    fn save_user_skill(&self, user_skill: &UserSkill) -> RepoResult<()>;
}

pub struct SqliteSkillRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSkillRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

const USER_SKILL_SELECT_SQL: &str = "SELECT
    user_id,
    skill_id,
    level,
    experience,
    completed_milestones,
    constellation_milestones
FROM user_skills";

impl SkillRepository for SqliteSkillRepository<'_> {
    fn create_skill(&self, skill: &Skill) -> RepoResult<SkillId> {
        if skill.name.trim().is_empty() {
            return Err(RepoError::InvalidData(
                "skill name must not be blank".to_string(),
            ));
        }
        self.conn.execute(
            "INSERT INTO skills (id, name, icon) VALUES (?1, ?2, ?3);",
            params![skill.id.to_string(), skill.name.trim(), skill.icon.as_deref()],
        )?;
        Ok(skill.id)
    }

    fn get_skill(&self, id: SkillId) -> RepoResult<Option<Skill>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, icon FROM skills WHERE id = ?1;")?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_skill_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_skills(&self) -> RepoResult<Vec<Skill>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, icon FROM skills ORDER BY name ASC;")?;
        let mut rows = stmt.query([])?;
        let mut skills = Vec::new();
        while let Some(row) = rows.next()? {
            skills.push(parse_skill_row(row)?);
        }
        Ok(skills)
    }

    fn get_user_skill(&self, user_id: UserId, skill_id: SkillId) -> RepoResult<Option<UserSkill>> {
        let mut stmt = self.conn.prepare(&format!(
            "{USER_SKILL_SELECT_SQL} WHERE user_id = ?1 AND skill_id = ?2;"
        ))?;
        let mut rows = stmt.query(params![user_id.to_string(), skill_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_user_skill_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_user_skills(&self, user_id: UserId) -> RepoResult<Vec<UserSkill>> {
        let mut stmt = self.conn.prepare(&format!(
            "{USER_SKILL_SELECT_SQL} WHERE user_id = ?1 ORDER BY skill_id ASC;"
        ))?;
        let mut rows = stmt.query([user_id.to_string()])?;
        let mut skills = Vec::new();
        while let Some(row) = rows.next()? {
            skills.push(parse_user_skill_row(row)?);
        }
        Ok(skills)
    }

    fn save_user_skill(&self, user_skill: &UserSkill) -> RepoResult<()> {
        let completed = serde_json::to_string(&user_skill.completed_milestones)
            .map_err(|err| RepoError::InvalidData(format!("encode completed_milestones: {err}")))?;
        let constellation = serde_json::to_string(&user_skill.constellation_milestones).map_err(
            |err| RepoError::InvalidData(format!("encode constellation_milestones: {err}")),
        )?;
        let experience = i64::try_from(user_skill.progress.experience).map_err(|_| {
            RepoError::InvalidData(format!(
                "experience {} does not fit storage",
                user_skill.progress.experience
            ))
        })?;

        self.conn.execute(
            "INSERT INTO user_skills (
                user_id,
                skill_id,
                level,
                experience,
                completed_milestones,
                constellation_milestones
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (user_id, skill_id) DO UPDATE SET
                level = excluded.level,
                experience = excluded.experience,
                completed_milestones = excluded.completed_milestones,
                constellation_milestones = excluded.constellation_milestones,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![
                user_skill.user_id.to_string(),
                user_skill.skill_id.to_string(),
                user_skill.progress.level,
                experience,
                completed,
                constellation,
            ],
        )?;
        Ok(())
    }
}

fn parse_skill_row(row: &Row<'_>) -> RepoResult<Skill> {
    Ok(Skill {
        id: parse_uuid(row, "id")?,
        name: row.get("name")?,
        icon: row.get("icon")?,
    })
}

fn parse_user_skill_row(row: &Row<'_>) -> RepoResult<UserSkill> {
    let level: i64 = row.get("level")?;
    let experience: i64 = row.get("experience")?;
    let level = u32::try_from(level)
        .map_err(|_| RepoError::InvalidData(format!("invalid level `{level}` in user_skills")))?;
    let experience = u64::try_from(experience).map_err(|_| {
        RepoError::InvalidData(format!("invalid experience `{experience}` in user_skills"))
    })?;

    let completed_text: String = row.get("completed_milestones")?;
    let completed_milestones: Vec<MilestoneId> =
        serde_json::from_str(&completed_text).map_err(|err| {
            RepoError::InvalidData(format!("invalid user_skills.completed_milestones: {err}"))
        })?;
    let constellation_text: String = row.get("constellation_milestones")?;
    let constellation_milestones: Vec<ConstellationMilestone> =
        serde_json::from_str(&constellation_text).map_err(|err| {
            RepoError::InvalidData(format!(
                "invalid user_skills.constellation_milestones: {err}"
            ))
        })?;

    Ok(UserSkill {
        user_id: parse_uuid(row, "user_id")?,
        skill_id: parse_uuid(row, "skill_id")?,
        progress: SkillProgress::from_parts(level, experience),
        completed_milestones,
        constellation_milestones,
    })
}
