//! Skill definitions and per-user skill progress records.
//!
//! # Invariants
//! - `UserSkill.progress` is always consistent with the leveling curve.
//! - `completed_milestones` only grows and never holds duplicates.
//! - Constellation nodes are user-authored and independent of level.

use crate::engine::progression::SkillProgress;
use crate::model::task::UserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type SkillId = Uuid;

/// Identifier of a milestone, either level-derived (`level-10`) or custom.
pub type MilestoneId = String;

/// Skill catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub id: SkillId,
    pub name: String,
    pub icon: Option<String>,
}

impl Skill {
    pub fn new(name: impl Into<String>, icon: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            icon,
        }
    }
}

/// Position of a constellation node on the skill map canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MilestonePosition {
    pub x: f64,
    pub y: f64,
}

/// User-authored milestone node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstellationMilestone {
    pub id: MilestoneId,
    pub position: MilestonePosition,
    pub title: String,
}

/// Mutable per-user record for one skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSkill {
    pub user_id: UserId,
    pub skill_id: SkillId,
    pub progress: SkillProgress,
    /// Insertion-ordered, duplicate-free.
    pub completed_milestones: Vec<MilestoneId>,
    pub constellation_milestones: Vec<ConstellationMilestone>,
}

impl UserSkill {
    /// Fresh record at level 1 with no experience.
    pub fn new(user_id: UserId, skill_id: SkillId) -> Self {
        Self {
            user_id,
            skill_id,
            progress: SkillProgress::default(),
            completed_milestones: Vec::new(),
            constellation_milestones: Vec::new(),
        }
    }

    pub fn has_completed(&self, milestone_id: &str) -> bool {
        self.completed_milestones
            .iter()
            .any(|completed| completed == milestone_id)
    }

    pub fn constellation_node(&self, milestone_id: &str) -> Option<&ConstellationMilestone> {
        self.constellation_milestones
            .iter()
            .find(|node| node.id == milestone_id)
    }
}
