//! Skill experience and leveling state machine.
//!
//! # Responsibility
//! - Convert experience awards into levels using the growth curve.
//! - Track level-triggered and custom milestone completion.
//!
//! # Invariants
//! - `level >= 1`.
//! - `experience < xp_required(level + 1)` after every mutation.
//! - One award may cross any number of thresholds; levels are never capped
//!   at one per call.
//! - Milestone completion is monotonic and idempotent.

use crate::model::skill::{ConstellationMilestone, MilestoneId, UserSkill};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Experience needed to leave level 1.
pub const BASE_XP: u64 = 100;
/// Per-level compound growth of the requirement.
pub const GROWTH_RATE: f64 = 0.02;

/// Levels that unlock a milestone automatically.
pub const LEVEL_MILESTONES: &[u32] = &[5, 10, 25, 50, 100];

/// Experience required to advance into `level`.
///
/// Levels at or below 1 cost [`BASE_XP`]; above that the cost compounds by
/// [`GROWTH_RATE`] per level and is floored to an integer.
pub fn xp_required(level: u32) -> u64 {
    if level <= 1 {
        return BASE_XP;
    }
    let exponent = i32::try_from(level - 1).unwrap_or(i32::MAX);
    (BASE_XP as f64 * (1.0 + GROWTH_RATE).powi(exponent)).floor() as u64
}

/// Milestone id unlocked when a skill reaches `level`.
pub fn level_milestone_id(level: u32) -> MilestoneId {
    format!("level-{level}")
}

/// Progression errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressionError {
    NegativeExperience(i64),
    UnknownMilestone(MilestoneId),
    DuplicateConstellationNode(MilestoneId),
    BlankMilestoneId,
    /// A level milestone was requested before the skill reached that level.
    LevelNotReached {
        milestone: MilestoneId,
        required: u32,
        current: u32,
    },
}

impl Display for ProgressionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NegativeExperience(delta) => {
                write!(f, "experience delta must not be negative, got {delta}")
            }
            Self::UnknownMilestone(id) => write!(f, "milestone is not defined: {id}"),
            Self::DuplicateConstellationNode(id) => {
                write!(f, "constellation node already exists: {id}")
            }
            Self::BlankMilestoneId => write!(f, "milestone id must not be blank"),
            Self::LevelNotReached {
                milestone,
                required,
                current,
            } => write!(
                f,
                "milestone {milestone} needs level {required}, skill is at level {current}"
            ),
        }
    }
}

impl Error for ProgressionError {}

/// Level and experience within the current level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillProgress {
    pub level: u32,
    pub experience: u64,
}

impl Default for SkillProgress {
    fn default() -> Self {
        Self {
            level: 1,
            experience: 0,
        }
    }
}

/// Result of one experience award.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub previous_level: u32,
    pub new_level: u32,
}

impl LevelChange {
    pub fn levels_gained(&self) -> u32 {
        self.new_level - self.previous_level
    }
}

impl SkillProgress {
    /// Restores progress from persisted values, re-settling any overflow.
    ///
    /// Rows written by older builds may hold experience past the threshold;
    /// settling keeps the invariant without losing experience.
    pub fn from_parts(level: u32, experience: u64) -> Self {
        let mut progress = Self {
            level: level.max(1),
            experience,
        };
        progress.settle();
        progress
    }

    /// Experience still needed to reach the next level.
    pub fn remaining_to_next(&self) -> u64 {
        xp_required(self.level + 1) - self.experience
    }

    /// Adds experience and cascades through every crossed threshold.
    ///
    /// A zero delta leaves state unchanged.
    ///
    /// # Errors
    /// - [`ProgressionError::NegativeExperience`] when `delta < 0`.
    pub fn apply_experience(&mut self, delta: i64) -> Result<LevelChange, ProgressionError> {
        let delta = u64::try_from(delta).map_err(|_| ProgressionError::NegativeExperience(delta))?;
        let previous_level = self.level;
        self.experience = self.experience.saturating_add(delta);
        self.settle();
        Ok(LevelChange {
            previous_level,
            new_level: self.level,
        })
    }

    fn settle(&mut self) {
        loop {
            let required = xp_required(self.level + 1);
            if self.experience < required || self.level == u32::MAX - 1 {
                break;
            }
            self.experience -= required;
            self.level += 1;
        }
    }
}

/// Outcome of awarding experience to a [`UserSkill`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillAward {
    pub change: LevelChange,
    /// Level milestones that became complete during this award.
    pub unlocked_milestones: Vec<MilestoneId>,
}

impl UserSkill {
    /// Applies experience and unlocks level milestones that were reached.
    pub fn apply_experience(&mut self, delta: i64) -> Result<SkillAward, ProgressionError> {
        let change = self.progress.apply_experience(delta)?;
        let unlocked_milestones = self.unlock_level_milestones();
        Ok(SkillAward {
            change,
            unlocked_milestones,
        })
    }

    /// Marks a milestone complete.
    ///
    /// Returns `false` when it was already complete. Constellation nodes must
    /// exist; a level milestone is accepted only once its level is reached.
    pub fn complete_milestone(&mut self, milestone_id: &str) -> Result<bool, ProgressionError> {
        let milestone_id = milestone_id.trim();
        if milestone_id.is_empty() {
            return Err(ProgressionError::BlankMilestoneId);
        }
        if self.constellation_node(milestone_id).is_none() {
            let required = LEVEL_MILESTONES
                .iter()
                .copied()
                .find(|level| level_milestone_id(*level) == milestone_id)
                .ok_or_else(|| ProgressionError::UnknownMilestone(milestone_id.to_string()))?;
            if self.progress.level < required {
                return Err(ProgressionError::LevelNotReached {
                    milestone: milestone_id.to_string(),
                    required,
                    current: self.progress.level,
                });
            }
        }
        Ok(self.record_completion(milestone_id))
    }

    /// Adds a custom constellation node. Nodes are never removed by the engine.
    pub fn add_constellation_node(
        &mut self,
        node: ConstellationMilestone,
    ) -> Result<(), ProgressionError> {
        if node.id.trim().is_empty() {
            return Err(ProgressionError::BlankMilestoneId);
        }
        let collides_with_level = LEVEL_MILESTONES
            .iter()
            .any(|level| level_milestone_id(*level) == node.id);
        if collides_with_level || self.constellation_node(&node.id).is_some() {
            return Err(ProgressionError::DuplicateConstellationNode(node.id));
        }
        self.constellation_milestones.push(node);
        Ok(())
    }

    fn unlock_level_milestones(&mut self) -> Vec<MilestoneId> {
        let reached: Vec<MilestoneId> = LEVEL_MILESTONES
            .iter()
            .filter(|level| **level <= self.progress.level)
            .map(|level| level_milestone_id(*level))
            .collect();
        reached
            .into_iter()
            .filter(|id| self.record_completion(id))
            .collect()
    }

    fn record_completion(&mut self, milestone_id: &str) -> bool {
        if self.has_completed(milestone_id) {
            return false;
        }
        self.completed_milestones.push(milestone_id.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::{level_milestone_id, xp_required, ProgressionError, SkillProgress};
    use crate::model::skill::{ConstellationMilestone, MilestonePosition, UserSkill};
    use uuid::Uuid;

    fn user_skill() -> UserSkill {
        UserSkill::new(Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn xp_curve_matches_reference_points() {
        assert_eq!(xp_required(0), 100);
        assert_eq!(xp_required(1), 100);
        assert_eq!(xp_required(2), 102);
        assert_eq!(xp_required(3), 104);
        assert_eq!(xp_required(10), 119);
    }

    #[test]
    fn xp_curve_is_strictly_increasing() {
        for level in 1..200 {
            assert!(xp_required(level) < xp_required(level + 1));
        }
    }

    #[test]
    fn zero_delta_is_a_no_op() {
        let mut progress = SkillProgress::from_parts(4, 37);
        let before = progress;
        let change = progress.apply_experience(0).unwrap();
        assert_eq!(progress, before);
        assert_eq!(change.levels_gained(), 0);
    }

    #[test]
    fn large_award_cascades_across_two_thresholds() {
        let mut progress = SkillProgress::default();
        // level 1 -> 2 costs 102, level 2 -> 3 costs 104.
        let change = progress.apply_experience(250).unwrap();
        assert_eq!(change.levels_gained(), 2);
        assert_eq!(progress.level, 3);
        assert_eq!(progress.experience, 250 - 102 - 104);
        assert!(progress.experience < xp_required(progress.level + 1));
    }

    #[test]
    fn exact_threshold_levels_up_with_zero_remainder() {
        let mut progress = SkillProgress::default();
        progress.apply_experience(102).unwrap();
        assert_eq!(progress, SkillProgress::from_parts(2, 0));
    }

    #[test]
    fn negative_delta_is_rejected_without_mutation() {
        let mut progress = SkillProgress::from_parts(2, 10);
        let err = progress.apply_experience(-1).unwrap_err();
        assert_eq!(err, ProgressionError::NegativeExperience(-1));
        assert_eq!(progress, SkillProgress::from_parts(2, 10));
    }

    #[test]
    fn from_parts_settles_overflowing_rows() {
        let progress = SkillProgress::from_parts(0, 210);
        assert_eq!(progress.level, 3);
        assert_eq!(progress.experience, 4);
    }

    #[test]
    fn award_unlocks_level_milestones_once() {
        let mut skill = user_skill();
        // 102 + 104 + 106 + 108 = 420 reaches level 5.
        let award = skill.apply_experience(500).unwrap();
        assert_eq!(skill.progress.level, 5);
        assert_eq!(skill.progress.experience, 80);
        assert_eq!(award.unlocked_milestones, vec![level_milestone_id(5)]);

        let again = skill.apply_experience(0).unwrap();
        assert!(again.unlocked_milestones.is_empty());
        assert_eq!(skill.completed_milestones.len(), 1);
    }

    #[test]
    fn completing_milestone_twice_keeps_set_size() {
        let mut skill = user_skill();
        skill
            .add_constellation_node(ConstellationMilestone {
                id: "ship-side-project".to_string(),
                position: MilestonePosition { x: 0.25, y: 0.75 },
                title: "Ship a side project".to_string(),
            })
            .unwrap();

        assert!(skill.complete_milestone("ship-side-project").unwrap());
        assert!(!skill.complete_milestone("ship-side-project").unwrap());
        assert_eq!(skill.completed_milestones.len(), 1);
    }

    #[test]
    fn level_milestone_requires_reaching_the_level() {
        let mut skill = user_skill();
        assert_eq!(
            skill.complete_milestone("level-100"),
            Err(ProgressionError::LevelNotReached {
                milestone: "level-100".to_string(),
                required: 100,
                current: 1,
            })
        );
        assert!(skill.completed_milestones.is_empty());

        skill.apply_experience(500).unwrap();
        assert!(!skill.complete_milestone("level-5").unwrap());
        assert!(matches!(
            skill.complete_milestone("level-10"),
            Err(ProgressionError::LevelNotReached { required: 10, .. })
        ));
    }

    #[test]
    fn rejects_unknown_and_duplicate_milestones() {
        let mut skill = user_skill();
        assert_eq!(
            skill.complete_milestone("nope"),
            Err(ProgressionError::UnknownMilestone("nope".to_string()))
        );

        let node = ConstellationMilestone {
            id: "level-5".to_string(),
            position: MilestonePosition { x: 0.0, y: 0.0 },
            title: "collides".to_string(),
        };
        assert!(matches!(
            skill.add_constellation_node(node),
            Err(ProgressionError::DuplicateConstellationNode(_))
        ));
    }
}
