use questboard_core::db::open_db_in_memory;
use questboard_core::engine::progression::ProgressionError;
use questboard_core::model::skill::{ConstellationMilestone, MilestonePosition};
use questboard_core::repo::skill_repo::{SkillRepository, SqliteSkillRepository};
use questboard_core::repo::user_repo::{SqliteUserRepository, UserRepository};
use questboard_core::service::progression_service::{ProgressionService, ProgressionServiceError};
use questboard_core::{xp_required, Skill, User};
use rusqlite::Connection;
use uuid::Uuid;

fn seed(conn: &Connection) -> (User, Skill) {
    let user = User::new("ada");
    SqliteUserRepository::new(conn).create_user(&user).unwrap();
    let skill = Skill::new("Fitness", Some("dumbbell".to_string()));
    SqliteSkillRepository::new(conn).create_skill(&skill).unwrap();
    (user, skill)
}

#[test]
fn curve_matches_reference_points() {
    assert_eq!(xp_required(1), 100);
    assert_eq!(xp_required(10), 119);
}

#[test]
fn large_award_cascades_and_persists() {
    let mut conn = open_db_in_memory().unwrap();
    let (user, skill) = seed(&conn);
    let mut service = ProgressionService::new(&mut conn);

    // Level 2 needs 102, level 3 needs 104: 250 crosses both.
    let award = service.award_experience(user.id, skill.id, 250).unwrap();
    assert_eq!(award.change.levels_gained(), 2);

    let stored = service.user_skill(user.id, skill.id).unwrap().unwrap();
    assert_eq!(stored.progress.level, 3);
    assert_eq!(stored.progress.experience, 44);
}

#[test]
fn zero_award_is_a_no_op() {
    let mut conn = open_db_in_memory().unwrap();
    let (user, skill) = seed(&conn);
    let mut service = ProgressionService::new(&mut conn);
    service.award_experience(user.id, skill.id, 150).unwrap();
    let before = service.user_skill(user.id, skill.id).unwrap().unwrap();

    let award = service.award_experience(user.id, skill.id, 0).unwrap();

    assert_eq!(award.change.levels_gained(), 0);
    assert!(award.unlocked_milestones.is_empty());
    assert_eq!(service.user_skill(user.id, skill.id).unwrap().unwrap(), before);
}

#[test]
fn negative_award_is_rejected_without_writing() {
    let mut conn = open_db_in_memory().unwrap();
    let (user, skill) = seed(&conn);
    let mut service = ProgressionService::new(&mut conn);

    let err = service.award_experience(user.id, skill.id, -5).unwrap_err();
    assert!(matches!(
        err,
        ProgressionServiceError::Progression(ProgressionError::NegativeExperience(-5))
    ));
    assert!(service.user_skill(user.id, skill.id).unwrap().is_none());
}

#[test]
fn level_milestone_unlocks_once() {
    let mut conn = open_db_in_memory().unwrap();
    let (user, skill) = seed(&conn);
    let mut service = ProgressionService::new(&mut conn);

    let award = service.award_experience(user.id, skill.id, 500).unwrap();
    assert_eq!(award.unlocked_milestones, vec!["level-5".to_string()]);

    assert!(!service
        .complete_milestone(user.id, skill.id, "level-5")
        .unwrap());
    let stored = service.user_skill(user.id, skill.id).unwrap().unwrap();
    assert_eq!(stored.completed_milestones, vec!["level-5".to_string()]);
}

#[test]
fn unreached_level_milestone_is_rejected_without_writing() {
    let mut conn = open_db_in_memory().unwrap();
    let (user, skill) = seed(&conn);
    let mut service = ProgressionService::new(&mut conn);

    let err = service
        .complete_milestone(user.id, skill.id, "level-100")
        .unwrap_err();
    assert!(matches!(
        err,
        ProgressionServiceError::Progression(ProgressionError::LevelNotReached {
            required: 100,
            current: 1,
            ..
        })
    ));
    assert!(service.user_skill(user.id, skill.id).unwrap().is_none());
}

#[test]
fn constellation_nodes_complete_explicitly_once() {
    let mut conn = open_db_in_memory().unwrap();
    let (user, skill) = seed(&conn);
    let mut service = ProgressionService::new(&mut conn);

    service
        .add_constellation_node(
            user.id,
            skill.id,
            ConstellationMilestone {
                id: "first-5k".to_string(),
                position: MilestonePosition { x: 0.25, y: 0.75 },
                title: "Run a 5k".to_string(),
            },
        )
        .unwrap();

    assert!(service
        .complete_milestone(user.id, skill.id, "first-5k")
        .unwrap());
    assert!(!service
        .complete_milestone(user.id, skill.id, "first-5k")
        .unwrap());

    let stored = service.user_skill(user.id, skill.id).unwrap().unwrap();
    assert_eq!(stored.completed_milestones.len(), 1);
    assert_eq!(stored.constellation_milestones.len(), 1);
    assert_eq!(
        stored.constellation_node("first-5k").unwrap().position,
        MilestonePosition { x: 0.25, y: 0.75 }
    );
}

#[test]
fn unknown_skill_is_reported() {
    let mut conn = open_db_in_memory().unwrap();
    let (user, _) = seed(&conn);
    let mut service = ProgressionService::new(&mut conn);
    assert!(matches!(
        service.award_experience(user.id, Uuid::new_v4(), 10),
        Err(ProgressionServiceError::SkillNotFound(_))
    ));
}
