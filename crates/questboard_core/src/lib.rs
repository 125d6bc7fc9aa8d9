//! Core domain logic for Questboard.
//! Rewards, skill progression and external task import live here; callers
//! reach them through [`AppContext`] or the individual services.

pub mod config;
pub mod context;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod sync;

pub use config::{ConfigError, CoreConfig};
pub use context::AppContext;
pub use engine::progression::{xp_required, LevelChange, SkillAward, SkillProgress};
pub use engine::reward::{compute_gold, compute_gold_for_label, RewardError};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status};
pub use model::skill::{Skill, SkillId, UserSkill};
pub use model::task::{ImportanceTier, SourceKind, Task, TaskDue, TaskId, UserId};
pub use model::user::User;
pub use repo::task_repo::{RepoError, RepoResult, TaskCounts, TaskListQuery};
pub use service::task_service::{CompletionOutcome, CompletionReceipt, TaskService};
pub use sync::adapter::{ExternalApiError, ExternalSourceAdapter, FetchRequest, RemoteRecord};
pub use sync::provider_registry::{SourceRegistry, SourceStatus, SyncCycleReport};
pub use sync::reconciler::{PurgeReport, ReconcileSummary, SyncReconciler};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
