//! Top-level error for the context and CLI boundary.
//!
//! Module errors stay specific; [`CoreError`] wraps them so callers can
//! classify a failure with [`CoreError::kind`] without matching every enum.

use crate::config::ConfigError;
use crate::db::DbError;
use crate::engine::progression::ProgressionError;
use crate::engine::reward::RewardError;
use crate::logging::LoggingError;
use crate::repo::task_repo::RepoError;
use crate::service::progression_service::ProgressionServiceError;
use crate::service::task_service::TaskServiceError;
use crate::sync::adapter::ExternalApiError;
use crate::sync::date::InvalidTimeZone;
use crate::sync::provider_registry::RegistryError;
use crate::sync::reconciler::SyncError;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failure class shown to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    ExternalApi,
    DataIntegrity,
    Migration,
    Validation,
    Storage,
    NotFound,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::ExternalApi => "external_api",
            Self::DataIntegrity => "data_integrity",
            Self::Migration => "migration",
            Self::Validation => "validation",
            Self::Storage => "storage",
            Self::NotFound => "not_found",
        }
    }
}

#[derive(Debug)]
pub enum CoreError {
    Config(ConfigError),
    Logging(LoggingError),
    Db(DbError),
    Repo(RepoError),
    Reward(RewardError),
    Progression(ProgressionServiceError),
    Task(TaskServiceError),
    Sync(SyncError),
    Registry(RegistryError),
    TimeZone(InvalidTimeZone),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Logging(_) => ErrorKind::Configuration,
            Self::Db(err) => db_kind(err),
            Self::Repo(err) => repo_kind(err),
            Self::Reward(_) | Self::TimeZone(_) => ErrorKind::Validation,
            Self::Progression(err) => progression_kind(err),
            Self::Task(err) => match err {
                TaskServiceError::Reward(_) => ErrorKind::Validation,
                TaskServiceError::Progression(err) => progression_kind(err),
                TaskServiceError::Repo(err) => repo_kind(err),
                TaskServiceError::TaskNotFound(_) | TaskServiceError::UserNotFound(_) => {
                    ErrorKind::NotFound
                }
            },
            Self::Sync(err) => sync_kind(err),
            Self::Registry(err) => match err {
                RegistryError::Fetch(_) => ErrorKind::ExternalApi,
                RegistryError::Reconcile(err) => sync_kind(err),
                RegistryError::SourceNotRegistered(_) | RegistryError::DuplicateSource(_) => {
                    ErrorKind::Configuration
                }
                RegistryError::IncompleteCycle(_) => ErrorKind::ExternalApi,
            },
        }
    }
}

fn db_kind(err: &DbError) -> ErrorKind {
    match err {
        DbError::Sqlite(_) => ErrorKind::Storage,
        DbError::UnsupportedSchemaVersion { .. } | DbError::Migration(_) => ErrorKind::Migration,
    }
}

fn repo_kind(err: &RepoError) -> ErrorKind {
    match err {
        RepoError::Validation(_) => ErrorKind::Validation,
        RepoError::Db(err) => db_kind(err),
        RepoError::NotFound(_) => ErrorKind::NotFound,
        RepoError::InvalidData(_) | RepoError::DuplicateExternalId { .. } => {
            ErrorKind::DataIntegrity
        }
    }
}

fn progression_kind(err: &ProgressionServiceError) -> ErrorKind {
    match err {
        ProgressionServiceError::Progression(ProgressionError::UnknownMilestone(_)) => {
            ErrorKind::NotFound
        }
        ProgressionServiceError::Progression(_) => ErrorKind::Validation,
        ProgressionServiceError::SkillNotFound(_) => ErrorKind::NotFound,
        ProgressionServiceError::Repo(err) => repo_kind(err),
    }
}

fn sync_kind(err: &SyncError) -> ErrorKind {
    match err {
        SyncError::Repo(err) => repo_kind(err),
        SyncError::UserNotFound(_) => ErrorKind::NotFound,
    }
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Logging(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Reward(err) => write!(f, "{err}"),
            Self::Progression(err) => write!(f, "{err}"),
            Self::Task(err) => write!(f, "{err}"),
            Self::Sync(err) => write!(f, "{err}"),
            Self::Registry(err) => write!(f, "{err}"),
            Self::TimeZone(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Logging(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::Reward(err) => Some(err),
            Self::Progression(err) => Some(err),
            Self::Task(err) => Some(err),
            Self::Sync(err) => Some(err),
            Self::Registry(err) => Some(err),
            Self::TimeZone(err) => Some(err),
        }
    }
}

impl From<ConfigError> for CoreError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<LoggingError> for CoreError {
    fn from(value: LoggingError) -> Self {
        Self::Logging(value)
    }
}

impl From<DbError> for CoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<RepoError> for CoreError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<RewardError> for CoreError {
    fn from(value: RewardError) -> Self {
        Self::Reward(value)
    }
}

impl From<ProgressionServiceError> for CoreError {
    fn from(value: ProgressionServiceError) -> Self {
        Self::Progression(value)
    }
}

impl From<TaskServiceError> for CoreError {
    fn from(value: TaskServiceError) -> Self {
        Self::Task(value)
    }
}

impl From<SyncError> for CoreError {
    fn from(value: SyncError) -> Self {
        Self::Sync(value)
    }
}

impl From<RegistryError> for CoreError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

impl From<InvalidTimeZone> for CoreError {
    fn from(value: InvalidTimeZone) -> Self {
        Self::TimeZone(value)
    }
}

impl From<ExternalApiError> for CoreError {
    fn from(value: ExternalApiError) -> Self {
        Self::Registry(RegistryError::Fetch(value))
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::{CoreError, ErrorKind};
    use crate::config::ConfigError;
    use crate::model::task::SourceKind;
    use crate::repo::task_repo::RepoError;
    use crate::sync::adapter::{ExternalApiError, ExternalApiErrorKind};

    #[test]
    fn classifies_taxonomy() {
        let missing = CoreError::from(ConfigError::MissingStorePath);
        assert_eq!(missing.kind(), ErrorKind::Configuration);

        let duplicate = CoreError::from(RepoError::DuplicateExternalId {
            source: SourceKind::Notion,
            external_id: "page-1".to_string(),
        });
        assert_eq!(duplicate.kind(), ErrorKind::DataIntegrity);

        let fetch = CoreError::from(ExternalApiError::new(
            SourceKind::GoogleCalendar,
            ExternalApiErrorKind::RateLimited,
            "slow down",
        ));
        assert_eq!(fetch.kind(), ErrorKind::ExternalApi);
        assert_eq!(fetch.kind().as_str(), "external_api");
    }
}
