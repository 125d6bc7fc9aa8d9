//! Boot-time application context.
//!
//! # Responsibility
//! - Own the store connection, the migration outcome and the source
//!   registry for one process.
//! - Expose the operations external callers need, each against current
//!   committed state.
//!
//! # Invariants
//! - Constructed once and passed by reference; there is no global handle.
//! - A degraded migration report does not stop construction.
//! - A source whose configuration is incomplete is reported `NotConfigured`
//!   and does not affect other sources.
//! - A registered source starts from the status its last sync cycle stored.

use crate::config::{ConfigError, CoreConfig};
use crate::db::{open_db_with_report, MigrationReport};
use crate::error::CoreResult;
use crate::model::skill::{Skill, SkillId};
use crate::model::task::{SourceKind, Task, TaskId, UserId};
use crate::model::user::User;
use crate::repo::skill_repo::{SkillRepository, SqliteSkillRepository};
use crate::repo::task_repo::TaskCounts;
use crate::repo::user_repo::{SqliteUserRepository, UserRepository};
use crate::service::task_service::{CompletionOutcome, TaskService};
use crate::sync::adapter::{ExternalSourceAdapter, FetchRequest};
use crate::sync::calendar::GoogleCalendarAdapter;
use crate::sync::date::parse_time_zone;
use crate::sync::notion::NotionAdapter;
use crate::sync::provider_registry::{SourceRegistry, SourceStatus, SyncCycleReport};
use crate::sync::reconciler::PurgeReport;
use chrono::{DateTime, TimeDelta, Utc};
use log::{info, warn};
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub struct AppContext {
    config: CoreConfig,
    conn: Mutex<Connection>,
    migration_report: MigrationReport,
    registry: SourceRegistry,
}

impl AppContext {
    /// Opens the configured store, runs migrations and builds adapters.
    pub fn open(config: CoreConfig) -> CoreResult<Self> {
        let (conn, report) = open_db_with_report(config.db_path()?)?;
        Ok(Self::from_parts(config, conn, report))
    }

    /// Builds a context over an already opened connection.
    pub fn from_parts(config: CoreConfig, conn: Connection, report: MigrationReport) -> Self {
        if report.is_degraded() {
            warn!(
                "event=context_open module=context status=degraded failed_migrations={}",
                report.failed.len()
            );
        }
        let registry = build_registry(&config);
        registry.restore_statuses(&conn);
        Self {
            config,
            conn: Mutex::new(conn),
            migration_report: report,
            registry,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn migration_report(&self) -> &MigrationReport {
        &self.migration_report
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Adds an adapter for a source that configuration left unregistered.
    pub fn register_adapter(&mut self, adapter: Arc<dyn ExternalSourceAdapter>) -> CoreResult<()> {
        let source = adapter.source_kind();
        self.registry.register(adapter)?;
        let conn = self.conn.get_mut().unwrap_or_else(PoisonError::into_inner);
        self.registry.restore_status(conn, source);
        Ok(())
    }

    pub fn source_statuses(&self) -> Vec<(SourceKind, SourceStatus)> {
        self.registry.statuses()
    }

    /// Creates a user; `time_zone` must be an IANA name when given.
    pub fn create_user(&self, display_name: &str, time_zone: Option<&str>) -> CoreResult<User> {
        let mut user = User::new(display_name.trim());
        if let Some(zone) = time_zone {
            user.time_zone = parse_time_zone(zone)?.name().to_string();
        }
        SqliteUserRepository::new(&self.lock()).create_user(&user)?;
        info!(
            "event=user_create module=context status=ok user_id={} time_zone={}",
            user.id, user.time_zone
        );
        Ok(user)
    }

    pub fn user(&self, id: UserId) -> CoreResult<Option<User>> {
        Ok(SqliteUserRepository::new(&self.lock()).get_user(id)?)
    }

    pub fn set_user_time_zone(&self, id: UserId, time_zone: &str) -> CoreResult<()> {
        let zone = parse_time_zone(time_zone)?;
        SqliteUserRepository::new(&self.lock()).set_time_zone(id, zone.name())?;
        Ok(())
    }

    pub fn create_skill(&self, name: &str, icon: Option<String>) -> CoreResult<Skill> {
        let skill = Skill::new(name.trim(), icon);
        SqliteSkillRepository::new(&self.lock()).create_skill(&skill)?;
        Ok(skill)
    }

    pub fn skills(&self) -> CoreResult<Vec<Skill>> {
        Ok(SqliteSkillRepository::new(&self.lock()).list_skills()?)
    }

    pub fn create_task(&self, task: &Task, skills: &[SkillId]) -> CoreResult<TaskId> {
        let mut conn = self.lock();
        Ok(TaskService::new(&mut conn).create_task(task, skills)?)
    }

    pub fn complete_task(&self, id: TaskId, completed_at_ms: i64) -> CoreResult<CompletionOutcome> {
        let mut conn = self.lock();
        Ok(TaskService::new(&mut conn).complete_task(id, completed_at_ms)?)
    }

    /// Active-vs-recycled counters for one user.
    pub fn task_counts(&self, user_id: UserId) -> CoreResult<TaskCounts> {
        let mut conn = self.lock();
        Ok(TaskService::new(&mut conn).task_counts(user_id)?)
    }

    /// Fetch filter for `source` built from configuration at `now`.
    ///
    /// Fails when the calendar window does not fit the representable range.
    pub fn fetch_request(
        &self,
        source: SourceKind,
        now: DateTime<Utc>,
    ) -> Result<FetchRequest, ConfigError> {
        let mut request = FetchRequest {
            page_size: self.config.sync.page_size,
            ..FetchRequest::default()
        };
        match source {
            SourceKind::Notion => {
                if let Some(notion) = &self.config.notion {
                    request.text_terms = notion.filter_terms.clone();
                }
            }
            SourceKind::GoogleCalendar => {
                let calendar = self.config.calendar.clone().unwrap_or_default();
                let behind = window_span("calendar.lookbehind_days", calendar.lookbehind_days)?;
                let ahead = window_span("calendar.lookahead_days", calendar.lookahead_days)?;
                request.time_min = Some(now.checked_sub_signed(behind).ok_or(
                    ConfigError::InvalidValue {
                        field: "calendar.lookbehind_days",
                        message: "window start is out of range".to_string(),
                    },
                )?);
                request.time_max = Some(now.checked_add_signed(ahead).ok_or(
                    ConfigError::InvalidValue {
                        field: "calendar.lookahead_days",
                        message: "window end is out of range".to_string(),
                    },
                )?);
            }
        }
        Ok(request)
    }

    /// Runs one full sync cycle for `source`.
    pub fn sync_source(&self, user_id: UserId, source: SourceKind) -> CoreResult<SyncCycleReport> {
        let request = self.fetch_request(source, Utc::now())?;
        let mut conn = self.lock();
        Ok(self.registry.run_sync(&mut conn, user_id, source, &request)?)
    }

    /// Syncs `source`, then removes imports the completed cycle did not see.
    pub fn sync_and_purge(
        &self,
        user_id: UserId,
        source: SourceKind,
    ) -> CoreResult<(SyncCycleReport, PurgeReport)> {
        let report = self.sync_source(user_id, source)?;
        let mut conn = self.lock();
        let purged = self.registry.purge_absent(&mut conn, user_id, &report)?;
        Ok((report, purged))
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn window_span(field: &'static str, days: u32) -> Result<TimeDelta, ConfigError> {
    TimeDelta::try_days(i64::from(days)).ok_or(ConfigError::InvalidValue {
        field,
        message: format!("{days} days is out of range"),
    })
}

fn build_registry(config: &CoreConfig) -> SourceRegistry {
    let mut registry = SourceRegistry::new(config.sync.max_pages);
    let timeout = Duration::from_secs(config.sync.fetch_timeout_secs);

    let notion = config
        .notion
        .as_ref()
        .map(|notion| NotionAdapter::from_config(notion, timeout));
    match notion {
        Some(Ok(adapter)) => register_or_warn(&mut registry, Arc::new(adapter)),
        Some(Err(err)) => {
            warn!("event=source_config module=context status=error source=notion error={err}");
            registry.mark_not_configured(SourceKind::Notion);
        }
        None => registry.mark_not_configured(SourceKind::Notion),
    }

    let calendar = config
        .calendar
        .as_ref()
        .map(|calendar| GoogleCalendarAdapter::from_config(calendar, timeout));
    match calendar {
        Some(Ok(adapter)) => register_or_warn(&mut registry, Arc::new(adapter)),
        Some(Err(err)) => {
            warn!(
                "event=source_config module=context status=error source=google_calendar error={err}"
            );
            registry.mark_not_configured(SourceKind::GoogleCalendar);
        }
        None => registry.mark_not_configured(SourceKind::GoogleCalendar),
    }

    registry
}

fn register_or_warn(registry: &mut SourceRegistry, adapter: Arc<dyn ExternalSourceAdapter>) {
    let source = adapter.source_kind();
    if let Err(err) = registry.register(adapter) {
        warn!("event=source_config module=context status=error source={source} error={err}");
    }
}
