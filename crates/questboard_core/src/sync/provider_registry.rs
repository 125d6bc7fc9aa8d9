//! In-process source registry and sync cycle driver.
//!
//! # Responsibility
//! - Hold one adapter per source kind and the last known status of each.
//! - Persist the status a sync cycle ends with, and restore it for
//!   registered adapters in a later process.
//! - Run a sync cycle: fetch every page, reconcile page by page.
//!
//! # Invariants
//! - A failed fetch marks the source `NeedsReconnect` and ends the cycle;
//!   pages reconciled before the failure stay committed.
//! - Purge only runs against the id set of a cycle that saw every page, and
//!   only over imports due inside that cycle's fetch window.

use crate::model::task::{SourceKind, UserId};
use crate::repo::source_status_repo::{
    SourceStatusRecord, SourceStatusRepository, SqliteSourceStatusRepository,
};
use crate::sync::adapter::{ExternalApiError, ExternalSourceAdapter, FetchRequest};
use crate::sync::reconciler::{
    DueWindow, PurgeReport, ReconcileSummary, SyncError, SyncReconciler,
};
use chrono::Utc;
use log::{error, info, warn};
use rusqlite::Connection;
use std::collections::{BTreeMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, PoisonError};

/// Connection state of one source as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Connected,
    /// Last fetch failed; the user has to re-check credentials or retry.
    NeedsReconnect { reason: String },
    NotConfigured,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::NeedsReconnect { .. } => "needs_reconnect",
            Self::NotConfigured => "not_configured",
        }
    }

    fn from_record(record: SourceStatusRecord) -> Option<Self> {
        match record.state.as_str() {
            "connected" => Some(Self::Connected),
            "needs_reconnect" => Some(Self::NeedsReconnect {
                reason: record.reason.unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum RegistryError {
    DuplicateSource(SourceKind),
    SourceNotRegistered(SourceKind),
    Fetch(ExternalApiError),
    Reconcile(SyncError),
    /// Purge was requested for a cycle that did not see every page.
    IncompleteCycle(SourceKind),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateSource(source) => write!(f, "source already registered: {source}"),
            Self::SourceNotRegistered(source) => write!(f, "source not configured: {source}"),
            Self::Fetch(err) => write!(f, "{err}"),
            Self::Reconcile(err) => write!(f, "{err}"),
            Self::IncompleteCycle(source) => write!(
                f,
                "refusing to purge {source}: last sync cycle did not fetch every page"
            ),
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Fetch(err) => Some(err),
            Self::Reconcile(err) => Some(err),
            Self::DuplicateSource(_) | Self::SourceNotRegistered(_) | Self::IncompleteCycle(_) => {
                None
            }
        }
    }
}

impl From<SyncError> for RegistryError {
    fn from(value: SyncError) -> Self {
        Self::Reconcile(value)
    }
}

/// Result of one sync cycle for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCycleReport {
    pub source: SourceKind,
    pub summary: ReconcileSummary,
    /// External ids seen across all fetched pages.
    pub fetched_ids: HashSet<String>,
    pub pages: u32,
    /// `false` when the page limit stopped pagination early.
    pub complete: bool,
    /// `time_min`/`time_max` the cycle fetched with.
    pub window: DueWindow,
}

/// Runtime registry of source adapters.
pub struct SourceRegistry {
    adapters: BTreeMap<SourceKind, Arc<dyn ExternalSourceAdapter>>,
    statuses: Mutex<BTreeMap<SourceKind, SourceStatus>>,
    max_pages: u32,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new(50)
    }
}

impl SourceRegistry {
    pub fn new(max_pages: u32) -> Self {
        Self {
            adapters: BTreeMap::new(),
            statuses: Mutex::new(BTreeMap::new()),
            max_pages: max_pages.max(1),
        }
    }

    /// Registers one adapter under its own source kind.
    pub fn register(
        &mut self,
        adapter: Arc<dyn ExternalSourceAdapter>,
    ) -> Result<(), RegistryError> {
        let source = adapter.source_kind();
        if self.adapters.contains_key(&source) {
            return Err(RegistryError::DuplicateSource(source));
        }
        self.adapters.insert(source, adapter);
        self.set_status(source, SourceStatus::Connected);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Registered source kinds in stable order.
    pub fn sources(&self) -> Vec<SourceKind> {
        self.adapters.keys().copied().collect()
    }

    pub fn get(&self, source: SourceKind) -> Option<Arc<dyn ExternalSourceAdapter>> {
        self.adapters.get(&source).cloned()
    }

    /// Records why a source could not be configured.
    pub fn mark_not_configured(&self, source: SourceKind) {
        if !self.adapters.contains_key(&source) {
            self.set_status(source, SourceStatus::NotConfigured);
        }
    }

    pub fn status(&self, source: SourceKind) -> SourceStatus {
        self.lock_statuses()
            .get(&source)
            .cloned()
            .unwrap_or(SourceStatus::NotConfigured)
    }

    /// Status of every known source kind.
    pub fn statuses(&self) -> Vec<(SourceKind, SourceStatus)> {
        SourceKind::ALL
            .iter()
            .map(|source| (*source, self.status(*source)))
            .collect()
    }

    /// Fetches every page of `source` and reconciles it into `user_id`'s tasks.
    pub fn run_sync(
        &self,
        conn: &mut Connection,
        user_id: UserId,
        source: SourceKind,
        request: &FetchRequest,
    ) -> Result<SyncCycleReport, RegistryError> {
        let adapter = self
            .get(source)
            .ok_or(RegistryError::SourceNotRegistered(source))?;
        info!("event=sync_cycle module=sync status=start source={source} user_id={user_id}");

        let mut report = SyncCycleReport {
            source,
            summary: ReconcileSummary::default(),
            fetched_ids: HashSet::new(),
            pages: 0,
            complete: false,
            window: DueWindow::between(request.time_min, request.time_max),
        };
        let mut page_request = request.with_cursor(None);

        loop {
            let page = match adapter.fetch(&page_request) {
                Ok(page) => page,
                Err(err) => {
                    error!(
                        "event=sync_cycle module=sync status=error source={} kind={} pages={} error={}",
                        source,
                        err.kind.as_str(),
                        report.pages,
                        err.message
                    );
                    self.record_status(
                        conn,
                        source,
                        SourceStatus::NeedsReconnect {
                            reason: err.to_string(),
                        },
                    );
                    return Err(RegistryError::Fetch(err));
                }
            };
            report.pages += 1;
            report.fetched_ids.extend(
                page.records
                    .iter()
                    .filter(|record| record.source == source)
                    .map(|record| record.external_id.trim())
                    .filter(|external_id| !external_id.is_empty())
                    .map(str::to_string),
            );

            let summary = SyncReconciler::new(conn).reconcile(user_id, source, &page.records)?;
            report.summary.merge(summary);

            match page.next_cursor {
                Some(cursor) if report.pages < self.max_pages => {
                    page_request = request.with_cursor(Some(cursor));
                }
                Some(_) => {
                    warn!(
                        "event=sync_cycle module=sync status=degraded source={} reason=page_limit pages={}",
                        source, report.pages
                    );
                    break;
                }
                None => {
                    report.complete = true;
                    break;
                }
            }
        }

        self.record_status(conn, source, SourceStatus::Connected);
        info!(
            "event=sync_cycle module=sync status=ok source={} pages={} fetched={} complete={}",
            source,
            report.pages,
            report.fetched_ids.len(),
            report.complete
        );
        Ok(report)
    }

    /// Removes imports of `report.source` that the cycle did not see.
    pub fn purge_absent(
        &self,
        conn: &mut Connection,
        user_id: UserId,
        report: &SyncCycleReport,
    ) -> Result<PurgeReport, RegistryError> {
        if !report.complete {
            return Err(RegistryError::IncompleteCycle(report.source));
        }
        Ok(SyncReconciler::new(conn).purge_within(
            user_id,
            report.source,
            &report.fetched_ids,
            report.window,
        )?)
    }

    /// Applies the status stored by an earlier process to a registered
    /// source. Unregistered sources keep `NotConfigured`.
    pub fn restore_status(&self, conn: &Connection, source: SourceKind) {
        if !self.adapters.contains_key(&source) {
            return;
        }
        match SqliteSourceStatusRepository::new(conn).load_status(source) {
            Ok(Some(record)) => {
                if let Some(status) = SourceStatus::from_record(record) {
                    self.set_status(source, status);
                }
            }
            Ok(None) => {}
            Err(err) => warn!(
                "event=source_status module=sync status=error op=load source={source} error={err}"
            ),
        }
    }

    /// Restores every registered source; see [`SourceRegistry::restore_status`].
    pub fn restore_statuses(&self, conn: &Connection) {
        for source in self.sources() {
            self.restore_status(conn, source);
        }
    }

    /// Sets `status` in memory and stores it. A storage failure is logged and
    /// does not change the cycle's outcome.
    fn record_status(&self, conn: &Connection, source: SourceKind, status: SourceStatus) {
        let record = SourceStatusRecord {
            source,
            state: status.as_str().to_string(),
            reason: match &status {
                SourceStatus::NeedsReconnect { reason } => Some(reason.clone()),
                _ => None,
            },
            updated_at_ms: Utc::now().timestamp_millis(),
        };
        if let Err(err) = SqliteSourceStatusRepository::new(conn).save_status(&record) {
            warn!(
                "event=source_status module=sync status=error op=save source={source} error={err}"
            );
        }
        self.set_status(source, status);
    }

    fn set_status(&self, source: SourceKind, status: SourceStatus) {
        self.lock_statuses().insert(source, status);
    }

    fn lock_statuses(&self) -> std::sync::MutexGuard<'_, BTreeMap<SourceKind, SourceStatus>> {
        self.statuses.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{RegistryError, SourceRegistry, SourceStatus};
    use crate::db::open_db_in_memory;
    use crate::model::task::SourceKind;
    use crate::model::user::User;
    use crate::repo::user_repo::{SqliteUserRepository, UserRepository};
    use crate::sync::adapter::{
        ExternalApiError, ExternalApiErrorKind, ExternalSourceAdapter, FetchPage, FetchRequest,
        RemoteRecord,
    };
    use std::sync::Arc;

    /// Serves fixed pages keyed by cursor index.
    struct PagedAdapter {
        pages: Vec<Vec<&'static str>>,
    }

    impl ExternalSourceAdapter for PagedAdapter {
        fn source_kind(&self) -> SourceKind {
            SourceKind::Notion
        }

        fn fetch(&self, request: &FetchRequest) -> Result<FetchPage, ExternalApiError> {
            let index: usize = request
                .cursor
                .as_deref()
                .map(|cursor| cursor.parse().unwrap())
                .unwrap_or(0);
            let records = self.pages[index]
                .iter()
                .map(|id| RemoteRecord {
                    source: SourceKind::Notion,
                    external_id: id.to_string(),
                    title: format!("Task {id}"),
                    due: None,
                    duration_minutes: None,
                })
                .collect();
            let next_cursor = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
            Ok(FetchPage {
                records,
                next_cursor,
            })
        }
    }

    struct RejectingAdapter;

    impl ExternalSourceAdapter for RejectingAdapter {
        fn source_kind(&self) -> SourceKind {
            SourceKind::GoogleCalendar
        }

        fn fetch(&self, _request: &FetchRequest) -> Result<FetchPage, ExternalApiError> {
            Err(ExternalApiError::new(
                SourceKind::GoogleCalendar,
                ExternalApiErrorKind::Unauthorized,
                "token expired",
            ))
        }
    }

    fn paged() -> Arc<PagedAdapter> {
        Arc::new(PagedAdapter {
            pages: vec![vec!["a", "b"], vec!["c"]],
        })
    }

    #[test]
    fn rejects_duplicate_source() {
        let mut registry = SourceRegistry::default();
        registry.register(paged()).unwrap();
        assert!(matches!(
            registry.register(paged()),
            Err(RegistryError::DuplicateSource(SourceKind::Notion))
        ));
        assert_eq!(registry.sources(), vec![SourceKind::Notion]);
        assert_eq!(
            registry.status(SourceKind::GoogleCalendar),
            SourceStatus::NotConfigured
        );
    }

    #[test]
    fn sync_cycle_walks_every_page() {
        let mut conn = open_db_in_memory().unwrap();
        let user = User::new("ada");
        SqliteUserRepository::new(&conn).create_user(&user).unwrap();
        let mut registry = SourceRegistry::default();
        registry.register(paged()).unwrap();

        let report = registry
            .run_sync(&mut conn, user.id, SourceKind::Notion, &FetchRequest::default())
            .unwrap();

        assert!(report.complete);
        assert_eq!(report.pages, 2);
        assert_eq!(report.summary.created, 3);
        assert_eq!(report.fetched_ids.len(), 3);
        assert_eq!(registry.status(SourceKind::Notion), SourceStatus::Connected);
    }

    #[test]
    fn page_limit_blocks_purge() {
        let mut conn = open_db_in_memory().unwrap();
        let user = User::new("ada");
        SqliteUserRepository::new(&conn).create_user(&user).unwrap();
        let mut registry = SourceRegistry::new(1);
        registry.register(paged()).unwrap();

        let report = registry
            .run_sync(&mut conn, user.id, SourceKind::Notion, &FetchRequest::default())
            .unwrap();
        assert!(!report.complete);
        assert!(matches!(
            registry.purge_absent(&mut conn, user.id, &report),
            Err(RegistryError::IncompleteCycle(SourceKind::Notion))
        ));
    }

    #[test]
    fn fetch_failure_marks_source_for_reconnect() {
        let mut conn = open_db_in_memory().unwrap();
        let user = User::new("ada");
        SqliteUserRepository::new(&conn).create_user(&user).unwrap();
        let mut registry = SourceRegistry::default();
        registry.register(Arc::new(RejectingAdapter)).unwrap();

        let result = registry.run_sync(
            &mut conn,
            user.id,
            SourceKind::GoogleCalendar,
            &FetchRequest::default(),
        );

        assert!(matches!(result, Err(RegistryError::Fetch(_))));
        assert!(matches!(
            registry.status(SourceKind::GoogleCalendar),
            SourceStatus::NeedsReconnect { .. }
        ));
    }

    #[test]
    fn unregistered_source_is_reported() {
        let mut conn = open_db_in_memory().unwrap();
        let registry = SourceRegistry::default();
        assert!(matches!(
            registry.run_sync(
                &mut conn,
                uuid::Uuid::new_v4(),
                SourceKind::Notion,
                &FetchRequest::default()
            ),
            Err(RegistryError::SourceNotRegistered(SourceKind::Notion))
        ));
    }

    #[test]
    fn failed_status_is_restored_for_registered_sources_only() {
        let mut conn = open_db_in_memory().unwrap();
        let user = User::new("ada");
        SqliteUserRepository::new(&conn).create_user(&user).unwrap();
        let mut first = SourceRegistry::default();
        first.register(Arc::new(RejectingAdapter)).unwrap();
        first
            .run_sync(
                &mut conn,
                user.id,
                SourceKind::GoogleCalendar,
                &FetchRequest::default(),
            )
            .unwrap_err();

        let unregistered = SourceRegistry::default();
        unregistered.restore_statuses(&conn);
        assert_eq!(
            unregistered.status(SourceKind::GoogleCalendar),
            SourceStatus::NotConfigured
        );

        let mut next = SourceRegistry::default();
        next.register(Arc::new(RejectingAdapter)).unwrap();
        assert_eq!(next.status(SourceKind::GoogleCalendar), SourceStatus::Connected);
        next.restore_statuses(&conn);
        assert!(matches!(
            next.status(SourceKind::GoogleCalendar),
            SourceStatus::NeedsReconnect { reason } if !reason.is_empty()
        ));
    }
}
