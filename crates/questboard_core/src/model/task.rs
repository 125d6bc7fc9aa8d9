//! Task domain model.
//!
//! # Responsibility
//! - Define the canonical task record shared by manual and imported tasks.
//! - Provide lifecycle helpers for recycle (soft-delete) semantics.
//!
//! # Invariants
//! - `id` is stable and never reused for another task.
//! - `gold_reward` and `completed_at_ms` are either both set or both unset.
//! - At most one external origin pair is attached to a task.
//! - `is_recycled` is the source of truth for tombstone state.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for a task row.
pub type TaskId = Uuid;

/// Stable identifier for the owning user.
pub type UserId = Uuid;

/// Campaign tag applied when the caller does not pick one.
pub const DEFAULT_CAMPAIGN: &str = "unassigned";

/// Ordered importance labels that drive the gold bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ImportanceTier {
    #[serde(rename = "Low")]
    Low,
    #[serde(rename = "Med-Low")]
    MedLow,
    #[serde(rename = "Medium")]
    Medium,
    #[serde(rename = "Med-High")]
    MedHigh,
    #[serde(rename = "High")]
    High,
    #[serde(rename = "Pareto")]
    Pareto,
}

impl ImportanceTier {
    /// All tiers in ascending order.
    pub const ALL: [ImportanceTier; 6] = [
        Self::Low,
        Self::MedLow,
        Self::Medium,
        Self::MedHigh,
        Self::High,
        Self::Pareto,
    ];

    /// Stable label used in storage and user-facing pickers.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::MedLow => "Med-Low",
            Self::Medium => "Medium",
            Self::MedHigh => "Med-High",
            Self::High => "High",
            Self::Pareto => "Pareto",
        }
    }

    /// Parses a tier label.
    ///
    /// Matching ignores case, surrounding whitespace and the separator used
    /// between `Med` and its suffix (`Med-Low`, `med_low`, `Med Low`).
    pub fn parse(value: &str) -> Option<Self> {
        let folded: String = value
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match folded.as_str() {
            "low" => Some(Self::Low),
            "medlow" => Some(Self::MedLow),
            "medium" | "med" => Some(Self::Medium),
            "medhigh" => Some(Self::MedHigh),
            "high" => Some(Self::High),
            "pareto" => Some(Self::Pareto),
            _ => None,
        }
    }
}

impl Display for ImportanceTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External system a task may have been imported from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Structured-database service (Notion database).
    Notion,
    /// Calendar service (Google Calendar).
    GoogleCalendar,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [Self::Notion, Self::GoogleCalendar];

    /// Stable id used in storage, logs and CLI arguments.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notion => "notion",
            Self::GoogleCalendar => "google_calendar",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "notion" => Some(Self::Notion),
            "google_calendar" | "calendar" => Some(Self::GoogleCalendar),
            _ => None,
        }
    }
}

impl Display for SourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a task in the external system it was imported from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalOrigin {
    pub source: SourceKind,
    pub external_id: String,
}

impl ExternalOrigin {
    pub fn new(source: SourceKind, external_id: impl Into<String>) -> Self {
        Self {
            source,
            external_id: external_id.into(),
        }
    }
}

/// Normalized due value.
///
/// `at_ms` is always an absolute instant; `time_zone` records the IANA zone
/// the value was interpreted in, so all-day dates render on the right day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDue {
    /// Unix epoch milliseconds.
    pub at_ms: i64,
    /// IANA zone name, e.g. `America/Los_Angeles`.
    pub time_zone: String,
    /// True when the source only carried a calendar date.
    pub all_day: bool,
}

/// Canonical task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub user_id: UserId,
    pub title: String,
    pub description: String,
    /// `None` means the tier was never set; rewards treat it as `Medium`.
    pub importance: Option<ImportanceTier>,
    pub duration_minutes: u32,
    pub due: Option<TaskDue>,
    /// Unix epoch milliseconds.
    pub scheduled_at_ms: Option<i64>,
    pub is_recycled: bool,
    pub campaign: String,
    pub origin: Option<ExternalOrigin>,
    /// Set once at completion, never rewritten.
    pub gold_reward: Option<i64>,
    /// Unix epoch milliseconds.
    pub completed_at_ms: Option<i64>,
}

impl Task {
    /// Creates an uncompleted manual task with a generated stable ID.
    pub fn new(user_id: UserId, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: title.into(),
            description: String::new(),
            importance: None,
            duration_minutes: 0,
            due: None,
            scheduled_at_ms: None,
            is_recycled: false,
            campaign: DEFAULT_CAMPAIGN.to_string(),
            origin: None,
            gold_reward: None,
            completed_at_ms: None,
        }
    }

    /// Creates an uncompleted task bound to an external origin.
    pub fn imported(user_id: UserId, origin: ExternalOrigin, title: impl Into<String>) -> Self {
        let mut task = Self::new(user_id, title);
        task.origin = Some(origin);
        task
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at_ms.is_some()
    }

    /// Marks this task as recycled.
    pub fn recycle(&mut self) {
        self.is_recycled = true;
    }

    pub fn restore(&mut self) {
        self.is_recycled = false;
    }

    pub fn is_active(&self) -> bool {
        !self.is_recycled
    }

    /// Validates record-level invariants before persistence.
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        if self.id.is_nil() {
            return Err(TaskValidationError::NilId);
        }
        if self.user_id.is_nil() {
            return Err(TaskValidationError::NilUserId);
        }
        if self.title.trim().is_empty() {
            return Err(TaskValidationError::BlankTitle);
        }
        if self.campaign.trim().is_empty() {
            return Err(TaskValidationError::BlankCampaign);
        }
        if let Some(origin) = &self.origin {
            if origin.external_id.trim().is_empty() {
                return Err(TaskValidationError::BlankExternalId);
            }
        }
        if self.gold_reward.is_some() != self.completed_at_ms.is_some() {
            return Err(TaskValidationError::IncompleteCompletionState);
        }
        if matches!(self.gold_reward, Some(gold) if gold < 0) {
            return Err(TaskValidationError::NegativeGold);
        }
        if let Some(due) = &self.due {
            if due.time_zone.trim().is_empty() {
                return Err(TaskValidationError::MissingDueZone);
            }
        }
        Ok(())
    }
}

/// Record-level validation failures for [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskValidationError {
    NilId,
    NilUserId,
    BlankTitle,
    BlankCampaign,
    BlankExternalId,
    IncompleteCompletionState,
    NegativeGold,
    MissingDueZone,
}

impl Display for TaskValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "task id must not be nil"),
            Self::NilUserId => write!(f, "task owner id must not be nil"),
            Self::BlankTitle => write!(f, "task title must not be blank"),
            Self::BlankCampaign => write!(f, "task campaign must not be blank"),
            Self::BlankExternalId => write!(f, "external id must not be blank"),
            Self::IncompleteCompletionState => write!(
                f,
                "gold reward and completion timestamp must be set together"
            ),
            Self::NegativeGold => write!(f, "gold reward must not be negative"),
            Self::MissingDueZone => write!(f, "due value must carry a time zone"),
        }
    }
}

impl Error for TaskValidationError {}

#[cfg(test)]
mod tests {
    use super::{ImportanceTier, SourceKind, Task, TaskValidationError};
    use uuid::Uuid;

    #[test]
    fn parses_tier_labels_loosely() {
        assert_eq!(ImportanceTier::parse("Med-Low"), Some(ImportanceTier::MedLow));
        assert_eq!(ImportanceTier::parse(" med_high "), Some(ImportanceTier::MedHigh));
        assert_eq!(ImportanceTier::parse("PARETO"), Some(ImportanceTier::Pareto));
        assert_eq!(ImportanceTier::parse("urgent"), None);
    }

    #[test]
    fn tiers_are_strictly_ordered() {
        for pair in ImportanceTier::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn source_kind_round_trips_storage_id() {
        for kind in SourceKind::ALL {
            assert_eq!(SourceKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn validate_requires_paired_completion_fields() {
        let mut task = Task::new(Uuid::new_v4(), "write report");
        task.gold_reward = Some(21);
        assert_eq!(
            task.validate(),
            Err(TaskValidationError::IncompleteCompletionState)
        );
        task.completed_at_ms = Some(1_700_000_000_000);
        assert_eq!(task.validate(), Ok(()));
    }
}
