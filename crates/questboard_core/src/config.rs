//! Core configuration loading.
//!
//! # Responsibility
//! - Deserialize `questboard.toml` into typed sections with defaults.
//! - Apply `QUESTBOARD_*` environment overrides on top of the file.
//! - Validate the pieces each operation needs at the point of use.
//!
//! # Invariants
//! - Loading never fails because an optional source is unconfigured; the
//!   missing credential is reported when that source is used.
//! - Secrets are never written to logs or `Display` output.

use crate::model::task::SourceKind;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub const ENV_DB_PATH: &str = "QUESTBOARD_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "QUESTBOARD_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "QUESTBOARD_LOG_DIR";
pub const ENV_NOTION_TOKEN: &str = "QUESTBOARD_NOTION_TOKEN";
pub const ENV_NOTION_DATABASE_ID: &str = "QUESTBOARD_NOTION_DATABASE_ID";
pub const ENV_CALENDAR_TOKEN: &str = "QUESTBOARD_CALENDAR_TOKEN";
pub const ENV_CALENDAR_ID: &str = "QUESTBOARD_CALENDAR_ID";

const DEFAULT_NOTION_API_BASE: &str = "https://api.notion.com/v1";
const DEFAULT_CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
/// Upper bound for either side of the calendar fetch window.
pub const MAX_CALENDAR_WINDOW_DAYS: u32 = 3650;

/// Configuration errors. These abort the affected operation only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Read { path: PathBuf, message: String },
    Parse { path: PathBuf, message: String },
    MissingStorePath,
    MissingCredentials {
        source: SourceKind,
        field: &'static str,
    },
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, message } => {
                write!(f, "failed to read config `{}`: {message}", path.display())
            }
            Self::Parse { path, message } => {
                write!(f, "failed to parse config `{}`: {message}", path.display())
            }
            Self::MissingStorePath => write!(
                f,
                "store.db_path is not configured (set it in the config file or {ENV_DB_PATH})"
            ),
            Self::MissingCredentials { source, field } => {
                write!(f, "{source} source is missing `{field}`")
            }
            Self::InvalidValue { field, message } => write!(f, "invalid `{field}`: {message}"),
        }
    }
}

impl Error for ConfigError {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace|debug|info|warn|error`; build-mode default when unset.
    pub level: Option<String>,
    /// Absolute directory for rolling log files; logging stays off when unset.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub fetch_timeout_secs: u64,
    pub page_size: u32,
    /// Stop paginating after this many pages in one cycle.
    pub max_pages: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 30,
            page_size: 100,
            max_pages: 50,
        }
    }
}

/// Notion database source.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotionConfig {
    pub token: Option<String>,
    pub database_id: Option<String>,
    pub title_property: String,
    pub due_property: String,
    pub duration_property: Option<String>,
    /// Property matched by `filter_terms`; no filter when unset.
    pub filter_property: Option<String>,
    /// Notion filter type for `filter_property` (`rich_text`, `title`,
    /// `multi_select`).
    pub filter_property_type: String,
    pub filter_terms: Vec<String>,
    pub api_base: String,
}

impl Default for NotionConfig {
    fn default() -> Self {
        Self {
            token: None,
            database_id: None,
            title_property: "Name".to_string(),
            due_property: "Due".to_string(),
            duration_property: None,
            filter_property: None,
            filter_property_type: "rich_text".to_string(),
            filter_terms: Vec::new(),
            api_base: DEFAULT_NOTION_API_BASE.to_string(),
        }
    }
}

impl std::fmt::Debug for NotionConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotionConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("database_id", &self.database_id)
            .field("title_property", &self.title_property)
            .field("due_property", &self.due_property)
            .field("duration_property", &self.duration_property)
            .field("filter_property", &self.filter_property)
            .field("filter_property_type", &self.filter_property_type)
            .field("filter_terms", &self.filter_terms)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl NotionConfig {
    /// Returns `(token, database_id)` or the first missing field.
    pub fn credentials(&self) -> Result<(&str, &str), ConfigError> {
        let token = non_blank(self.token.as_deref()).ok_or(ConfigError::MissingCredentials {
            source: SourceKind::Notion,
            field: "token",
        })?;
        let database_id =
            non_blank(self.database_id.as_deref()).ok_or(ConfigError::MissingCredentials {
                source: SourceKind::Notion,
                field: "database_id",
            })?;
        Ok((token, database_id))
    }
}

/// Google Calendar source.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    pub access_token: Option<String>,
    pub calendar_id: String,
    /// Days before now included in each fetch window.
    pub lookbehind_days: u32,
    /// Days after now included in each fetch window.
    pub lookahead_days: u32,
    pub api_base: String,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            calendar_id: "primary".to_string(),
            lookbehind_days: 0,
            lookahead_days: 30,
            api_base: DEFAULT_CALENDAR_API_BASE.to_string(),
        }
    }
}

impl std::fmt::Debug for CalendarConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalendarConfig")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("calendar_id", &self.calendar_id)
            .field("lookbehind_days", &self.lookbehind_days)
            .field("lookahead_days", &self.lookahead_days)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl CalendarConfig {
    pub fn access_token(&self) -> Result<&str, ConfigError> {
        non_blank(self.access_token.as_deref()).ok_or(ConfigError::MissingCredentials {
            source: SourceKind::GoogleCalendar,
            field: "access_token",
        })
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    pub sync: SyncConfig,
    pub notion: Option<NotionConfig>,
    pub calendar: Option<CalendarConfig>,
}

impl CoreConfig {
    /// Loads configuration from `path` (when given) and the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::from_toml_str(&text).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|err| err.to_string())
    }

    /// Applies overrides from `lookup`; blank values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get(ENV_DB_PATH) {
            self.store.db_path = Some(PathBuf::from(value));
        }
        if let Some(value) = get(ENV_LOG_LEVEL) {
            self.logging.level = Some(value);
        }
        if let Some(value) = get(ENV_LOG_DIR) {
            self.logging.dir = Some(PathBuf::from(value));
        }
        if let Some(value) = get(ENV_NOTION_TOKEN) {
            self.notion.get_or_insert_with(NotionConfig::default).token = Some(value);
        }
        if let Some(value) = get(ENV_NOTION_DATABASE_ID) {
            self.notion
                .get_or_insert_with(NotionConfig::default)
                .database_id = Some(value);
        }
        if let Some(value) = get(ENV_CALENDAR_TOKEN) {
            self.calendar
                .get_or_insert_with(CalendarConfig::default)
                .access_token = Some(value);
        }
        if let Some(value) = get(ENV_CALENDAR_ID) {
            self.calendar
                .get_or_insert_with(CalendarConfig::default)
                .calendar_id = value;
        }
    }

    /// Checks values that would otherwise fail deep inside an operation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.fetch_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.fetch_timeout_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.sync.max_pages == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.max_pages",
                message: "must be greater than zero".to_string(),
            });
        }
        if let Some(notion) = &self.notion {
            if !matches!(
                notion.filter_property_type.as_str(),
                "rich_text" | "title" | "multi_select"
            ) {
                return Err(ConfigError::InvalidValue {
                    field: "notion.filter_property_type",
                    message: format!(
                        "`{}` is not one of rich_text|title|multi_select",
                        notion.filter_property_type
                    ),
                });
            }
        }
        if let Some(calendar) = &self.calendar {
            check_window_days("calendar.lookbehind_days", calendar.lookbehind_days)?;
            check_window_days("calendar.lookahead_days", calendar.lookahead_days)?;
        }
        Ok(())
    }

    pub fn db_path(&self) -> Result<&Path, ConfigError> {
        self.store
            .db_path
            .as_deref()
            .ok_or(ConfigError::MissingStorePath)
    }
}

fn check_window_days(field: &'static str, days: u32) -> Result<(), ConfigError> {
    if days > MAX_CALENDAR_WINDOW_DAYS {
        return Err(ConfigError::InvalidValue {
            field,
            message: format!("{days} exceeds the {MAX_CALENDAR_WINDOW_DAYS} day limit"),
        });
    }
    Ok(())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{
        ConfigError, CoreConfig, ENV_CALENDAR_TOKEN, ENV_DB_PATH, ENV_NOTION_TOKEN,
        MAX_CALENDAR_WINDOW_DAYS,
    };
    use crate::model::task::SourceKind;
    use std::collections::HashMap;
    use std::path::Path;

    #[test]
    fn empty_file_uses_defaults() {
        let config = CoreConfig::from_toml_str("").unwrap();
        assert_eq!(config.sync.page_size, 100);
        assert_eq!(config.sync.fetch_timeout_secs, 30);
        assert!(config.notion.is_none());
        assert_eq!(config.db_path(), Err(ConfigError::MissingStorePath));
    }

    #[test]
    fn parses_sections_with_partial_overrides() {
        let config = CoreConfig::from_toml_str(
            r#"
            [store]
            db_path = "/var/lib/questboard/questboard.db"

            [notion]
            database_id = "db-123"
            due_property = "Deadline"
            filter_property = "Tags"
            filter_property_type = "multi_select"
            filter_terms = ["work", "errands"]

            [calendar]
            lookahead_days = 14
            "#,
        )
        .unwrap();

        assert_eq!(
            config.db_path().unwrap(),
            Path::new("/var/lib/questboard/questboard.db")
        );
        let notion = config.notion.as_ref().unwrap();
        assert_eq!(notion.title_property, "Name");
        assert_eq!(notion.due_property, "Deadline");
        assert_eq!(notion.filter_terms, vec!["work", "errands"]);
        let calendar = config.calendar.as_ref().unwrap();
        assert_eq!(calendar.calendar_id, "primary");
        assert_eq!(calendar.lookahead_days, 14);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_fill_missing_sections() {
        let env: HashMap<&str, &str> = [
            (ENV_DB_PATH, "/tmp/q.db"),
            (ENV_NOTION_TOKEN, "secret_abc"),
            (ENV_CALENDAR_TOKEN, "  "),
        ]
        .into_iter()
        .collect();
        let mut config = CoreConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.db_path().unwrap(), Path::new("/tmp/q.db"));
        assert_eq!(
            config.notion.as_ref().unwrap().credentials(),
            Err(ConfigError::MissingCredentials {
                source: SourceKind::Notion,
                field: "database_id",
            })
        );
        assert!(config.calendar.is_none());
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let mut config = CoreConfig::default();
        config.apply_env_overrides(|key| {
            (key == ENV_NOTION_TOKEN).then(|| "secret_abc".to_string())
        });
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret_abc"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn rejects_calendar_window_beyond_limit() {
        let config = CoreConfig::from_toml_str(&format!(
            "[calendar]\nlookahead_days = {}\n",
            u32::MAX
        ))
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "calendar.lookahead_days",
                ..
            })
        ));

        let config = CoreConfig::from_toml_str(&format!(
            "[calendar]\nlookbehind_days = {MAX_CALENDAR_WINDOW_DAYS}\n"
        ))
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_filter_type() {
        let config = CoreConfig::from_toml_str(
            r#"
            [notion]
            filter_property_type = "checkbox"
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
