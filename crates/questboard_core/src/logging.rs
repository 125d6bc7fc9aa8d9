//! Process logging bootstrap.
//!
//! # Responsibility
//! - Start rolling file logs once per process from [`LoggingConfig`].
//! - Record panics as a single sanitized log line.
//!
//! # Invariants
//! - Re-initializing with the same level and directory is a no-op; any other
//!   combination is rejected with [`LoggingError::Conflict`].
//! - Initialization never panics.
//! - Log lines carry ids and counters only; no titles, tokens or bodies.

use crate::config::LoggingConfig;
use flexi_logger::{
    Cleanup, Criterion, DeferredNow, FileSpec, Logger, LoggerHandle, Naming, WriteMode,
};
use log::{error, info, LevelFilter, Record};
use once_cell::sync::OnceCell;
use std::any::Any;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOG_BASENAME: &str = "questboard";
const ROTATE_AT_BYTES: u64 = 10 * 1024 * 1024;
const KEEP_ROTATED: usize = 5;
const PANIC_LINE_MAX_CHARS: usize = 160;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

struct ActiveLogger {
    level: LevelFilter,
    dir: PathBuf,
    _handle: LoggerHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggingError {
    UnsupportedLevel(String),
    InvalidDirectory(String),
    CreateDirectory { dir: PathBuf, message: String },
    Backend(String),
    /// Logging is already running with a different level or directory.
    Conflict { active: String, requested: String },
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedLevel(level) => write!(
                f,
                "log level `{level}` is not one of trace|debug|info|warn|error"
            ),
            Self::InvalidDirectory(message) => write!(f, "log dir rejected: {message}"),
            Self::CreateDirectory { dir, message } => {
                write!(f, "cannot create log dir `{}`: {message}", dir.display())
            }
            Self::Backend(message) => write!(f, "logger backend: {message}"),
            Self::Conflict { active, requested } => write!(
                f,
                "logging runs with {active}; cannot switch to {requested}"
            ),
        }
    }
}

impl Error for LoggingError {}

/// Starts logging when `config.dir` is set.
///
/// Returns `Ok(false)` when no directory is configured and logging stays off.
pub fn init_from_config(config: &LoggingConfig) -> Result<bool, LoggingError> {
    let Some(dir) = config.dir.as_deref() else {
        return Ok(false);
    };
    let level = config.level.as_deref().unwrap_or(default_log_level());
    init_logging(level, dir)?;
    Ok(true)
}

/// Starts file logging at `level` under the absolute directory `log_dir`.
pub fn init_logging(level: &str, log_dir: &Path) -> Result<(), LoggingError> {
    let level = parse_level(level)?;
    let dir = check_dir(log_dir)?;

    let active = ACTIVE.get_or_try_init(|| start(level, &dir))?;
    if active.level != level || active.dir != dir {
        return Err(LoggingError::Conflict {
            active: describe(active.level, &active.dir),
            requested: describe(level, &dir),
        });
    }
    Ok(())
}

/// Level and directory of the running logger, if any.
pub fn logging_status() -> Option<(LevelFilter, PathBuf)> {
    ACTIVE.get().map(|active| (active.level, active.dir.clone()))
}

/// `debug` for debug builds, `info` for release builds.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn start(level: LevelFilter, dir: &Path) -> Result<ActiveLogger, LoggingError> {
    std::fs::create_dir_all(dir).map_err(|err| LoggingError::CreateDirectory {
        dir: dir.to_path_buf(),
        message: err.to_string(),
    })?;

    // Direct writes: CLI runs are short and the handle is never dropped, so
    // buffered lines would be lost at exit.
    let handle = Logger::try_with_str(level.as_str())
        .map_err(|err| LoggingError::Backend(err.to_string()))?
        .log_to_file(FileSpec::default().directory(dir).basename(LOG_BASENAME))
        .rotate(
            Criterion::Size(ROTATE_AT_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(KEEP_ROTATED),
        )
        .write_mode(WriteMode::Direct)
        .append()
        .format_for_files(key_value_format)
        .start()
        .map_err(|err| LoggingError::Backend(err.to_string()))?;

    install_panic_hook();
    info!(
        "event=logging_init module=logging status=ok level={} dir={} version={}",
        level,
        dir.display(),
        env!("CARGO_PKG_VERSION")
    );

    Ok(ActiveLogger {
        level,
        dir: dir.to_path_buf(),
        _handle: handle,
    })
}

/// `ts=… level=… target=… <message>`; messages are already `key=value` pairs.
fn key_value_format(
    w: &mut dyn Write,
    now: &mut DeferredNow,
    record: &Record<'_>,
) -> std::io::Result<()> {
    write!(
        w,
        "ts={} level={} target={} {}",
        now.now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
        record.level(),
        record.target(),
        record.args()
    )
}

fn parse_level(raw: &str) -> Result<LevelFilter, LoggingError> {
    let normalized = raw.trim().to_ascii_lowercase();
    let name = if normalized == "warning" { "warn" } else { normalized.as_str() };
    match name.parse::<LevelFilter>() {
        Ok(LevelFilter::Off) | Err(_) => Err(LoggingError::UnsupportedLevel(normalized)),
        Ok(level) => Ok(level),
    }
}

fn check_dir(dir: &Path) -> Result<PathBuf, LoggingError> {
    if dir.as_os_str().is_empty() {
        return Err(LoggingError::InvalidDirectory("empty path".to_string()));
    }
    if dir.is_relative() {
        return Err(LoggingError::InvalidDirectory(format!(
            "`{}` must be absolute",
            dir.display()
        )));
    }
    Ok(dir.to_path_buf())
}

fn describe(level: LevelFilter, dir: &Path) -> String {
    format!("level={level} dir={}", dir.display())
}

fn install_panic_hook() {
    if PANIC_HOOK.set(()).is_err() {
        return;
    }
    let chained = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let at = info.location().map_or_else(
            || "unknown".to_string(),
            |loc| format!("{}:{}", loc.file(), loc.line()),
        );
        error!(
            "event=panic module=logging status=error at={} payload={}",
            at,
            one_line(&panic_payload(info.payload()), PANIC_LINE_MAX_CHARS)
        );
        chained(info);
    }));
}

fn panic_payload(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|text| (*text).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<non-string payload>".to_string())
}

/// Flattens `value` onto one line and caps it at `max_chars`.
fn one_line(value: &str, max_chars: usize) -> String {
    let flat: String = value
        .chars()
        .map(|ch| if ch == '\n' || ch == '\r' { ' ' } else { ch })
        .collect();
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut capped: String = flat.chars().take(max_chars).collect();
    capped.push_str("...");
    capped
}

#[cfg(test)]
mod tests {
    use super::{
        check_dir, init_from_config, init_logging, logging_status, one_line, parse_level,
        LoggingError,
    };
    use crate::config::LoggingConfig;
    use log::LevelFilter;
    use std::path::Path;

    #[test]
    fn level_names_are_case_insensitive() {
        assert_eq!(parse_level("INFO"), Ok(LevelFilter::Info));
        assert_eq!(parse_level(" warning "), Ok(LevelFilter::Warn));
        assert!(matches!(
            parse_level("off"),
            Err(LoggingError::UnsupportedLevel(_))
        ));
        assert!(matches!(
            parse_level("loud"),
            Err(LoggingError::UnsupportedLevel(_))
        ));
    }

    #[test]
    fn relative_dir_is_rejected() {
        assert!(matches!(
            check_dir(Path::new("logs/dev")),
            Err(LoggingError::InvalidDirectory(_))
        ));
    }

    #[test]
    fn panic_text_is_flattened_and_capped() {
        let line = one_line("line1\nline2\rline3", 8);
        assert_eq!(line, "line1 li...");
        assert_eq!(one_line("short", 8), "short");
    }

    #[test]
    fn missing_dir_leaves_logging_off() {
        assert_eq!(init_from_config(&LoggingConfig::default()), Ok(false));
    }

    #[test]
    fn reinit_is_idempotent_and_conflicts_are_rejected() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();

        init_logging("info", first.path()).unwrap();
        init_logging("INFO", first.path()).unwrap();
        assert!(matches!(
            init_logging("debug", first.path()),
            Err(LoggingError::Conflict { .. })
        ));
        assert!(matches!(
            init_logging("info", second.path()),
            Err(LoggingError::Conflict { .. })
        ));

        let (level, dir) = logging_status().unwrap();
        assert_eq!(level, LevelFilter::Info);
        assert_eq!(dir, first.path());
    }
}
