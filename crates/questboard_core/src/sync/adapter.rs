//! External source adapter contract.
//!
//! # Responsibility
//! - Define the one capability the reconciler needs from a source:
//!   fetch a bounded page of remote records.
//! - Define the error envelope for fetch failures.
//!
//! # Invariants
//! - A page never holds more than [`MAX_PAGE_SIZE`] records.
//! - Adapters own auth and query construction; callers paginate explicitly
//!   with the returned cursor.
//! - A failed fetch returns an error and no records.

use crate::model::task::SourceKind;
use crate::sync::date::RemoteDue;
use chrono::{DateTime, Utc};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Upper bound accepted by both supported services.
pub const MAX_PAGE_SIZE: u32 = 100;

/// One record fetched from an external source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRecord {
    pub source: SourceKind,
    pub external_id: String,
    pub title: String,
    pub due: Option<RemoteDue>,
    pub duration_minutes: Option<u32>,
}

/// Fetch filter and pagination state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Text terms OR-ed together; used by the structured-database source.
    pub text_terms: Vec<String>,
    /// Lower bound on event start; used by the calendar source.
    pub time_min: Option<DateTime<Utc>>,
    /// Upper bound on event start; used by the calendar source.
    pub time_max: Option<DateTime<Utc>>,
    pub cursor: Option<String>,
    pub page_size: u32,
}

impl Default for FetchRequest {
    fn default() -> Self {
        Self {
            text_terms: Vec::new(),
            time_min: None,
            time_max: None,
            cursor: None,
            page_size: MAX_PAGE_SIZE,
        }
    }
}

impl FetchRequest {
    /// Page size clamped into `1..=MAX_PAGE_SIZE`.
    pub fn effective_page_size(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    /// Same filter, next page.
    pub fn with_cursor(&self, cursor: Option<String>) -> Self {
        Self {
            cursor,
            ..self.clone()
        }
    }
}

/// One page of fetched records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchPage {
    pub records: Vec<RemoteRecord>,
    /// `None` when this was the last page.
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalApiErrorKind {
    Unreachable,
    Timeout,
    RateLimited,
    Unauthorized,
    /// Non-success status not covered above.
    Http(u16),
    /// Response body did not match the expected shape.
    InvalidResponse,
}

impl ExternalApiErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Unauthorized => "unauthorized",
            Self::Http(_) => "http_status",
            Self::InvalidResponse => "invalid_response",
        }
    }

    /// Maps an HTTP status to an error kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Unauthorized,
            429 => Self::RateLimited,
            other => Self::Http(other),
        }
    }
}

/// Fetch failure for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalApiError {
    pub source: SourceKind,
    pub kind: ExternalApiErrorKind,
    pub message: String,
}

impl ExternalApiError {
    pub fn new(source: SourceKind, kind: ExternalApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            source,
            kind,
            message: message.into(),
        }
    }

    /// Whether the stored credentials were rejected.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.kind, ExternalApiErrorKind::Unauthorized)
    }
}

impl Display for ExternalApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} fetch failed ({}): {}",
            self.source,
            self.kind.as_str(),
            self.message
        )
    }
}

impl Error for ExternalApiError {}

/// Capability implemented once per external source.
pub trait ExternalSourceAdapter: Send + Sync {
    fn source_kind(&self) -> SourceKind;

    /// Fetches one page of records matching `request`.
    fn fetch(&self, request: &FetchRequest) -> Result<FetchPage, ExternalApiError>;
}
