//! Calendar source backed by the Google Calendar events API.
//!
//! # Responsibility
//! - List expanded single events inside a time window, one page per call.
//! - Map event start to a due value and end minus start to a duration hint.
//!
//! # Invariants
//! - Cancelled events are never returned as records.
//! - All-day events keep their date-only start; resolution to an instant
//!   happens later in the owning user's zone.

use crate::config::{CalendarConfig, ConfigError};
use crate::model::task::SourceKind;
use crate::sync::adapter::{
    ExternalApiError, ExternalApiErrorKind, ExternalSourceAdapter, FetchPage, FetchRequest,
    RemoteRecord,
};
use crate::sync::date::RemoteDue;
use crate::sync::notion::transport_kind;
use chrono::{DateTime, SecondsFormat};
use log::debug;
use reqwest::blocking::Client;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

const UNTITLED: &str = "(no title)";

pub struct GoogleCalendarAdapter {
    client: Client,
    api_base: String,
    access_token: String,
    calendar_id: String,
}

impl GoogleCalendarAdapter {
    pub fn from_config(config: &CalendarConfig, timeout: Duration) -> Result<Self, ConfigError> {
        let access_token = config.access_token()?;
        if config.calendar_id.trim().is_empty() {
            return Err(ConfigError::MissingCredentials {
                source: SourceKind::GoogleCalendar,
                field: "calendar_id",
            });
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ConfigError::InvalidValue {
                field: "calendar",
                message: format!("http client init failed: {err}"),
            })?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            calendar_id: config.calendar_id.trim().to_string(),
        })
    }

    /// `{base}/calendars/{calendar_id}/events` with the id percent-encoded.
    fn events_url(&self) -> Result<Url, ExternalApiError> {
        let mut url = Url::parse(&self.api_base).map_err(|err| {
            self.error(
                ExternalApiErrorKind::Unreachable,
                format!("invalid api base: {err}"),
            )
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                self.error(
                    ExternalApiErrorKind::Unreachable,
                    "api base cannot carry a path",
                )
            })?
            .pop_if_empty()
            .extend(["calendars", self.calendar_id.as_str(), "events"]);
        Ok(url)
    }

    fn query_params(request: &FetchRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
            ("maxResults", request.effective_page_size().to_string()),
        ];
        if let Some(time_min) = request.time_min {
            params.push(("timeMin", time_min.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }
        if let Some(time_max) = request.time_max {
            params.push(("timeMax", time_max.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }
        if let Some(cursor) = &request.cursor {
            params.push(("pageToken", cursor.clone()));
        }
        params
    }

    fn error(&self, kind: ExternalApiErrorKind, message: impl Into<String>) -> ExternalApiError {
        ExternalApiError::new(SourceKind::GoogleCalendar, kind, message)
    }
}

impl ExternalSourceAdapter for GoogleCalendarAdapter {
    fn source_kind(&self) -> SourceKind {
        SourceKind::GoogleCalendar
    }

    fn fetch(&self, request: &FetchRequest) -> Result<FetchPage, ExternalApiError> {
        let response = self
            .client
            .get(self.events_url()?)
            .bearer_auth(&self.access_token)
            .query(&Self::query_params(request))
            .send()
            .map_err(|err| self.error(transport_kind(&err), err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .map(|body| body.error.message)
                .unwrap_or_else(|| status.to_string());
            return Err(self.error(ExternalApiErrorKind::from_status(status.as_u16()), message));
        }

        let body: EventsResponse = response
            .json()
            .map_err(|err| self.error(ExternalApiErrorKind::InvalidResponse, err.to_string()))?;
        let page = map_events_response(body);
        debug!(
            "event=source_fetch module=sync source=google_calendar status=ok records={} has_more={}",
            page.records.len(),
            page.next_cursor.is_some()
        );
        Ok(page)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsResponse {
    #[serde(default)]
    items: Vec<CalendarEvent>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarEvent {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    start: Option<EventTime>,
    #[serde(default)]
    end: Option<EventTime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    date: Option<String>,
    date_time: Option<String>,
    time_zone: Option<String>,
}

impl EventTime {
    fn to_remote_due(&self) -> Option<RemoteDue> {
        if let Some(date_time) = &self.date_time {
            return Some(RemoteDue::parse(date_time, self.time_zone.as_deref()));
        }
        self.date.as_deref().map(|date| RemoteDue::parse(date, None))
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

fn map_events_response(body: EventsResponse) -> FetchPage {
    let records = body
        .items
        .into_iter()
        .filter(|event| event.status.as_deref() != Some("cancelled"))
        .map(|event| RemoteRecord {
            source: SourceKind::GoogleCalendar,
            title: event
                .summary
                .as_deref()
                .map(str::trim)
                .filter(|summary| !summary.is_empty())
                .unwrap_or(UNTITLED)
                .to_string(),
            due: event.start.as_ref().and_then(EventTime::to_remote_due),
            duration_minutes: event_minutes(event.start.as_ref(), event.end.as_ref()),
            external_id: event.id,
        })
        .collect();

    FetchPage {
        records,
        next_cursor: body.next_page_token,
    }
}

fn event_minutes(start: Option<&EventTime>, end: Option<&EventTime>) -> Option<u32> {
    let start = DateTime::parse_from_rfc3339(start?.date_time.as_deref()?).ok()?;
    let end = DateTime::parse_from_rfc3339(end?.date_time.as_deref()?).ok()?;
    u32::try_from((end - start).num_minutes()).ok()
}
