//! Structured-database source backed by the Notion database query API.
//!
//! # Responsibility
//! - Build `databases/{id}/query` requests: bearer auth, OR-ed
//!   "property contains text" filter, cursor pagination.
//! - Map result pages to [`RemoteRecord`] through a configurable property map.
//!
//! # Invariants
//! - Archived and trashed pages are not returned as records.
//! - A page with no readable title keeps its id and gets `Untitled`.

use crate::config::{ConfigError, NotionConfig};
use crate::model::task::SourceKind;
use crate::sync::adapter::{
    ExternalApiError, ExternalApiErrorKind, ExternalSourceAdapter, FetchPage, FetchRequest,
    RemoteRecord,
};
use crate::sync::date::RemoteDue;
use log::debug;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

pub const NOTION_API_VERSION: &str = "2022-06-28";
const UNTITLED: &str = "Untitled";

/// Which page properties feed which record fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotionPropertyMap {
    pub title_property: String,
    pub due_property: String,
    pub duration_property: Option<String>,
}

impl From<&NotionConfig> for NotionPropertyMap {
    fn from(config: &NotionConfig) -> Self {
        Self {
            title_property: config.title_property.clone(),
            due_property: config.due_property.clone(),
            duration_property: config.duration_property.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TextFilter {
    property: String,
    property_type: String,
}

pub struct NotionAdapter {
    client: Client,
    api_base: String,
    token: String,
    database_id: String,
    properties: NotionPropertyMap,
    filter: Option<TextFilter>,
}

impl NotionAdapter {
    /// Builds an adapter from configuration; fails when credentials are missing.
    pub fn from_config(config: &NotionConfig, timeout: Duration) -> Result<Self, ConfigError> {
        let (token, database_id) = config.credentials()?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ConfigError::InvalidValue {
                field: "notion",
                message: format!("http client init failed: {err}"),
            })?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            database_id: database_id.to_string(),
            properties: NotionPropertyMap::from(config),
            filter: config.filter_property.as_ref().map(|property| TextFilter {
                property: property.clone(),
                property_type: config.filter_property_type.clone(),
            }),
        })
    }

    fn query_body(&self, request: &FetchRequest) -> Value {
        let mut body = Map::new();
        body.insert("page_size".to_string(), json!(request.effective_page_size()));
        if let Some(cursor) = &request.cursor {
            body.insert("start_cursor".to_string(), json!(cursor));
        }
        if let Some(filter) = self.text_filter(&request.text_terms) {
            body.insert("filter".to_string(), filter);
        }
        Value::Object(body)
    }

    fn text_filter(&self, terms: &[String]) -> Option<Value> {
        let filter = self.filter.as_ref()?;
        let predicates: Vec<Value> = terms
            .iter()
            .map(|term| term.trim())
            .filter(|term| !term.is_empty())
            .map(|term| {
                let mut predicate = Map::new();
                predicate.insert("property".to_string(), json!(filter.property));
                predicate.insert(filter.property_type.clone(), json!({ "contains": term }));
                Value::Object(predicate)
            })
            .collect();
        if predicates.is_empty() {
            return None;
        }
        Some(json!({ "or": predicates }))
    }

    fn error(&self, kind: ExternalApiErrorKind, message: impl Into<String>) -> ExternalApiError {
        ExternalApiError::new(SourceKind::Notion, kind, message)
    }
}

impl ExternalSourceAdapter for NotionAdapter {
    fn source_kind(&self) -> SourceKind {
        SourceKind::Notion
    }

    fn fetch(&self, request: &FetchRequest) -> Result<FetchPage, ExternalApiError> {
        let url = format!("{}/databases/{}/query", self.api_base, self.database_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_API_VERSION)
            .json(&self.query_body(request))
            .send()
            .map_err(|err| self.error(transport_kind(&err), err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(self.error(
                ExternalApiErrorKind::from_status(status.as_u16()),
                error_message(&body).unwrap_or_else(|| status.to_string()),
            ));
        }

        let body: QueryResponse = response
            .json()
            .map_err(|err| self.error(ExternalApiErrorKind::InvalidResponse, err.to_string()))?;
        let page = map_query_response(body, &self.properties);
        debug!(
            "event=source_fetch module=sync source=notion status=ok records={} has_more={}",
            page.records.len(),
            page.next_cursor.is_some()
        );
        Ok(page)
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<NotionPage>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NotionPage {
    id: String,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    in_trash: bool,
    #[serde(default)]
    properties: Map<String, Value>,
}

fn map_query_response(body: QueryResponse, properties: &NotionPropertyMap) -> FetchPage {
    let records = body
        .results
        .into_iter()
        .filter(|page| !page.archived && !page.in_trash)
        .map(|page| RemoteRecord {
            source: SourceKind::Notion,
            title: page_title(&page.properties, &properties.title_property),
            due: page_due(&page.properties, &properties.due_property),
            duration_minutes: properties
                .duration_property
                .as_deref()
                .and_then(|name| page_number(&page.properties, name)),
            external_id: page.id,
        })
        .collect();

    FetchPage {
        records,
        next_cursor: if body.has_more { body.next_cursor } else { None },
    }
}

fn page_title(properties: &Map<String, Value>, preferred: &str) -> String {
    let named = properties.get(preferred).filter(|value| is_type(value, "title"));
    let fallback = || properties.values().find(|value| is_type(value, "title"));
    named
        .or_else(fallback)
        .map(|value| plain_text(&value["title"]))
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string())
}

fn page_due(properties: &Map<String, Value>, name: &str) -> Option<RemoteDue> {
    let date = &properties.get(name)?["date"];
    let start = date["start"].as_str()?;
    Some(RemoteDue::parse(start, date["time_zone"].as_str()))
}

fn page_number(properties: &Map<String, Value>, name: &str) -> Option<u32> {
    let value = properties.get(name)?["number"].as_f64()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value.round().min(f64::from(u32::MAX)) as u32)
}

fn is_type(value: &Value, kind: &str) -> bool {
    value["type"].as_str() == Some(kind)
}

fn plain_text(rich_text: &Value) -> String {
    rich_text
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part["plain_text"].as_str())
                .collect::<String>()
        })
        .unwrap_or_default()
}

fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value["message"].as_str().map(str::to_string)
}

pub(crate) fn transport_kind(err: &reqwest::Error) -> ExternalApiErrorKind {
    if err.is_timeout() {
        ExternalApiErrorKind::Timeout
    } else if err.is_decode() {
        ExternalApiErrorKind::InvalidResponse
    } else {
        ExternalApiErrorKind::Unreachable
    }
}

#[cfg(test)]
mod tests {
    use super::{map_query_response, NotionAdapter, NotionPropertyMap, QueryResponse};
    use crate::config::{ConfigError, NotionConfig};
    use crate::sync::adapter::FetchRequest;
    use crate::sync::date::RemoteDue;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::time::Duration;

    fn property_map() -> NotionPropertyMap {
        NotionPropertyMap {
            title_property: "Name".to_string(),
            due_property: "Due".to_string(),
            duration_property: Some("Minutes".to_string()),
        }
    }

    fn configured() -> NotionConfig {
        NotionConfig {
            token: Some("secret_abc".to_string()),
            database_id: Some("db-1".to_string()),
            filter_property: Some("Tags".to_string()),
            ..NotionConfig::default()
        }
    }

    #[test]
    fn maps_pages_to_records() {
        let body: QueryResponse = serde_json::from_value(json!({
            "results": [
                {
                    "id": "page-1",
                    "properties": {
                        "Name": { "type": "title", "title": [
                            { "plain_text": "Write " }, { "plain_text": "report" }
                        ]},
                        "Due": { "type": "date", "date": { "start": "2024-06-15", "end": null } },
                        "Minutes": { "type": "number", "number": 45 }
                    }
                },
                {
                    "id": "page-2",
                    "archived": true,
                    "properties": {}
                },
                {
                    "id": "page-3",
                    "properties": {
                        "Task": { "type": "title", "title": [{ "plain_text": "Renamed column" }] },
                        "Due": { "type": "date", "date": null }
                    }
                }
            ],
            "has_more": true,
            "next_cursor": "cursor-2"
        }))
        .unwrap();

        let page = map_query_response(body, &property_map());

        assert_eq!(page.next_cursor.as_deref(), Some("cursor-2"));
        assert_eq!(page.records.len(), 2);
        let first = &page.records[0];
        assert_eq!(first.external_id, "page-1");
        assert_eq!(first.title, "Write report");
        assert_eq!(
            first.due,
            Some(RemoteDue::Date(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()))
        );
        assert_eq!(first.duration_minutes, Some(45));

        let second = &page.records[1];
        assert_eq!(second.title, "Renamed column");
        assert_eq!(second.due, None);
        assert_eq!(second.duration_minutes, None);
    }

    #[test]
    fn missing_title_falls_back_to_untitled() {
        let body: QueryResponse = serde_json::from_value(json!({
            "results": [{ "id": "page-9", "properties": { "Name": { "type": "title", "title": [] } } }],
            "has_more": false,
            "next_cursor": null
        }))
        .unwrap();
        let page = map_query_response(body, &property_map());
        assert_eq!(page.records[0].title, "Untitled");
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn query_body_ors_text_terms() {
        let adapter = NotionAdapter::from_config(&configured(), Duration::from_secs(5)).unwrap();
        let request = FetchRequest {
            text_terms: vec!["work".to_string(), " ".to_string(), "home".to_string()],
            cursor: Some("abc".to_string()),
            page_size: 250,
            ..FetchRequest::default()
        };

        let body = adapter.query_body(&request);

        assert_eq!(body["page_size"], json!(100));
        assert_eq!(body["start_cursor"], json!("abc"));
        assert_eq!(
            body["filter"],
            json!({ "or": [
                { "property": "Tags", "rich_text": { "contains": "work" } },
                { "property": "Tags", "rich_text": { "contains": "home" } }
            ]})
        );
    }

    #[test]
    fn query_body_omits_filter_without_terms() {
        let adapter = NotionAdapter::from_config(&configured(), Duration::from_secs(5)).unwrap();
        let body = adapter.query_body(&FetchRequest::default());
        assert!(body.get("filter").is_none());
        assert!(body.get("start_cursor").is_none());
    }

    #[test]
    fn requires_credentials() {
        let config = NotionConfig {
            database_id: Some("db-1".to_string()),
            ..NotionConfig::default()
        };
        assert!(matches!(
            NotionAdapter::from_config(&config, Duration::from_secs(5)),
            Err(ConfigError::MissingCredentials { field: "token", .. })
        ));
    }
}
