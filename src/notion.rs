//! [`TableStore`] backed by the Notion REST API.
//!
//! Tables are Notion databases and rows are pages. Requests are blocking with
//! connect and overall timeouts; nothing is retried here.

use std::{fmt, time::Duration};

use log::debug;
use reqwest::{Method, blocking::RequestBuilder};
use serde_json::{Map, Value, json};

use crate::{
    columns::{ColumnSet, SemanticType},
    error::{Result, SyncError},
    store::{
        PropertyValue, RemoteSchema, RowPage, RowProperties, RowRef, SchemaChange, TableStore,
    },
};

pub const DEFAULT_API_BASE_URL: &str = "https://api.notion.com";
pub const DEFAULT_NOTION_VERSION: &str = "2022-06-28";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = concat!("shelf-sync/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct NotionSettings {
    pub token: String,
    pub api_base_url: String,
    pub notion_version: String,
    pub timeout: Duration,
}

impl NotionSettings {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            notion_version: DEFAULT_NOTION_VERSION.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl fmt::Debug for NotionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionSettings")
            .field("token", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .field("notion_version", &self.notion_version)
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub struct NotionClient {
    settings: NotionSettings,
    http_client: reqwest::blocking::Client,
}

impl NotionClient {
    pub fn new(settings: NotionSettings) -> Result<Self> {
        if settings.token.trim().is_empty() {
            return Err(SyncError::Transport {
                message: "Notion token must not be empty".to_string(),
            });
        }
        let http_client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(settings.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|error| SyncError::Transport {
                message: error.to_string(),
            })?;
        Ok(Self {
            settings,
            http_client,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let endpoint = format!(
            "{}/v1/{}",
            self.settings.api_base_url.trim_end_matches('/'),
            path
        );
        debug!("{method} {endpoint}");
        self.http_client
            .request(method, endpoint)
            .bearer_auth(&self.settings.token)
            .header("Notion-Version", &self.settings.notion_version)
    }

    fn send(&self, operation: &'static str, request: RequestBuilder) -> Result<Value> {
        let response = request.send().map_err(|error| SyncError::Transport {
            message: format!("{operation}: {error}"),
        })?;
        let status = response.status();
        if !status.is_success() {
            // Gateways answer with HTML or nothing at all, so the body is only a hint.
            let text = response.text().unwrap_or_default();
            let message = match serde_json::from_str::<Value>(&text) {
                Ok(body) => error_message(&body),
                Err(_) if text.trim().is_empty() => status.to_string(),
                Err(_) => text.trim().to_string(),
            };
            return Err(SyncError::RemoteWrite {
                operation,
                status: Some(status.as_u16()),
                message,
            });
        }
        let body: Value = response.json().map_err(|error| SyncError::Transport {
            message: format!("{operation}: unreadable response body: {error}"),
        })?;
        if body["object"] == "error" {
            return Err(SyncError::RemoteWrite {
                operation,
                status: body["status"]
                    .as_u64()
                    .and_then(|code| u16::try_from(code).ok())
                    .or(Some(status.as_u16())),
                message: error_message(&body),
            });
        }
        Ok(body)
    }

    /// Creates a new table under `parent_page_id` with `columns`, returning its id.
    pub fn create_table(
        &self,
        parent_page_id: &str,
        title: &str,
        columns: &ColumnSet,
    ) -> Result<String> {
        columns.require_primary()?;
        let body = self.send(
            "create_table",
            self.request(Method::POST, "databases")
                .json(&create_table_payload(parent_page_id, title, columns)),
        )?;
        body["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SyncError::RemoteWrite {
                operation: "create_table",
                status: None,
                message: "response did not include a database id".to_string(),
            })
    }
}

impl TableStore for NotionClient {
    fn retrieve_schema(&self, table_id: &str) -> Result<RemoteSchema> {
        let body = self
            .send(
                "retrieve_schema",
                self.request(Method::GET, &format!("databases/{table_id}")),
            )
            .map_err(|err| SyncError::SchemaFetch {
                table_id: table_id.to_string(),
                reason: err.to_string(),
            })?;
        parse_schema(table_id, &body)
    }

    fn update_schema(&self, table_id: &str, changes: &[SchemaChange]) -> Result<()> {
        self.send(
            "update_schema",
            self.request(Method::PATCH, &format!("databases/{table_id}"))
                .json(&schema_update_payload(changes)),
        )?;
        Ok(())
    }

    fn create_row(&self, table_id: &str, properties: &RowProperties) -> Result<RowRef> {
        let body = self.send(
            "create_row",
            self.request(Method::POST, "pages")
                .json(&row_payload(table_id, properties)),
        )?;
        body["id"]
            .as_str()
            .filter(|id| !id.is_empty())
            .map(|id| RowRef { id: id.to_string() })
            .ok_or_else(|| SyncError::RemoteWrite {
                operation: "create_row",
                status: None,
                message: "response did not include a page id".to_string(),
            })
    }

    fn query_rows(
        &self,
        table_id: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<RowPage> {
        let body = self.send(
            "query_rows",
            self.request(Method::POST, &format!("databases/{table_id}/query"))
                .json(&query_payload(cursor, page_size)),
        )?;
        parse_row_page(&body)
    }

    fn archive_row(&self, row_id: &str) -> Result<()> {
        self.send(
            "archive_row",
            self.request(Method::PATCH, &format!("pages/{row_id}"))
                .json(&json!({ "archived": true })),
        )?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "notion"
    }
}

fn error_message(body: &Value) -> String {
    body["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

fn column_type_payload(kind: SemanticType) -> Value {
    match kind {
        SemanticType::Title => json!({ "title": {} }),
        SemanticType::Text => json!({ "rich_text": {} }),
        SemanticType::Number => json!({ "number": { "format": "number" } }),
    }
}

fn schema_update_payload(changes: &[SchemaChange]) -> Value {
    let mut properties = Map::new();
    for change in changes {
        match change {
            SchemaChange::Add(definition) => {
                properties.insert(
                    definition.name.clone(),
                    column_type_payload(definition.semantic_type),
                );
            }
            SchemaChange::Remove { name } => {
                properties.insert(name.clone(), Value::Null);
            }
            SchemaChange::RenamePrimary { from, to } => {
                properties.insert(from.clone(), json!({ "name": to }));
            }
        }
    }
    json!({ "properties": properties })
}

fn rich_text(content: &str) -> Value {
    json!([{ "type": "text", "text": { "content": content } }])
}

fn property_payload(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Title(text) => json!({ "title": rich_text(text) }),
        PropertyValue::Text(text) => json!({ "rich_text": rich_text(text) }),
        PropertyValue::Number(number) => json!({ "number": number }),
    }
}

fn row_payload(table_id: &str, properties: &RowProperties) -> Value {
    let properties = properties
        .iter()
        .map(|(name, value)| (name.clone(), property_payload(value)))
        .collect::<Map<_, _>>();
    json!({
        "parent": { "database_id": table_id },
        "properties": properties,
    })
}

fn query_payload(cursor: Option<&str>, page_size: usize) -> Value {
    let mut payload = json!({ "page_size": page_size });
    if let Some(cursor) = cursor {
        payload["start_cursor"] = Value::from(cursor);
    }
    payload
}

fn create_table_payload(parent_page_id: &str, title: &str, columns: &ColumnSet) -> Value {
    let properties = columns
        .iter()
        .map(|column| (column.name.clone(), column_type_payload(column.semantic_type)))
        .collect::<Map<_, _>>();
    json!({
        "parent": { "type": "page_id", "page_id": parent_page_id },
        "title": rich_text(title),
        "properties": properties,
    })
}

fn parse_schema(table_id: &str, body: &Value) -> Result<RemoteSchema> {
    let fetch_error = |reason: String| SyncError::SchemaFetch {
        table_id: table_id.to_string(),
        reason,
    };
    if body["object"] != "database" {
        return Err(fetch_error(format!(
            "expected a database object, received '{}'",
            body["object"].as_str().unwrap_or("nothing")
        )));
    }
    let properties = body["properties"]
        .as_object()
        .ok_or_else(|| fetch_error("database has no properties object".to_string()))?;
    let primary = properties
        .iter()
        .find(|(_, property)| property["type"] == "title")
        .map(|(name, _)| name.clone());
    Ok(RemoteSchema {
        columns: properties.keys().cloned().collect(),
        primary,
    })
}

fn parse_row_page(body: &Value) -> Result<RowPage> {
    let results = body["results"]
        .as_array()
        .ok_or_else(|| SyncError::RemoteWrite {
            operation: "query_rows",
            status: None,
            message: "query response has no results array".to_string(),
        })?;
    let rows = results
        .iter()
        .filter_map(|page| page["id"].as_str())
        .map(|id| RowRef { id: id.to_string() })
        .collect();
    Ok(RowPage {
        rows,
        has_more: body["has_more"].as_bool().unwrap_or(false),
        next_cursor: body["next_cursor"].as_str().map(str::to_string),
    })
}
