//! Remote tabular-store collaborator.
//!
//! [`TableStore`] is the seam between reconciliation/sync logic and a concrete
//! backend. [`crate::notion::NotionClient`] talks to the Notion API;
//! [`MemoryStore`] keeps everything in process for tests and rehearsals.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, MutexGuard, PoisonError},
};

use serde::Serialize;
use uuid::Uuid;

use crate::{
    columns::SemanticType,
    error::{Result, SyncError},
};

/// Rows requested per page while scanning a table.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Column names present in the remote table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoteSchema {
    pub columns: BTreeSet<String>,
    /// The title column, which the store never lets us remove.
    pub primary: Option<String>,
}

impl RemoteSchema {
    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub semantic_type: SemanticType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SchemaChange {
    Add(ColumnDefinition),
    Remove { name: String },
    RenamePrimary { from: String, to: String },
}

impl SchemaChange {
    pub fn column(&self) -> &str {
        match self {
            SchemaChange::Add(definition) => &definition.name,
            SchemaChange::Remove { name } => name,
            SchemaChange::RenamePrimary { to, .. } => to,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RowRef {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowPage {
    pub rows: Vec<RowRef>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

/// Encoded cell ready for the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Title(String),
    Text(String),
    Number(f64),
}

pub type RowProperties = BTreeMap<String, PropertyValue>;

/// Blocking RPC surface of a remote table.
pub trait TableStore {
    fn retrieve_schema(&self, table_id: &str) -> Result<RemoteSchema>;

    /// Applies column changes in the given order.
    fn update_schema(&self, table_id: &str, changes: &[SchemaChange]) -> Result<()>;

    fn create_row(&self, table_id: &str, properties: &RowProperties) -> Result<RowRef>;

    fn query_rows(
        &self,
        table_id: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<RowPage>;

    /// Soft-deletes a row so it no longer appears in queries.
    fn archive_row(&self, row_id: &str) -> Result<()>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// Store operations, used to record calls and inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    RetrieveSchema,
    UpdateSchema,
    CreateRow,
    QueryRows,
    ArchiveRow,
}

impl StoreOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOperation::RetrieveSchema => "retrieve_schema",
            StoreOperation::UpdateSchema => "update_schema",
            StoreOperation::CreateRow => "create_row",
            StoreOperation::QueryRows => "query_rows",
            StoreOperation::ArchiveRow => "archive_row",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRow {
    pub id: String,
    pub archived: bool,
    pub properties: RowProperties,
}

#[derive(Debug, Default)]
struct MemoryTable {
    columns: BTreeMap<String, SemanticType>,
    rows: Vec<MemoryRow>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    calls: Vec<StoreOperation>,
    failing: Option<(StoreOperation, usize)>,
    endless_pages: bool,
}

/// In-process [`TableStore`] for tests and rehearsals.
///
/// Cursors are row offsets into the live (non-archived) row list at query time.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding one empty table with the given columns.
    pub fn with_table<'a>(
        table_id: &str,
        columns: impl IntoIterator<Item = (&'a str, SemanticType)>,
    ) -> Self {
        let store = Self::new();
        store.lock().tables.insert(
            table_id.to_string(),
            MemoryTable {
                columns: columns
                    .into_iter()
                    .map(|(name, kind)| (name.to_string(), kind))
                    .collect(),
                rows: Vec::new(),
            },
        );
        store
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `operation` fail after it has succeeded `after` more times.
    pub fn fail_after(&self, operation: StoreOperation, after: usize) {
        self.lock().failing = Some((operation, after));
    }

    pub fn clear_failure(&self) {
        self.lock().failing = None;
    }

    /// Makes every query report another page, for pagination cap tests.
    pub fn set_endless_pagination(&self, endless: bool) {
        self.lock().endless_pages = endless;
    }

    pub fn calls(&self) -> Vec<StoreOperation> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, operation: StoreOperation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| **call == operation)
            .count()
    }

    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn column_types(&self, table_id: &str) -> BTreeMap<String, SemanticType> {
        self.lock()
            .tables
            .get(table_id)
            .map(|table| table.columns.clone())
            .unwrap_or_default()
    }

    /// Non-archived rows in insertion order.
    pub fn live_rows(&self, table_id: &str) -> Vec<MemoryRow> {
        self.lock()
            .tables
            .get(table_id)
            .map(|table| table.rows.iter().filter(|row| !row.archived).cloned().collect())
            .unwrap_or_default()
    }

    pub fn archived_count(&self, table_id: &str) -> usize {
        self.lock()
            .tables
            .get(table_id)
            .map_or(0, |table| table.rows.iter().filter(|row| row.archived).count())
    }

    /// Records the call and applies any injected failure.
    fn begin(&self, operation: StoreOperation) -> Result<MutexGuard<'_, MemoryState>> {
        let mut state = self.lock();
        state.calls.push(operation);
        if let Some((failing, remaining)) = state.failing.as_mut()
            && *failing == operation
        {
            if *remaining == 0 {
                return Err(SyncError::RemoteWrite {
                    operation: operation.as_str(),
                    status: Some(500),
                    message: "injected failure".to_string(),
                });
            }
            *remaining -= 1;
        }
        Ok(state)
    }
}

fn unknown_table(operation: StoreOperation, table_id: &str) -> SyncError {
    SyncError::RemoteWrite {
        operation: operation.as_str(),
        status: Some(404),
        message: format!("Could not find table with ID: {table_id}"),
    }
}

impl TableStore for MemoryStore {
    fn retrieve_schema(&self, table_id: &str) -> Result<RemoteSchema> {
        let state = self.begin(StoreOperation::RetrieveSchema).map_err(|err| {
            SyncError::SchemaFetch {
                table_id: table_id.to_string(),
                reason: err.to_string(),
            }
        })?;
        let table = state
            .tables
            .get(table_id)
            .ok_or_else(|| SyncError::SchemaFetch {
                table_id: table_id.to_string(),
                reason: "object is not a database".to_string(),
            })?;
        Ok(RemoteSchema {
            columns: table.columns.keys().cloned().collect(),
            primary: table
                .columns
                .iter()
                .find(|(_, kind)| **kind == SemanticType::Title)
                .map(|(name, _)| name.clone()),
        })
    }

    fn update_schema(&self, table_id: &str, changes: &[SchemaChange]) -> Result<()> {
        let operation = StoreOperation::UpdateSchema;
        let mut state = self.begin(operation)?;
        let table = state
            .tables
            .get_mut(table_id)
            .ok_or_else(|| unknown_table(operation, table_id))?;
        for change in changes {
            match change {
                SchemaChange::Add(definition) => {
                    let has_title = table
                        .columns
                        .values()
                        .any(|kind| *kind == SemanticType::Title);
                    if definition.semantic_type == SemanticType::Title && has_title {
                        return Err(SyncError::RemoteWrite {
                            operation: operation.as_str(),
                            status: Some(400),
                            message: "a table can only have one title property".to_string(),
                        });
                    }
                    table
                        .columns
                        .insert(definition.name.clone(), definition.semantic_type);
                }
                SchemaChange::Remove { name } => {
                    if table.columns.get(name) == Some(&SemanticType::Title) {
                        return Err(SyncError::RemoteWrite {
                            operation: operation.as_str(),
                            status: Some(400),
                            message: format!("cannot delete title property '{name}'"),
                        });
                    }
                    table.columns.remove(name);
                }
                SchemaChange::RenamePrimary { from, to } => {
                    let kind = table.columns.remove(from).ok_or_else(|| {
                        SyncError::RemoteWrite {
                            operation: operation.as_str(),
                            status: Some(400),
                            message: format!("property '{from}' does not exist"),
                        }
                    })?;
                    table.columns.insert(to.clone(), kind);
                }
            }
        }
        Ok(())
    }

    fn create_row(&self, table_id: &str, properties: &RowProperties) -> Result<RowRef> {
        let operation = StoreOperation::CreateRow;
        let mut state = self.begin(operation)?;
        let table = state
            .tables
            .get_mut(table_id)
            .ok_or_else(|| unknown_table(operation, table_id))?;
        if let Some(unknown) = properties
            .keys()
            .find(|name| !table.columns.contains_key(name.as_str()))
        {
            return Err(SyncError::RemoteWrite {
                operation: operation.as_str(),
                status: Some(400),
                message: format!("{unknown} is not a property that exists"),
            });
        }
        let id = Uuid::new_v4().to_string();
        table.rows.push(MemoryRow {
            id: id.clone(),
            archived: false,
            properties: properties.clone(),
        });
        Ok(RowRef { id })
    }

    fn query_rows(
        &self,
        table_id: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<RowPage> {
        let operation = StoreOperation::QueryRows;
        let state = self.begin(operation)?;
        let table = state
            .tables
            .get(table_id)
            .ok_or_else(|| unknown_table(operation, table_id))?;
        let offset = match cursor {
            Some(raw) => raw.parse::<usize>().map_err(|_| SyncError::RemoteWrite {
                operation: operation.as_str(),
                status: Some(400),
                message: format!("invalid start_cursor '{raw}'"),
            })?,
            None => 0,
        };
        let live = table.rows.iter().filter(|row| !row.archived).collect::<Vec<_>>();
        let end = offset.saturating_add(page_size.max(1)).min(live.len());
        let rows = live
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|row| RowRef { id: row.id.clone() })
            .collect();
        let has_more = state.endless_pages || end < live.len();
        Ok(RowPage {
            rows,
            has_more,
            next_cursor: has_more.then(|| end.to_string()),
        })
    }

    fn archive_row(&self, row_id: &str) -> Result<()> {
        let operation = StoreOperation::ArchiveRow;
        let mut state = self.begin(operation)?;
        let row = state
            .tables
            .values_mut()
            .flat_map(|table| table.rows.iter_mut())
            .find(|row| row.id == row_id)
            .ok_or_else(|| SyncError::RemoteWrite {
                operation: operation.as_str(),
                status: Some(404),
                message: format!("Could not find page with ID: {row_id}"),
            })?;
        row.archived = true;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
