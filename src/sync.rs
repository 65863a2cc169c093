//! Row synchronization: clear the remote table, then insert one row per book.
//!
//! Rows are disposable. Every run archives all existing rows before inserting
//! the full aggregated set, so re-running after a partial failure converges on
//! the same final rows.

use std::{collections::BTreeMap, fmt};

use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    columns::{ColumnSet, ColumnSpec, SemanticType},
    error::{Result, SyncError},
    ratings::RatingAggregator,
    reconcile::{ReconcileReport, SchemaReconciler},
    store::{DEFAULT_PAGE_SIZE, PropertyValue, RowProperties, RowRef, TableStore},
};

/// Upper bound on pages read by a single row scan.
pub const DEFAULT_MAX_PAGES: usize = 10_000;

/// A raw value produced for a column, before sanitizing and encoding.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Text(String),
    Number(f64),
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(text) => f.write_str(text),
            CellValue::Number(number) => write!(f, "{number}"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

/// Column name to raw value.
pub type RowValues = BTreeMap<String, CellValue>;

/// Sanitizes and encodes one cell for `column`.
pub fn encode_cell(column: &ColumnSpec, value: &CellValue) -> Result<PropertyValue> {
    let sanitized = match value {
        CellValue::Text(text) => CellValue::Text(column.sanitize(text)),
        CellValue::Number(number) => CellValue::Number(*number),
    };
    match (column.semantic_type, sanitized) {
        (SemanticType::Number, CellValue::Number(number)) => Ok(PropertyValue::Number(number)),
        (SemanticType::Number, CellValue::Text(text)) => text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|number| number.is_finite())
            .map(PropertyValue::Number)
            .ok_or_else(|| SyncError::ValueType {
                column: column.name.clone(),
                expected: SemanticType::Number.as_str(),
                found: text,
            }),
        (SemanticType::Text, cell) => Ok(PropertyValue::Text(cell.to_string())),
        (SemanticType::Title, cell) => Ok(PropertyValue::Title(cell.to_string())),
    }
}

/// Encodes a full row, requiring a value for every declared column.
pub fn encode_row(columns: &ColumnSet, values: &RowValues) -> Result<RowProperties> {
    columns
        .iter()
        .map(|column| {
            let value = values
                .get(&column.name)
                .ok_or_else(|| SyncError::MissingColumnValue {
                    column: column.name.clone(),
                })?;
            Ok::<_, SyncError>((column.name.clone(), encode_cell(column, value)?))
        })
        .collect()
}

/// Builds the row for one aggregated book from each column's value source.
pub fn build_row(
    aggregator: &RatingAggregator,
    columns: &ColumnSet,
    book: &str,
) -> Result<RowValues> {
    columns
        .iter()
        .map(|column| {
            let value = column.source.produce(aggregator, book)?;
            Ok::<_, SyncError>((column.name.clone(), value))
        })
        .collect()
}

/// Rows for every aggregated book, in descending order of normalized name.
pub fn build_rows(aggregator: &RatingAggregator, columns: &ColumnSet) -> Result<Vec<RowValues>> {
    aggregator
        .book_names()
        .into_iter()
        .map(|book| build_row(aggregator, columns, book))
        .collect()
}

/// Pages through every row of a table and archives them. Needs no column declarations.
pub struct RowScanner<'a, S: TableStore + ?Sized> {
    store: &'a S,
    table_id: &'a str,
    page_size: usize,
    max_pages: usize,
    dry_run: bool,
}

impl<'a, S: TableStore + ?Sized> RowScanner<'a, S> {
    pub fn new(store: &'a S, table_id: &'a str) -> Self {
        Self {
            store,
            table_id,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            dry_run: false,
        }
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// When set, archive calls are logged and skipped.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Follows the cursor until the store reports no further pages.
    pub fn list_all_rows(&self) -> Result<Vec<RowRef>> {
        let mut rows = Vec::new();
        let mut cursor: Option<String> = None;
        for page_number in 1..=self.max_pages {
            let page = self
                .store
                .query_rows(self.table_id, cursor.as_deref(), self.page_size)?;
            debug!(
                "Page {page_number} of table {} returned {} row(s)",
                self.table_id,
                page.rows.len()
            );
            rows.extend(page.rows);
            match (page.has_more, page.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                (true, None) => {
                    warn!("Store reported more rows without a cursor; ending scan");
                    return Ok(rows);
                }
                (false, _) => return Ok(rows),
            }
        }
        Err(SyncError::PaginationLimit {
            pages: self.max_pages,
        })
    }

    /// Scans every page, then archives each row. Returns the number of rows found.
    pub fn clear_all_rows(&self) -> Result<usize> {
        let rows = self.list_all_rows()?;
        if self.dry_run {
            warn!("Dry run: skipping archive of {} row(s)", rows.len());
            return Ok(rows.len());
        }
        for row in &rows {
            self.store.archive_row(&row.id)?;
        }
        info!("Archived {} row(s) from table {}", rows.len(), self.table_id);
        Ok(rows.len())
    }
}

/// Clears a table and inserts rows encoded against the declared columns.
pub struct RowSynchronizer<'a, S: TableStore + ?Sized> {
    scanner: RowScanner<'a, S>,
    columns: &'a ColumnSet,
}

impl<'a, S: TableStore + ?Sized> RowSynchronizer<'a, S> {
    pub fn new(store: &'a S, table_id: &'a str, columns: &'a ColumnSet) -> Self {
        Self {
            scanner: RowScanner::new(store, table_id),
            columns,
        }
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.scanner = self.scanner.page_size(page_size);
        self
    }

    pub fn max_pages(mut self, max_pages: usize) -> Self {
        self.scanner = self.scanner.max_pages(max_pages);
        self
    }

    /// When set, archive and create calls are logged and skipped.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.scanner = self.scanner.dry_run(dry_run);
        self
    }

    pub fn list_all_rows(&self) -> Result<Vec<RowRef>> {
        self.scanner.list_all_rows()
    }

    pub fn clear_all_rows(&self) -> Result<usize> {
        self.scanner.clear_all_rows()
    }

    /// Encodes `values` against the declared columns and creates the row.
    pub fn insert_row(&self, values: &RowValues) -> Result<Option<RowRef>> {
        let properties = encode_row(self.columns, values)?;
        if self.scanner.dry_run {
            debug!("Dry run: skipping create of {properties:?}");
            return Ok(None);
        }
        self.scanner
            .store
            .create_row(self.scanner.table_id, &properties)
            .map(Some)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub page_size: usize,
    pub max_pages: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub schema: ReconcileReport,
    pub rows_cleared: usize,
    pub rows_inserted: usize,
    pub dry_run: bool,
}

/// Reconciles the schema, clears all rows, then inserts one row per book.
pub fn run_pipeline<S: TableStore + ?Sized>(
    store: &S,
    table_id: &str,
    columns: &ColumnSet,
    aggregator: &RatingAggregator,
    options: &SyncOptions,
) -> Result<SyncReport> {
    let rows = build_rows(aggregator, columns)?;

    let schema = SchemaReconciler::new(store, table_id)
        .dry_run(options.dry_run)
        .converge(columns)?;

    let synchronizer = RowSynchronizer::new(store, table_id, columns)
        .page_size(options.page_size)
        .max_pages(options.max_pages)
        .dry_run(options.dry_run);
    let rows_cleared = synchronizer.clear_all_rows()?;

    let mut rows_inserted = 0usize;
    for row in &rows {
        if synchronizer.insert_row(row)?.is_some() {
            rows_inserted += 1;
        }
    }
    info!(
        "Inserted {rows_inserted} of {} row(s) into table {table_id}",
        rows.len()
    );

    Ok(SyncReport {
        schema,
        rows_cleared,
        rows_inserted,
        dry_run: options.dry_run,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::ValueSource;
    use crate::sanitize::Sanitizer;

    #[test]
    fn title_cells_are_sanitized_and_numbers_pass_through() {
        let title = ColumnSpec::title("Book Title", ValueSource::BookName)
            .with_sanitizers([Sanitizer::Trim, Sanitizer::Lowercase]);
        assert_eq!(
            encode_cell(&title, &CellValue::from("  Hello World ")).expect("title"),
            PropertyValue::Title("hello world".to_string())
        );

        let rating = ColumnSpec::new("Rating", SemanticType::Number, ValueSource::AverageRating)
            .with_sanitizers([Sanitizer::Trim]);
        assert_eq!(
            encode_cell(&rating, &CellValue::from(4.5)).expect("number"),
            PropertyValue::Number(4.5)
        );
        assert_eq!(
            encode_cell(&rating, &CellValue::from(" 2 ")).expect("numeric text"),
            PropertyValue::Number(2.0)
        );
    }

    #[test]
    fn non_numeric_text_in_number_column_is_rejected() {
        let rating = ColumnSpec::new("Rating", SemanticType::Number, ValueSource::AverageRating);
        let err = encode_cell(&rating, &CellValue::from("five")).expect_err("type");
        assert!(matches!(err, SyncError::ValueType { ref column, .. } if column == "Rating"));
    }

    #[test]
    fn numbers_render_as_text_for_text_columns() {
        let note = ColumnSpec::new("Count", SemanticType::Text, ValueSource::RatingCount);
        assert_eq!(
            encode_cell(&note, &CellValue::from(3.0)).expect("text"),
            PropertyValue::Text("3".to_string())
        );
    }

    #[test]
    fn missing_value_is_reported_by_column() {
        let columns = ColumnSet::book_defaults();
        let mut values = RowValues::new();
        values.insert("Book Title".to_string(), CellValue::from("Dune"));
        values.insert("Rating".to_string(), CellValue::from(4.0));
        let err = encode_row(&columns, &values).expect_err("missing");
        assert!(
            matches!(err, SyncError::MissingColumnValue { ref column } if column == "Number of Favorites")
        );
    }

    #[test]
    fn build_rows_follows_value_sources_in_descending_order() {
        let aggregator =
            RatingAggregator::from_log_text("Alpha,ann,5\nZeta,ann,3\nAlpha,bob,4\n").expect("ok");
        let rows = build_rows(&aggregator, &ColumnSet::book_defaults()).expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Book Title"], CellValue::from("zeta"));
        assert_eq!(rows[1]["Book Title"], CellValue::from("alpha"));
        assert_eq!(rows[1]["Rating"], CellValue::Number(4.5));
        assert_eq!(rows[1]["Number of Favorites"], CellValue::Number(1.0));
    }
}
