//! Error taxonomy for aggregation, column declarations, and remote table access.

use thiserror::Error;

/// Errors raised by the library layer.
///
/// The CLI wraps these in `anyhow` with context describing the step that failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// A log line could not be read as `book,rater,rating`.
    #[error("malformed rating row at line {line}: {reason}")]
    MalformedRow {
        /// 1-based physical line number in the log.
        line: u64,
        /// What was wrong with the row.
        reason: String,
    },

    /// Strict lookup of a book that never appeared in the log.
    #[error("unknown book '{book}'")]
    UnknownBook {
        /// The normalized name that was looked up.
        book: String,
    },

    /// The remote store did not return a well-formed table schema.
    #[error("failed to retrieve column keys for table {table_id}: {reason}")]
    SchemaFetch {
        /// Target table identifier.
        table_id: String,
        /// Remote message or shape problem.
        reason: String,
    },

    /// The remote store reported an error-shaped response to a request.
    #[error("remote {operation} failed{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    RemoteWrite {
        /// The store operation, e.g. `create_row`.
        operation: &'static str,
        /// HTTP status when one was received.
        status: Option<u16>,
        /// Remote message.
        message: String,
    },

    /// A row dictionary lacks a value for a declared column.
    #[error("row is missing a value for column '{column}'")]
    MissingColumnValue {
        /// Column name.
        column: String,
    },

    /// The declared column set is inconsistent.
    #[error("invalid column declarations: {reason}")]
    InvalidColumns {
        /// Which rule was violated.
        reason: String,
    },

    /// A cell value cannot be encoded in its column's semantic type.
    #[error("column '{column}' expects a {expected} value but received '{found}'")]
    ValueType {
        /// Column name.
        column: String,
        /// Semantic type name.
        expected: &'static str,
        /// Offending value after sanitizing.
        found: String,
    },

    /// The row scan did not finish within the configured page cap.
    #[error("row scan did not finish after {pages} page(s)")]
    PaginationLimit {
        /// Pages consumed before giving up.
        pages: usize,
    },

    /// The request never produced a response (connection, timeout, body decoding).
    #[error("transport failure: {message}")]
    Transport {
        /// Underlying error text.
        message: String,
    },
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
