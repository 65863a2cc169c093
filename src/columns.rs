//! Declared output columns.
//!
//! Each [`ColumnSpec`] names a remote column, its semantic type, the sanitizers
//! applied to outgoing text, the statistic that produces its value, and whether
//! it is the table's primary (title) column. A [`ColumnSet`] is validated once
//! at startup and is immutable afterwards. Declarations can be loaded from and
//! saved to YAML.

use std::{collections::BTreeSet, fmt, fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    error::SyncError,
    ratings::RatingAggregator,
    sanitize::{Sanitizer, apply_pipeline},
    store::ColumnDefinition,
    sync::CellValue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Text,
    Number,
    Title,
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Text => "text",
            SemanticType::Number => "number",
            SemanticType::Title => "title",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The per-book statistic a column is filled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    BookName,
    AverageRating,
    FavoriteCount,
    RatingCount,
}

impl ValueSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueSource::BookName => "book_name",
            ValueSource::AverageRating => "average_rating",
            ValueSource::FavoriteCount => "favorite_count",
            ValueSource::RatingCount => "rating_count",
        }
    }

    /// Produces the raw cell for `book` from the finished aggregation.
    pub fn produce(
        &self,
        aggregator: &RatingAggregator,
        book: &str,
    ) -> Result<CellValue, SyncError> {
        Ok(match self {
            ValueSource::BookName => CellValue::Text(aggregator.canonical_name(book)),
            ValueSource::AverageRating => CellValue::Number(aggregator.average_rating(book)?),
            ValueSource::FavoriteCount => CellValue::Number(aggregator.favorite_count(book) as f64),
            ValueSource::RatingCount => CellValue::Number(aggregator.rating_count(book) as f64),
        })
    }
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub semantic_type: SemanticType,
    pub source: ValueSource,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sanitizers: Vec<Sanitizer>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub primary: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, semantic_type: SemanticType, source: ValueSource) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            source,
            sanitizers: Vec::new(),
            primary: false,
        }
    }

    /// A title column marked as the table's primary key.
    pub fn title(name: impl Into<String>, source: ValueSource) -> Self {
        Self {
            primary: true,
            ..Self::new(name, SemanticType::Title, source)
        }
    }

    pub fn with_sanitizers(mut self, sanitizers: impl IntoIterator<Item = Sanitizer>) -> Self {
        self.sanitizers = sanitizers.into_iter().collect();
        self
    }

    pub fn sanitize(&self, raw: &str) -> String {
        apply_pipeline(&self.sanitizers, raw)
    }

    pub fn definition(&self) -> ColumnDefinition {
        ColumnDefinition {
            name: self.name.clone(),
            semantic_type: self.semantic_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSet {
    columns: Vec<ColumnSpec>,
}

impl ColumnSet {
    pub fn new(columns: Vec<ColumnSpec>) -> Result<Self, SyncError> {
        let set = Self { columns };
        set.validate()?;
        Ok(set)
    }

    /// `Book Title` (primary, trimmed and lower-cased), `Rating`, `Number of Favorites`.
    pub fn book_defaults() -> Self {
        Self {
            columns: vec![
                ColumnSpec::title("Book Title", ValueSource::BookName)
                    .with_sanitizers([Sanitizer::Trim, Sanitizer::Lowercase]),
                ColumnSpec::new("Rating", SemanticType::Number, ValueSource::AverageRating),
                ColumnSpec::new(
                    "Number of Favorites",
                    SemanticType::Number,
                    ValueSource::FavoriteCount,
                ),
            ],
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening column file {path:?}"))?;
        let set: ColumnSet = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing column YAML {path:?}"))?;
        set.validate()
            .with_context(|| format!("Validating columns in {path:?}"))?;
        Ok(set)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating column file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing column YAML")
    }

    fn validate(&self) -> Result<(), SyncError> {
        let invalid = |reason: String| SyncError::InvalidColumns { reason };
        if self.columns.is_empty() {
            return Err(invalid("at least one column must be declared".to_string()));
        }
        let mut seen = BTreeSet::new();
        for column in &self.columns {
            if column.name.trim().is_empty() {
                return Err(invalid("column names cannot be empty".to_string()));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(invalid(format!("duplicate column name '{}'", column.name)));
            }
            match (column.semantic_type, column.primary) {
                (SemanticType::Title, false) => {
                    return Err(invalid(format!(
                        "title column '{}' must be marked primary",
                        column.name
                    )));
                }
                (SemanticType::Text | SemanticType::Number, true) => {
                    return Err(invalid(format!(
                        "primary column '{}' must have type title",
                        column.name
                    )));
                }
                _ => {}
            }
        }
        let primaries = self.columns.iter().filter(|column| column.primary).count();
        if primaries > 1 {
            return Err(invalid(format!(
                "at most one primary column is allowed, found {primaries}"
            )));
        }
        Ok(())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ColumnSpec> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn primary(&self) -> Option<&ColumnSpec> {
        self.columns.iter().find(|column| column.primary)
    }

    /// The primary column, for operations that create a table and need its title.
    pub fn require_primary(&self) -> Result<&ColumnSpec, SyncError> {
        self.primary().ok_or_else(|| SyncError::InvalidColumns {
            reason: "a new table needs one primary column of type title".to_string(),
        })
    }

    pub fn names(&self) -> BTreeSet<&str> {
        self.columns.iter().map(|column| column.name.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a ColumnSet {
    type Item = &'a ColumnSpec;
    type IntoIter = std::slice::Iter<'a, ColumnSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.iter()
    }
}
