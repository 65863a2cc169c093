//! Rating log aggregation.
//!
//! The log is append-only and chronological, one `book,rater,rating` row per line.
//! Rows are folded most-recent-first so that the first rating seen for a
//! `(book, rater)` pair is the one that counts; every older rating for the same
//! pair is superseded and skipped. Per-book statistics are maintained as a
//! running mean, rating count, and favorite (exactly 5) count.

use std::{
    collections::{HashMap, HashSet},
    io::Read,
};

use clap::ValueEnum;
use encoding_rs::{Encoding, UTF_8};
use itertools::Itertools;
use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    error::{Result, SyncError},
    io_utils,
    sanitize::normalize_name,
};

/// A rating equal to this value counts as a favorite.
pub const FAVORITE_RATING: f64 = 5.0;
const EXPECTED_RATING_RANGE: (f64, f64) = (1.0, 5.0);
const FIELDS_PER_ROW: usize = 3;

/// One parsed log row, names still raw.
#[derive(Debug, Clone, PartialEq)]
pub struct RatingRecord {
    pub book_name: String,
    pub rater: String,
    pub rating: f64,
}

impl RatingRecord {
    pub fn new(book_name: impl Into<String>, rater: impl Into<String>, rating: f64) -> Self {
        Self {
            book_name: book_name.into(),
            rater: rater.into(),
            rating,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookStats {
    book_name: String,
    rating_count: usize,
    average_rating: f64,
    favorite_count: usize,
}

impl BookStats {
    fn new(book_name: String) -> Self {
        Self {
            book_name,
            rating_count: 0,
            average_rating: 0.0,
            favorite_count: 0,
        }
    }

    fn fold(&mut self, rating: f64) {
        let count = self.rating_count as f64;
        self.average_rating = (self.average_rating * count + rating) / (count + 1.0);
        self.rating_count += 1;
        if rating == FAVORITE_RATING {
            self.favorite_count += 1;
        }
    }

    /// Normalized book name.
    pub fn book_name(&self) -> &str {
        &self.book_name
    }

    pub fn rating_count(&self) -> usize {
        self.rating_count
    }

    pub fn average_rating(&self) -> f64 {
        self.average_rating
    }

    pub fn favorite_count(&self) -> usize {
        self.favorite_count
    }
}

/// What to do with a row that is not `book,rater,number`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum MalformedRowPolicy {
    /// Stop aggregation with an error naming the line.
    #[default]
    Abort,
    /// Log a warning and leave the row out of the statistics.
    Skip,
}

#[derive(Debug, Clone, Copy)]
pub struct LogOptions {
    pub has_headers: bool,
    pub on_malformed: MalformedRowPolicy,
    pub encoding: &'static Encoding,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            has_headers: false,
            on_malformed: MalformedRowPolicy::Abort,
            encoding: UTF_8,
        }
    }
}

/// Counters describing one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregationSummary {
    pub rows_read: usize,
    pub blank_rows: usize,
    pub skipped_rows: usize,
    pub superseded_ratings: usize,
    pub out_of_range_ratings: usize,
}

struct RawRow {
    line: u64,
    fields: std::result::Result<Vec<String>, String>,
}

/// Immutable per-book statistics built from a single pass over the log.
#[derive(Debug, Clone, Default)]
pub struct RatingAggregator {
    books: HashMap<String, BookStats>,
    summary: AggregationSummary,
}

impl RatingAggregator {
    /// Aggregates a log read from `reader`.
    pub fn from_reader<R: Read>(reader: R, options: &LogOptions) -> Result<Self> {
        let mut csv_reader = io_utils::open_log_reader(reader, options.has_headers);
        let mut rows = Vec::new();
        for record in csv_reader.byte_records() {
            let record = record.map_err(|err| match err.position() {
                Some(position) => SyncError::MalformedRow {
                    line: position.line(),
                    reason: err.to_string(),
                },
                None => SyncError::Transport {
                    message: format!("Reading rating log: {err}"),
                },
            })?;
            let line = record.position().map_or(0, |position| position.line());
            let fields =
                io_utils::decode_record(&record, options.encoding).map_err(|err| err.to_string());
            rows.push(RawRow { line, fields });
        }

        let mut aggregator = Self::default();
        let mut seen = HashSet::new();
        for row in rows.into_iter().rev() {
            aggregator.summary.rows_read += 1;
            match parse_row(row) {
                Ok(Some(record)) => aggregator.fold_latest(record, &mut seen),
                Ok(None) => aggregator.summary.blank_rows += 1,
                Err(err) => match options.on_malformed {
                    MalformedRowPolicy::Abort => return Err(err),
                    MalformedRowPolicy::Skip => {
                        warn!("Skipping {err}");
                        aggregator.summary.skipped_rows += 1;
                    }
                },
            }
        }
        aggregator.finish();
        Ok(aggregator)
    }

    /// Aggregates in-memory log text with default options.
    pub fn from_log_text(text: &str) -> Result<Self> {
        Self::from_reader(text.as_bytes(), &LogOptions::default())
    }

    /// Aggregates records given in chronological (log) order.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = RatingRecord>,
    {
        let records = records.into_iter().collect::<Vec<_>>();
        let mut aggregator = Self::default();
        let mut seen = HashSet::new();
        for record in records.into_iter().rev() {
            aggregator.summary.rows_read += 1;
            aggregator.fold_latest(record, &mut seen);
        }
        aggregator.finish();
        aggregator
    }

    fn fold_latest(&mut self, record: RatingRecord, seen: &mut HashSet<(String, String)>) {
        let book = normalize_name(&record.book_name);
        let rater = normalize_name(&record.rater);
        if !seen.insert((book.clone(), rater)) {
            self.summary.superseded_ratings += 1;
            return;
        }
        let (low, high) = EXPECTED_RATING_RANGE;
        if record.rating < low || record.rating > high {
            self.summary.out_of_range_ratings += 1;
        }
        self.books
            .entry(book)
            .or_insert_with_key(|key| BookStats::new(key.clone()))
            .fold(record.rating);
    }

    fn finish(&self) {
        if self.summary.out_of_range_ratings > 0 {
            warn!(
                "{} rating(s) fall outside {}..={} and were counted as given",
                self.summary.out_of_range_ratings, EXPECTED_RATING_RANGE.0, EXPECTED_RATING_RANGE.1
            );
        }
        debug!("Aggregation summary: {:?}", self.summary);
        info!(
            "Aggregated {} book(s) from {} row(s)",
            self.books.len(),
            self.summary.rows_read
        );
    }

    /// Mean of the deduplicated ratings; unknown books are an error.
    pub fn average_rating(&self, book_name: &str) -> Result<f64> {
        let key = normalize_name(book_name);
        self.books
            .get(&key)
            .map(BookStats::average_rating)
            .ok_or(SyncError::UnknownBook { book: key })
    }

    /// Number of deduplicated ratings equal to 5; zero for unknown books.
    pub fn favorite_count(&self, book_name: &str) -> usize {
        self.stats(book_name).map_or(0, BookStats::favorite_count)
    }

    pub fn rating_count(&self, book_name: &str) -> usize {
        self.stats(book_name).map_or(0, BookStats::rating_count)
    }

    pub fn canonical_name(&self, book_name: &str) -> String {
        normalize_name(book_name)
    }

    pub fn stats(&self, book_name: &str) -> Option<&BookStats> {
        self.books.get(&normalize_name(book_name))
    }

    pub fn contains(&self, book_name: &str) -> bool {
        self.stats(book_name).is_some()
    }

    /// Normalized book names in descending lexicographic order.
    pub fn book_names(&self) -> Vec<&str> {
        self.books
            .keys()
            .map(String::as_str)
            .sorted_by(|a, b| b.cmp(a))
            .collect()
    }

    /// Statistics in the same order as [`RatingAggregator::book_names`].
    pub fn iter_descending(&self) -> impl Iterator<Item = &BookStats> {
        self.books
            .values()
            .sorted_by(|a, b| b.book_name.cmp(&a.book_name))
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn summary(&self) -> &AggregationSummary {
        &self.summary
    }
}

fn parse_row(row: RawRow) -> Result<Option<RatingRecord>> {
    let RawRow { line, fields } = row;
    let fields = fields.map_err(|reason| SyncError::MalformedRow { line, reason })?;
    // Only a line with no delimiter and nothing but whitespace is blank; `,,` is a short row.
    if let [only] = fields.as_slice()
        && only.trim().is_empty()
    {
        return Ok(None);
    }
    if fields.len() != FIELDS_PER_ROW {
        return Err(SyncError::MalformedRow {
            line,
            reason: format!(
                "expected {FIELDS_PER_ROW} comma-separated fields, found {}",
                fields.len()
            ),
        });
    }
    let raw_rating = fields[2].trim();
    let rating = raw_rating
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| SyncError::MalformedRow {
            line,
            reason: format!("rating '{raw_rating}' is not a number"),
        })?;
    let mut fields = fields.into_iter();
    let book_name = fields.next().unwrap_or_default();
    let rater = fields.next().unwrap_or_default();
    Ok(Some(RatingRecord {
        book_name,
        rater,
        rating,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_rating_from_same_rater_supersedes_earlier() {
        let aggregator =
            RatingAggregator::from_log_text("Book 1,Alice,5\nBook 1,Bob,4\nBook 1,Alice,3\n")
                .expect("aggregate");
        assert_eq!(aggregator.rating_count("book 1"), 2);
        assert_eq!(aggregator.average_rating("book 1").expect("known"), 3.5);
        assert_eq!(aggregator.favorite_count("book 1"), 0);
        assert_eq!(aggregator.summary().superseded_ratings, 1);
    }

    #[test]
    fn blank_lines_do_not_affect_counts() {
        let aggregator =
            RatingAggregator::from_log_text("\nBook 1,Alice,5\n   \n\nBook 1,Bob,4\n\n")
                .expect("aggregate");
        assert_eq!(aggregator.len(), 1);
        assert_eq!(aggregator.rating_count("Book 1"), 2);
        assert_eq!(aggregator.average_rating("Book 1").expect("known"), 4.5);
        assert_eq!(aggregator.favorite_count("Book 1"), 1);
    }

    #[test]
    fn names_are_normalized_for_dedup_and_lookup() {
        let aggregator =
            RatingAggregator::from_log_text("  Dune ,ALICE,2\ndune,alice ,4\nDUNE,Bob,5\n")
                .expect("aggregate");
        assert_eq!(aggregator.book_names(), vec!["dune"]);
        assert_eq!(aggregator.rating_count("Dune"), 2);
        assert_eq!(aggregator.average_rating(" DUNE ").expect("known"), 4.5);
        assert_eq!(aggregator.canonical_name("  The HOBBIT "), "the hobbit");
    }

    #[test]
    fn unknown_book_is_an_error_but_has_no_favorites() {
        let aggregator = RatingAggregator::from_log_text("Book 1,Alice,5\n").expect("aggregate");
        let err = aggregator.average_rating("Book 9").expect_err("strict lookup");
        assert!(matches!(err, SyncError::UnknownBook { ref book } if book == "book 9"));
        assert_eq!(aggregator.favorite_count("Book 9"), 0);
        assert_eq!(aggregator.rating_count("Book 9"), 0);
        assert!(!aggregator.contains("Book 9"));
    }

    #[test]
    fn malformed_row_aborts_with_line_number() {
        let err = RatingAggregator::from_log_text("Book 1,Alice,5\nBook 1,Bob\nBook 2,Cy,4\n")
            .expect_err("malformed");
        assert!(matches!(err, SyncError::MalformedRow { line: 2, .. }), "{err}");

        let err = RatingAggregator::from_log_text("Book 1,Alice,great\n").expect_err("nan");
        assert!(err.to_string().contains("'great' is not a number"));
    }

    #[test]
    fn delimiter_only_rows_are_malformed_not_blank() {
        for log in ["Book 1,Alice,5\n,,\n", "Book 1,Alice,5\n,\n", "Book 1,Alice,5\n , , \n"] {
            let err = RatingAggregator::from_log_text(log).expect_err("delimiters only");
            assert!(matches!(err, SyncError::MalformedRow { line: 2, .. }), "{log:?}: {err}");
        }

        let options = LogOptions {
            on_malformed: MalformedRowPolicy::Skip,
            ..LogOptions::default()
        };
        let aggregator =
            RatingAggregator::from_reader("Book 1,Alice,5\n,,\n".as_bytes(), &options).expect("skip");
        assert_eq!(aggregator.summary().skipped_rows, 1);
        assert_eq!(aggregator.summary().blank_rows, 0);
    }

    #[test]
    fn skip_policy_leaves_malformed_rows_out() {
        let options = LogOptions {
            on_malformed: MalformedRowPolicy::Skip,
            ..LogOptions::default()
        };
        let log = "Book 1,Alice,5\nBook 1,Bob,4,extra\nBook 1,Cy,NaN\nBook 1,Dee,3\n";
        let aggregator = RatingAggregator::from_reader(log.as_bytes(), &options).expect("skip");
        assert_eq!(aggregator.rating_count("book 1"), 2);
        assert_eq!(aggregator.summary().skipped_rows, 2);
        assert_eq!(aggregator.average_rating("book 1").expect("known"), 4.0);
    }

    #[test]
    fn header_row_is_ignored_when_requested() {
        let options = LogOptions {
            has_headers: true,
            ..LogOptions::default()
        };
        let log = "book,rater,rating\nBook 1,Alice,4\n";
        let aggregator = RatingAggregator::from_reader(log.as_bytes(), &options).expect("header");
        assert_eq!(aggregator.len(), 1);
        assert!(!aggregator.contains("book"));
    }

    #[test]
    fn out_of_range_ratings_are_counted_not_clamped() {
        let aggregator =
            RatingAggregator::from_log_text("Book 1,Alice,7\nBook 1,Bob,0\n").expect("aggregate");
        assert_eq!(aggregator.summary().out_of_range_ratings, 2);
        assert_eq!(aggregator.average_rating("book 1").expect("known"), 3.5);
    }

    #[test]
    fn book_names_sort_descending() {
        let aggregator = RatingAggregator::from_log_text("b,x,1\nc,x,2\na,x,3\n").expect("ok");
        assert_eq!(aggregator.book_names(), vec!["c", "b", "a"]);
        let ordered = aggregator
            .iter_descending()
            .map(BookStats::book_name)
            .collect::<Vec<_>>();
        assert_eq!(ordered, vec!["c", "b", "a"]);
    }

    #[test]
    fn from_records_matches_text_aggregation() {
        let aggregator = RatingAggregator::from_records([
            RatingRecord::new("Book 2", "Alice", 5.0),
            RatingRecord::new("Book 2", "Alice", 4.0),
        ]);
        assert_eq!(aggregator.average_rating("book 2").expect("known"), 4.0);
        assert_eq!(aggregator.favorite_count("book 2"), 0);
    }
}
