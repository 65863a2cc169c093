mod common;

use std::collections::HashMap;
use std::fs::File;

use proptest::prelude::*;
use shelf_sync::error::SyncError;
use shelf_sync::ratings::{LogOptions, RatingAggregator, RatingRecord};

use common::fixture_path;

fn fixture_aggregator() -> RatingAggregator {
    let file = File::open(fixture_path("ratings.csv")).expect("open fixture");
    RatingAggregator::from_reader(file, &LogOptions::default()).expect("aggregate fixture")
}

#[test]
fn fixture_counts_favorites() {
    let aggregator = fixture_aggregator();
    assert_eq!(aggregator.favorite_count("Book 1"), 4);
}

#[test]
fn fixture_average_rating() {
    let aggregator = fixture_aggregator();
    assert_eq!(aggregator.average_rating("Book 1").expect("book 1"), 4.8);
    assert_eq!(aggregator.rating_count("Book 1"), 5);
}

#[test]
fn fixture_replacement_further_down_the_log() {
    let aggregator = fixture_aggregator();
    assert_eq!(aggregator.average_rating("Book 2").expect("book 2"), 4.0);
    assert_eq!(aggregator.favorite_count("Book 2"), 0);
}

#[test]
fn fixture_summary_tracks_superseded_rows() {
    let aggregator = fixture_aggregator();
    let summary = aggregator.summary();
    assert_eq!(aggregator.book_names(), vec!["book 3", "book 2", "book 1"]);
    assert_eq!(summary.superseded_ratings, 2);
    assert_eq!(summary.skipped_rows, 0);
}

#[test]
fn unknown_book_lookup_is_strict() {
    let aggregator = fixture_aggregator();
    assert!(matches!(
        aggregator.average_rating("Book 404"),
        Err(SyncError::UnknownBook { .. })
    ));
}

fn rating_log() -> impl Strategy<Value = Vec<RatingRecord>> {
    let book = prop_oneof![Just("Book A"), Just(" book a"), Just("Book B"), Just("BOOK C ")];
    let rater = prop_oneof![Just("alice"), Just("Alice "), Just("bob"), Just("cy")];
    proptest::collection::vec(
        (book, rater, 1u8..=5).prop_map(|(book, rater, rating)| {
            RatingRecord::new(book, rater, f64::from(rating))
        }),
        0..40,
    )
}

/// Latest rating per normalized (book, rater) pair, grouped by book.
fn latest_by_book(records: &[RatingRecord]) -> HashMap<String, Vec<f64>> {
    let mut latest: HashMap<(String, String), f64> = HashMap::new();
    for record in records {
        let key = (
            record.book_name.trim().to_lowercase(),
            record.rater.trim().to_lowercase(),
        );
        latest.insert(key, record.rating);
    }
    let mut by_book: HashMap<String, Vec<f64>> = HashMap::new();
    for ((book, _), rating) in latest {
        by_book.entry(book).or_default().push(rating);
    }
    by_book
}

proptest! {
    #[test]
    fn aggregation_keeps_latest_rating_per_rater(records in rating_log()) {
        let aggregator = RatingAggregator::from_records(records.clone());
        let expected = latest_by_book(&records);

        prop_assert_eq!(aggregator.len(), expected.len());
        for (book, ratings) in &expected {
            let mean = ratings.iter().sum::<f64>() / ratings.len() as f64;
            let favorites = ratings.iter().filter(|rating| **rating == 5.0).count();
            prop_assert_eq!(aggregator.rating_count(book), ratings.len());
            prop_assert_eq!(aggregator.favorite_count(book), favorites);
            let average = aggregator.average_rating(book).expect("known book");
            prop_assert!((average - mean).abs() < 1e-9, "{} vs {}", average, mean);
        }
    }

    #[test]
    fn text_log_matches_record_aggregation(records in rating_log()) {
        let text = records
            .iter()
            .map(|record| format!("{},{},{}", record.book_name, record.rater, record.rating))
            .collect::<Vec<_>>()
            .join("\n");
        let from_text = RatingAggregator::from_log_text(&text).expect("aggregate text");
        let from_records = RatingAggregator::from_records(records);
        prop_assert_eq!(from_text.book_names(), from_records.book_names());
        for book in from_records.book_names() {
            prop_assert_eq!(from_text.stats(book), from_records.stats(book));
        }
    }
}
