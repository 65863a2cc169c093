mod common;

use assert_cmd::Command;
use predicates::{prelude::PredicateBooleanExt, str::contains};
use shelf_sync::columns::ColumnSet;

use common::{TestWorkspace, fixture_path};

fn shelf_sync() -> Command {
    let mut command = Command::cargo_bin("shelf-sync").expect("binary exists");
    command
        .env_remove("NOTION_TOKEN")
        .env_remove("DATABASE_ID")
        .env_remove("PAGE_ID")
        .env_remove("NOTION_API_BASE_URL");
    command
}

#[test]
fn stats_prints_books_in_descending_order() {
    let fixture = fixture_path("ratings.csv");
    let assert = shelf_sync()
        .args(["stats", "-i", fixture.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("book").and(contains("favorites")));
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8");
    let lines = stdout.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 5);
    assert!(lines[2].starts_with("book 3"));
    assert!(lines[3].starts_with("book 2"));
    assert!(lines[4].starts_with("book 1"));
    assert!(lines[4].contains("4.8"));
}

#[test]
fn stats_filters_named_books_and_rejects_unknown_ones() {
    let fixture = fixture_path("ratings.csv");
    shelf_sync()
        .args(["stats", "-i", fixture.to_str().unwrap(), "--book", "  BOOK 2"])
        .assert()
        .success()
        .stdout(contains("book 2").and(contains("book 1").not()));

    shelf_sync()
        .args(["stats", "-i", fixture.to_str().unwrap(), "--book", "Missing"])
        .assert()
        .failure()
        .stderr(contains("unknown book 'missing'"));
}

#[test]
fn stats_reads_stdin() {
    shelf_sync()
        .args(["stats", "-i", "-"])
        .write_stdin("Dune,alice,5\nDune,bob,3\n")
        .assert()
        .success()
        .stdout(contains("dune"));
}

#[test]
fn malformed_rows_abort_by_default() {
    let workspace = TestWorkspace::new();
    let log = workspace.write("bad.csv", "Dune,alice,5\nDune,bob\n");
    shelf_sync()
        .args(["stats", "-i", log.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("line 2"));
}

#[test]
fn malformed_rows_can_be_skipped() {
    let workspace = TestWorkspace::new();
    let log = workspace.write("bad.csv", "Dune,alice,5\nDune,bob\n");
    shelf_sync()
        .args(["stats", "-i", log.to_str().unwrap(), "--on-malformed", "skip"])
        .assert()
        .success()
        .stdout(contains("dune"));
}

#[test]
fn header_line_is_skipped_with_flag() {
    let workspace = TestWorkspace::new();
    let log = workspace.write("ratings.csv", "book,rater,rating\nDune,alice,5\n");
    shelf_sync()
        .args(["stats", "-i", log.to_str().unwrap(), "--has-headers"])
        .assert()
        .success()
        .stdout(contains("dune"));
}

#[test]
fn columns_lists_builtin_declarations() {
    shelf_sync()
        .arg("columns")
        .assert()
        .success()
        .stdout(
            contains("Book Title")
                .and(contains("Number of Favorites"))
                .and(contains("average_rating"))
                .and(contains("trim, lowercase")),
        );
}

#[test]
fn columns_write_produces_loadable_yaml() {
    let workspace = TestWorkspace::new();
    let path = workspace.path().join("columns.yml");
    shelf_sync()
        .args(["columns", "--write", path.to_str().unwrap()])
        .assert()
        .success();
    let loaded = ColumnSet::load(&path).expect("load written columns");
    assert_eq!(loaded, ColumnSet::book_defaults());

    shelf_sync()
        .args(["columns", "-c", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("Rating"));
}

#[test]
fn invalid_column_file_is_rejected() {
    let workspace = TestWorkspace::new();
    let path = workspace.write(
        "columns.yml",
        "columns:\n  - name: A\n    type: title\n    source: book_name\n    primary: true\n  - name: A\n    type: number\n    source: rating_count\n",
    );
    shelf_sync()
        .args(["columns", "-c", path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("duplicate column name 'A'"));
}

#[test]
fn sync_requires_database_id() {
    let fixture = fixture_path("ratings.csv");
    shelf_sync()
        .args(["sync", "-i", fixture.to_str().unwrap(), "--token", "secret"])
        .assert()
        .failure()
        .stderr(contains("--database-id"));
}

#[test]
fn clear_requires_token() {
    shelf_sync()
        .args(["clear", "--database-id", "db-1"])
        .assert()
        .failure()
        .stderr(contains("NOTION_TOKEN"));
}

#[test]
fn init_rejects_columns_without_title() {
    let workspace = TestWorkspace::new();
    let path = workspace.write(
        "columns.yml",
        "columns:\n  - name: Rating\n    type: number\n    source: average_rating\n",
    );
    shelf_sync()
        .args([
            "init",
            "--page-id",
            "page-1",
            "--token",
            "secret",
            "--api-base-url",
            "http://127.0.0.1:9",
            "-c",
            path.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("primary column of type title"));
}
