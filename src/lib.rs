pub mod cli;
pub mod columns;
pub mod error;
pub mod io_utils;
pub mod notion;
pub mod ratings;
pub mod reconcile;
pub mod sanitize;
pub mod store;
pub mod sync;
pub mod table;

use std::{env, path::Path, sync::OnceLock, time::Duration};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands},
    columns::ColumnSet,
    notion::{NotionClient, NotionSettings},
    ratings::{LogOptions, RatingAggregator},
    sync::{RowScanner, SyncOptions},
    table::{Align, Table, format_number},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("shelf_sync", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    dotenv::dotenv().ok();
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Sync(args) => handle_sync(&args),
        Commands::Stats(args) => handle_stats(&args),
        Commands::Clear(args) => handle_clear(&args),
        Commands::Columns(args) => handle_columns(&args),
        Commands::Init(args) => handle_init(&args),
    }
}

fn handle_sync(args: &cli::SyncArgs) -> Result<()> {
    let columns = load_columns(args.columns.as_deref())?;
    let aggregator = aggregate_log(&args.log)?;
    let table_id = require_database_id(&args.remote)?;
    let client = connect(&args.remote)?;
    let options = SyncOptions {
        dry_run: args.dry_run,
        max_pages: args.max_pages,
        ..SyncOptions::default()
    };
    let report = sync::run_pipeline(&client, table_id, &columns, &aggregator, &options)
        .with_context(|| format!("Synchronizing database {table_id}"))?;
    println!(
        "{} column change(s), {} row(s) cleared, {} row(s) inserted{}",
        report.schema.plan.changes().len(),
        report.rows_cleared,
        report.rows_inserted,
        if report.dry_run { " (dry run)" } else { "" }
    );
    Ok(())
}

fn handle_stats(args: &cli::StatsArgs) -> Result<()> {
    let aggregator = aggregate_log(&args.log)?;
    let mut table = Table::new(["book", "ratings", "average", "favorites"])
        .align(1, Align::Right)
        .align(2, Align::Right)
        .align(3, Align::Right);
    let books = if args.books.is_empty() {
        aggregator
            .book_names()
            .into_iter()
            .map(str::to_string)
            .collect()
    } else {
        args.books.clone()
    };
    for book in &books {
        let average = aggregator
            .average_rating(book)
            .with_context(|| format!("Looking up '{book}'"))?;
        table.push_row(vec![
            aggregator.canonical_name(book),
            aggregator.rating_count(book).to_string(),
            format_number(average),
            aggregator.favorite_count(book).to_string(),
        ]);
    }
    if table.is_empty() {
        info!("No ratings found in {:?}", args.log.input);
        return Ok(());
    }
    table.print();
    Ok(())
}

fn handle_clear(args: &cli::ClearArgs) -> Result<()> {
    let table_id = require_database_id(&args.remote)?;
    let client = connect(&args.remote)?;
    let cleared = RowScanner::new(&client, table_id)
        .max_pages(args.max_pages)
        .dry_run(args.dry_run)
        .clear_all_rows()
        .with_context(|| format!("Clearing rows of database {table_id}"))?;
    println!(
        "{cleared} row(s) {}",
        if args.dry_run {
            "would be archived"
        } else {
            "archived"
        }
    );
    Ok(())
}

fn handle_columns(args: &cli::ColumnsArgs) -> Result<()> {
    let columns = load_columns(args.columns.as_deref())?;
    if let Some(path) = &args.write {
        columns
            .save(path)
            .with_context(|| format!("Writing columns to {path:?}"))?;
        info!("Wrote {} column(s) to {:?}", columns.len(), path);
        return Ok(());
    }
    let mut table = Table::new(["#", "name", "type", "source", "primary", "sanitizers"])
        .align(0, Align::Right);
    for (idx, column) in columns.iter().enumerate() {
        table.push_row(vec![
            (idx + 1).to_string(),
            column.name.clone(),
            column.semantic_type.to_string(),
            column.source.to_string(),
            if column.primary { "yes" } else { "" }.to_string(),
            column
                .sanitizers
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        ]);
    }
    table.print();
    Ok(())
}

fn handle_init(args: &cli::InitArgs) -> Result<()> {
    let columns = load_columns(args.columns.as_deref())?;
    let client = connect(&args.remote)?;
    let table_id = client
        .create_table(&args.page_id, &args.title, &columns)
        .with_context(|| format!("Creating database under page {}", args.page_id))?;
    info!(
        "Created database '{}' with {} column(s)",
        args.title,
        columns.len()
    );
    println!("{table_id}");
    Ok(())
}

fn load_columns(path: Option<&Path>) -> Result<ColumnSet> {
    match path {
        Some(path) => ColumnSet::load(path),
        None => {
            debug!("Using built-in book columns");
            Ok(ColumnSet::book_defaults())
        }
    }
}

fn aggregate_log(args: &cli::LogArgs) -> Result<RatingAggregator> {
    let options = LogOptions {
        has_headers: args.has_headers,
        on_malformed: args.on_malformed,
        encoding: io_utils::resolve_encoding(args.input_encoding.as_deref())?,
    };
    info!("Aggregating ratings from {:?}", args.input);
    let reader = io_utils::open_input(&args.input)?;
    RatingAggregator::from_reader(reader, &options)
        .with_context(|| format!("Aggregating ratings from {:?}", args.input))
}

fn require_database_id(args: &cli::RemoteArgs) -> Result<&str> {
    args.database_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| anyhow!("A target database is required: pass --database-id or set DATABASE_ID"))
}

fn connect(args: &cli::RemoteArgs) -> Result<NotionClient> {
    let token = args
        .token
        .as_deref()
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| anyhow!("A Notion token is required: pass --token or set NOTION_TOKEN"))?;
    let settings = NotionSettings {
        api_base_url: args.api_base_url.clone(),
        notion_version: args.notion_version.clone(),
        timeout: Duration::from_secs(args.timeout_secs),
        ..NotionSettings::new(token)
    };
    debug!("Connecting with {settings:?}");
    NotionClient::new(settings).context("Building Notion client")
}
