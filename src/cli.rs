use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{notion, ratings::MalformedRowPolicy, sync::DEFAULT_MAX_PAGES};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Sync book rating statistics into a Notion database",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Reconcile columns, clear all rows, and insert one row per rated book
    Sync(SyncArgs),
    /// Aggregate a rating log and print per-book statistics without contacting Notion
    Stats(StatsArgs),
    /// Archive every row in the target database
    Clear(ClearArgs),
    /// List the declared output columns or write them to a YAML file
    Columns(ColumnsArgs),
    /// Create a new database under a parent page with the declared columns
    Init(InitArgs),
}

#[derive(Debug, Args)]
pub struct LogArgs {
    /// Rating log with `book,rater,rating` rows (`-` reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Character encoding of the log (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Treat the first line as a header and skip it
    #[arg(long = "has-headers")]
    pub has_headers: bool,
    /// What to do with rows that are not `book,rater,number`
    #[arg(long = "on-malformed", value_enum, default_value = "abort")]
    pub on_malformed: MalformedRowPolicy,
}

#[derive(Debug, Args)]
pub struct RemoteArgs {
    /// Notion integration token
    #[arg(long, env = "NOTION_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
    /// Target database id
    #[arg(long = "database-id", env = "DATABASE_ID")]
    pub database_id: Option<String>,
    /// Notion API base URL
    #[arg(
        long = "api-base-url",
        env = "NOTION_API_BASE_URL",
        default_value = notion::DEFAULT_API_BASE_URL
    )]
    pub api_base_url: String,
    /// Value sent in the Notion-Version header
    #[arg(long = "notion-version", default_value = notion::DEFAULT_NOTION_VERSION)]
    pub notion_version: String,
    /// Per-request timeout in seconds
    #[arg(long = "timeout-secs", default_value_t = notion::DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    #[command(flatten)]
    pub log: LogArgs,
    #[command(flatten)]
    pub remote: RemoteArgs,
    /// YAML file declaring output columns (built-in book columns if omitted)
    #[arg(short = 'c', long = "columns")]
    pub columns: Option<PathBuf>,
    /// Compute and log every change without modifying the database
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Maximum pages read while scanning existing rows
    #[arg(long = "max-pages", default_value_t = DEFAULT_MAX_PAGES)]
    pub max_pages: usize,
}

#[derive(Debug, Args)]
pub struct StatsArgs {
    #[command(flatten)]
    pub log: LogArgs,
    /// Only report these books (unknown names are an error)
    #[arg(short = 'b', long = "book", action = clap::ArgAction::Append)]
    pub books: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ClearArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,
    /// List the rows that would be archived without archiving them
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Maximum pages read while scanning existing rows
    #[arg(long = "max-pages", default_value_t = DEFAULT_MAX_PAGES)]
    pub max_pages: usize,
}

#[derive(Debug, Args)]
pub struct ColumnsArgs {
    /// YAML file declaring output columns (built-in book columns if omitted)
    #[arg(short = 'c', long = "columns")]
    pub columns: Option<PathBuf>,
    /// Write the active column declarations to this YAML file
    #[arg(short = 'w', long = "write")]
    pub write: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct InitArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,
    /// Parent page that will contain the new database
    #[arg(long = "page-id", env = "PAGE_ID")]
    pub page_id: String,
    /// Title of the new database
    #[arg(long, default_value = "Book Ratings")]
    pub title: String,
    /// YAML file declaring output columns (built-in book columns if omitted)
    #[arg(short = 'c', long = "columns")]
    pub columns: Option<PathBuf>,
}
