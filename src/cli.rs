use std::path::PathBuf;

use clap::{Parser, Subcommand};

use shelfkeeper::types::MediaKind;

/// Keep a local media catalog in sync with its providers
#[derive(Parser)]
#[command(name = "shelfkeeper")]
#[command(about = "Track anime, manga and novels across providers", long_about = None)]
pub struct Cli {
    /// Settings file (defaults to the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `shelfkeeper=trace`
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Do not write state back after the command
    #[arg(long, global = true)]
    pub no_save: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered providers
    Providers,
    /// List tracked media
    List {
        #[arg(short, long)]
        kind: Option<MediaKind>,
    },
    /// List media available from providers
    ListFromProviders {
        #[arg(short, long)]
        kind: Option<MediaKind>,
        #[arg(short, long)]
        provider: Option<String>,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Search providers, optionally adding the first result
    Search {
        term: String,
        #[arg(short, long)]
        kind: Option<MediaKind>,
        /// Only search this provider
        #[arg(short, long)]
        provider: Option<String>,
        #[arg(long)]
        exact: bool,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        add: bool,
    },
    /// Add the media a provider resolves a URL to
    AddUrl { url: String },
    /// Stop tracking a media
    Remove { name: String },
    /// Fetch new chapters and episodes
    Update {
        name: Option<String>,
        #[arg(short, long)]
        kind: Option<MediaKind>,
        /// Drop entries the provider no longer lists
        #[arg(long)]
        replace: bool,
        /// Abort on the first failing item
        #[arg(long)]
        strict: bool,
    },
    /// Move media to another provider
    Migrate {
        name: Option<String>,
        #[arg(long)]
        exact: bool,
        /// Re-resolve with the current provider instead of moving
        #[arg(long)]
        same_provider: bool,
        #[arg(long)]
        same_id: bool,
    },
    /// Run the schema self-migration
    Upgrade {
        #[arg(long)]
        force: bool,
    },
    /// Mark chapters read
    MarkRead {
        name: Option<String>,
        #[arg(short, long)]
        kind: Option<MediaKind>,
        /// Relative to the last chapter, or absolute with --abs
        #[arg(short, long, default_value_t = 0.0, allow_negative_numbers = true)]
        n: f64,
        #[arg(long)]
        abs: bool,
        /// Also mark later chapters unread
        #[arg(long)]
        force: bool,
    },
    /// Change the chapter numbering offset
    Offset {
        name: String,
        #[arg(allow_negative_numbers = true)]
        offset: f64,
    },
    /// List unread chapters
    Unread {
        name: Option<String>,
        #[arg(short, long)]
        kind: Option<MediaKind>,
        #[arg(short, long)]
        limit: Option<usize>,
        /// Include unread chapters before the last read one
        #[arg(long)]
        any: bool,
    },
    /// Store a session cookie
    AddCookie {
        domain: String,
        name: String,
        value: String,
        #[arg(long, default_value = "/")]
        path: String,
    },
}
