//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "launchpad",
    version,
    about = "Retrieval and corpus migration for the startup-toolkit agents",
    long_about = "Launchpad serves retrieval context to the pitch, marketing, patent, policy, team and \
                  competitive agents from a local flat index, a Weaviate cluster or a managed query \
                  agent, and migrates PostgreSQL corpus tables into Weaviate collections."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/launchpad/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Named profile from the config file to apply
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch ranked context for a query from a category's collection
    Retrieve {
        /// Agent category (e.g. "pitch", "competitive")
        category: String,

        /// Natural-language query
        query: String,

        /// Maximum number of documents (defaults to retrieval.top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Metadata equality filter, repeatable (e.g. --filter source=deck)
        #[arg(short, long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show a category's document count as the store reports it
    Count {
        /// Agent category
        category: String,
    },

    /// Embed and index JSONL corpora into the configured store
    Index {
        /// Category to index, repeatable (defaults to retrieval.categories)
        #[arg(long = "category", value_name = "CATEGORY")]
        categories: Vec<String>,

        /// One worker thread per category
        #[arg(long)]
        parallel: bool,
    },

    /// Migrate PostgreSQL *_corpus tables into Weaviate collections
    Migrate {
        /// Table to migrate, repeatable (defaults to every *_corpus table)
        #[arg(short, long = "table")]
        tables: Vec<String>,

        /// Ignore existing checkpoints and start each table from the beginning
        #[arg(long)]
        no_resume: bool,

        /// Rows per chunk (defaults to migration.chunk_size)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Print the per-table report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section (e.g. "weaviate")
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
