use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "kinen")]
#[command(about = "Keep anniversaries offline and sync them when you are back online")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to engine config (JSON)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a record offline and queue it for sync
    #[command(alias = "new")]
    Add {
        /// Display name, e.g. "Mom's Birthday"
        name: Vec<String>,
        /// Entity type
        #[arg(long = "type", default_value = "anniversary")]
        entity_type: String,
        /// Anniversary date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
        /// Extra field, repeatable
        #[arg(short, long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },
    /// List local records
    List {
        /// Only show records of this type
        #[arg(long = "type")]
        entity_type: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one record with its queued changes and conflicts
    Show {
        /// Record ID or unique ID prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change fields of a record and queue the update
    Set {
        /// Record ID or unique ID prefix
        id: String,
        /// Field assignments; `KEY=` removes the field
        #[arg(required = true, value_name = "KEY=VALUE")]
        assignments: Vec<String>,
    },
    /// Delete a record and queue the delete
    Delete {
        /// Record ID or unique ID prefix
        id: String,
    },
    /// Replay queued changes against the remote authority
    Sync {
        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show sync state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued changes in replay order
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List changes that exhausted their retries
    Failed {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Reset failed changes and sync again
    Retry,
    /// List sync conflicts
    Conflicts {
        /// Include settled conflicts
        #[arg(long)]
        all: bool,
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Settle a pending conflict
    Resolve {
        /// Conflict ID
        id: String,
        /// Which copy wins
        #[arg(long = "use", value_enum)]
        choice: ResolveChoice,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ResolveChoice {
    Local,
    Server,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
