//! CLI argument definitions for testhub.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// testhub - store test runs and report on them by tag.
///
/// Start with `testhub init`, then `testhub run ingest <file>`.
#[derive(Parser, Debug)]
#[command(name = "testhub")]
#[command(author, version, about = "Test run reporting: status, tag summaries and preferred projects", long_about = None)]
#[command(long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("TESTHUB_GIT_COMMIT"),
    ", built ",
    env!("TESTHUB_BUILD_TIMESTAMP"),
    ")"
))]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Path of the SQLite database (overrides $TESTHUB_DB)
    #[arg(long = "db", global = true)]
    pub database: Option<PathBuf>,

    /// Path of the config.kdl file (overrides $TESTHUB_CONFIG)
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the database
    Init,

    /// Project management commands
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Test run commands
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },

    /// Preferred project commands
    Prefs {
        #[command(subcommand)]
        command: PrefsCommands,
    },

    /// User display settings
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Recompute the stored status of every test run (Ctrl+C to stop)
    Backfill,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Project subcommands
#[derive(Subcommand, Debug)]
pub enum ProjectCommands {
    /// Create a project
    Create {
        /// Project name (must be unique)
        name: String,
    },

    /// List projects
    List,

    /// Delete a project (its test runs are kept)
    Delete {
        /// Project UUID
        uuid: String,
    },
}

/// Test run subcommands
#[derive(Subcommand, Debug)]
pub enum RunCommands {
    /// Ingest a test run from a JSON file ("-" reads stdin)
    Ingest {
        /// Path of the JSON payload, or "-"
        source: String,
    },

    /// Show a test run with its suites and specs
    Show {
        /// Test run id
        id: i64,
    },

    /// Derive a test run's status from its specs
    Status {
        /// Test run id
        id: i64,
    },

    /// Summarize a test run's specs grouped by tag
    Summary {
        /// Test run id
        id: i64,

        /// Tag names to group by, in order (comma-separated)
        #[arg(short = 'g', long = "group-by", value_delimiter = ',')]
        group_by: Vec<String>,
    },

    /// List test runs one page at a time
    List {
        /// Page size
        #[arg(long)]
        first: Option<usize>,

        /// Cursor to continue after (from a previous page's end cursor)
        #[arg(long)]
        after: Option<String>,

        /// Order key: id, start-time or end-time
        #[arg(long = "order-by")]
        order_by: Option<String>,

        /// Sort descending
        #[arg(long)]
        desc: bool,

        /// Only runs of this project (UUID)
        #[arg(long)]
        project: Option<String>,
    },

    /// Delete a test run with its suites and specs
    Delete {
        /// Test run id
        id: i64,
    },
}

/// Preference subcommands
#[derive(Subcommand, Debug)]
pub enum PrefsCommands {
    /// Show a user's groups and favourites
    Show {
        /// User cookie
        cookie: String,
    },

    /// Replace groups from a JSON array ("-" reads stdin)
    ///
    /// Each element is {"group_id": 0, "group_name": "...", "projects": ["<uuid or name>", ...]}.
    /// A zero or missing group_id creates a new group.
    Set {
        /// User cookie
        cookie: String,

        /// Path of the JSON payload, or "-"
        source: String,
    },

    /// Delete groups and their memberships
    Delete {
        /// User cookie
        cookie: String,

        /// Group ids to delete
        #[arg(required = true)]
        group_ids: Vec<i64>,
    },

    /// Add an ungrouped favourite project
    Favourite {
        /// User cookie
        cookie: String,

        /// Project UUID
        uuid: String,
    },

    /// Remove an ungrouped favourite project
    Unfavourite {
        /// User cookie
        cookie: String,

        /// Project UUID
        uuid: String,
    },
}

/// User subcommands
#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// Create a user or update its display flags
    Set {
        /// User cookie
        cookie: String,

        /// Dark mode on or off
        #[arg(long)]
        dark: Option<bool>,

        /// Preferred timezone (e.g. "Europe/Berlin")
        #[arg(long)]
        timezone: Option<String>,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the resolved configuration and where each value came from
    Show,
}
