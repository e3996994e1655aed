//! Configuration for testhub.
//!
//! Settings live in a single KDL file, `config.kdl`, located at
//! `$TESTHUB_CONFIG` or `~/.config/testhub/config.kdl`:
//!
//! - `database` - SQLite database path
//! - `default-group-by` - summary dimensions used when none are requested
//! - `page-size` - default page size for `run list` (1-1000)
//! - `backfill-batch-size` - records per backfill batch (1-10000)
//! - `output-format` - "json" or "human"
//! - `log-format` - "human" or "json"
//!
//! ## Precedence
//!
//! CLI flag > environment variable > config.kdl > defaults
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    CONFIG_ENV, ConfigOverrides, DB_ENV, LOG_FORMAT_ENV, Resolved, ResolvedConfig, ValueSource,
    default_config_path, default_database_path, resolve_config, resolve_config_with_env,
};
pub use schema::{MAX_BATCH_SIZE, OutputFormat, TesthubConfig};
