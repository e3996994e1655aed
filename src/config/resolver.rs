//! Precedence resolution for configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Environment variables (`TESTHUB_DB`, `TESTHUB_LOG_FORMAT`)
//! 3. config.kdl (`$TESTHUB_CONFIG` or `~/.config/testhub/config.kdl`)
//! 4. Built-in defaults

use serde::Serialize;
use std::path::{Path, PathBuf};

use super::schema::{OutputFormat, TesthubConfig};
use crate::backfill::DEFAULT_BATCH_SIZE;
use crate::pagination::DEFAULT_PAGE_SIZE;
use crate::summary::GroupBy;
use crate::{Error, Result};

/// Environment variable naming the database path.
pub const DB_ENV: &str = "TESTHUB_DB";

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TESTHUB_CONFIG";

/// Environment variable selecting the log format.
pub const LOG_FORMAT_ENV: &str = "TESTHUB_LOG_FORMAT";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from environment variable
    EnvVar(String),
    /// Value from a config file
    File(PathBuf),
    /// Value from CLI flag
    CliFlag,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::File(path) => write!(f, "file:{}", path.display()),
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

impl Serialize for ValueSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, Serialize)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Config file that was consulted, whether or not it existed
    pub config_path: Option<PathBuf>,
    pub database: Resolved<PathBuf>,
    pub default_group_by: Resolved<Vec<String>>,
    pub page_size: Resolved<usize>,
    pub backfill_batch_size: Resolved<usize>,
    pub output_format: Resolved<OutputFormat>,
    pub log_format: Resolved<OutputFormat>,
}

impl ResolvedConfig {
    pub fn database(&self) -> &Path {
        &self.database.value
    }

    /// The configured group-by defaults.
    pub fn group_by(&self) -> GroupBy {
        GroupBy::resolve(&self.default_group_by.value, &GroupBy::default())
    }

    pub fn page_size(&self) -> usize {
        self.page_size.value
    }

    pub fn backfill_batch_size(&self) -> usize {
        self.backfill_batch_size.value
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format.value
    }

    pub fn log_format(&self) -> OutputFormat {
        self.log_format.value
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub output_format: Option<OutputFormat>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database = Some(path.into());
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }
}

/// Default config file location (`~/.config/testhub/config.kdl`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("testhub").join("config.kdl"))
}

/// Default database location (`~/.local/share/testhub/testhub.db`).
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("testhub")
        .join("testhub.db")
}

/// Resolve configuration from the process environment.
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    resolve_config_with_env(overrides, |name| std::env::var(name).ok())
}

/// Resolve configuration with an explicit environment lookup.
///
/// Precedence (highest to lowest):
/// 1. CLI flags (from `overrides`)
/// 2. Environment variables
/// 3. config.kdl
/// 4. Built-in defaults
pub fn resolve_config_with_env<F>(overrides: &ConfigOverrides, env: F) -> Result<ResolvedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |name: &str| env(name).filter(|v| !v.trim().is_empty());

    let config_path = overrides
        .config_path
        .clone()
        .or_else(|| lookup(CONFIG_ENV).map(PathBuf::from))
        .or_else(default_config_path);
    let file = match config_path {
        Some(ref path) => TesthubConfig::load(path)?,
        None => TesthubConfig::new(),
    };
    let from_file = || match config_path {
        Some(ref path) => ValueSource::File(path.clone()),
        None => ValueSource::Default,
    };

    // Resolve database
    let database = if let Some(ref path) = overrides.database {
        Resolved::new(path.clone(), ValueSource::CliFlag)
    } else if let Some(path) = lookup(DB_ENV) {
        Resolved::new(PathBuf::from(path), ValueSource::EnvVar(DB_ENV.to_string()))
    } else if let Some(ref path) = file.database {
        Resolved::new(path.clone(), from_file())
    } else {
        Resolved::new(default_database_path(), ValueSource::Default)
    };

    // Resolve default_group_by
    let default_group_by = match file.default_group_by {
        Some(ref dims) => Resolved::new(dims.clone(), from_file()),
        None => Resolved::new(GroupBy::default().dimensions().to_vec(), ValueSource::Default),
    };

    let page_size = match file.page_size {
        Some(size) => Resolved::new(size, from_file()),
        None => Resolved::new(DEFAULT_PAGE_SIZE, ValueSource::Default),
    };

    let backfill_batch_size = match file.backfill_batch_size {
        Some(size) => Resolved::new(size, from_file()),
        None => Resolved::new(DEFAULT_BATCH_SIZE, ValueSource::Default),
    };

    // Resolve output_format
    let output_format = if let Some(format) = overrides.output_format {
        Resolved::new(format, ValueSource::CliFlag)
    } else if let Some(format) = file.output_format {
        Resolved::new(format, from_file())
    } else {
        Resolved::new(OutputFormat::Json, ValueSource::Default)
    };

    // Resolve log_format
    let log_format = if let Some(raw) = lookup(LOG_FORMAT_ENV) {
        let format = OutputFormat::parse(&raw).ok_or_else(|| {
            Error::Config(format!("{} must be \"human\" or \"json\", got {:?}", LOG_FORMAT_ENV, raw))
        })?;
        Resolved::new(format, ValueSource::EnvVar(LOG_FORMAT_ENV.to_string()))
    } else if let Some(format) = file.log_format {
        Resolved::new(format, from_file())
    } else {
        Resolved::new(OutputFormat::Human, ValueSource::Default)
    };

    Ok(ResolvedConfig {
        config_path,
        database,
        default_group_by,
        page_size,
        backfill_batch_size,
        output_format,
        log_format,
    })
}
