//! KDL schema for config.kdl.
//!
//! ```kdl
//! database "/var/lib/testhub/testhub.db"
//! default-group-by "component" "owner" "category" "priority"
//! page-size 20
//! backfill-batch-size 100
//! output-format "json"  // or "human"
//! log-format "human"    // or "json"
//! ```

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::pagination::MAX_PAGE_SIZE;
use crate::summary::is_valid_dimension;
use crate::{Error, Result};

/// Largest accepted backfill batch.
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Output format for CLI command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON output (default, machine-readable)
    #[default]
    Json,
    /// Human-readable output
    Human,
}

impl OutputFormat {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "human" => Some(OutputFormat::Human),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Human => "human",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settings stored in config.kdl. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TesthubConfig {
    /// Path of the SQLite database
    pub database: Option<PathBuf>,

    /// Dimensions used when a summary request names none
    pub default_group_by: Option<Vec<String>>,

    /// Page size used when a list request names none
    pub page_size: Option<usize>,

    pub backfill_batch_size: Option<usize>,

    /// Format of command results on stdout
    pub output_format: Option<OutputFormat>,

    /// Format of log lines on stderr
    pub log_format: Option<OutputFormat>,
}

impl TesthubConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(size) = self.page_size {
            if !(1..=MAX_PAGE_SIZE).contains(&size) {
                return Err(format!("page-size must be 1-{}, got {}", MAX_PAGE_SIZE, size));
            }
        }
        if let Some(size) = self.backfill_batch_size {
            if !(1..=MAX_BATCH_SIZE).contains(&size) {
                return Err(format!(
                    "backfill-batch-size must be 1-{}, got {}",
                    MAX_BATCH_SIZE, size
                ));
            }
        }
        if let Some(ref dims) = self.default_group_by {
            if dims.is_empty() {
                return Err("default-group-by needs at least one dimension".to_string());
            }
            if let Some(bad) = dims.iter().find(|d| !is_valid_dimension(d)) {
                return Err(format!("default-group-by has an invalid dimension {:?}", bad));
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document. Values of the wrong type are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        if let Some(s) = first_string(doc, "database") {
            config.database = Some(PathBuf::from(s));
        }

        if let Some(node) = doc.get("default-group-by") {
            let dims: Vec<String> = node
                .entries()
                .iter()
                .filter(|e| e.name().is_none())
                .filter_map(|e| e.value().as_string())
                .map(|s| s.to_string())
                .collect();
            config.default_group_by = Some(dims);
        }

        config.page_size = first_usize(doc, "page-size");
        config.backfill_batch_size = first_usize(doc, "backfill-batch-size");
        config.output_format = first_string(doc, "output-format").and_then(OutputFormat::parse);
        config.log_format = first_string(doc, "log-format").and_then(OutputFormat::parse);

        config
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(ref path) = self.database {
            push_string(&mut doc, "database", &path.display().to_string());
        }

        if let Some(ref dims) = self.default_group_by {
            let mut node = KdlNode::new("default-group-by");
            for dim in dims {
                node.push(KdlEntry::new(KdlValue::String(dim.clone())));
            }
            doc.nodes_mut().push(node);
        }

        if let Some(size) = self.page_size {
            push_integer(&mut doc, "page-size", size);
        }
        if let Some(size) = self.backfill_batch_size {
            push_integer(&mut doc, "backfill-batch-size", size);
        }
        if let Some(format) = self.output_format {
            push_string(&mut doc, "output-format", format.as_str());
        }
        if let Some(format) = self.log_format {
            push_string(&mut doc, "log-format", format.as_str());
        }

        doc
    }

    /// Load config from a KDL file. A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)?;
        let doc: KdlDocument = content.parse().map_err(|e| {
            Error::Config(format!("Failed to parse KDL in {}: {}", path.display(), e))
        })?;

        let config = Self::from_kdl(&doc);
        config
            .validate()
            .map_err(|msg| Error::Config(format!("{}: {}", path.display(), msg)))?;
        Ok(config)
    }
}

fn first_value<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a KdlValue> {
    doc.get(name)
        .and_then(|node| node.entries().first())
        .map(|entry| entry.value())
}

fn first_string<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a str> {
    first_value(doc, name).and_then(|v| v.as_string())
}

fn first_usize(doc: &KdlDocument, name: &str) -> Option<usize> {
    first_value(doc, name)
        .and_then(|v| v.as_integer())
        .and_then(|i| usize::try_from(i).ok())
}

fn push_string(doc: &mut KdlDocument, name: &str, value: &str) {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(KdlValue::String(value.to_string())));
    doc.nodes_mut().push(node);
}

fn push_integer(doc: &mut KdlDocument, name: &str, value: usize) {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(KdlValue::Integer(value as i128)));
    doc.nodes_mut().push(node);
}
