//! Ingest payloads for new test runs.
//!
//! These mirror the persisted tree without row identities. Tags are given by
//! name and value and are resolved to shared `Tag` rows during ingest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTag {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSpecRun {
    pub spec_description: String,
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub tags: Vec<NewTag>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSuiteRun {
    pub suite_name: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub spec_runs: Vec<NewSpecRun>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTestRun {
    #[serde(default)]
    pub project_uuid: Option<Uuid>,
    #[serde(default)]
    pub test_seed: i64,
    #[serde(default)]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub git_sha: Option<String>,
    #[serde(default)]
    pub build_url: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub suite_runs: Vec<NewSuiteRun>,
}

impl NewTestRun {
    /// Reject payloads that cannot be stored meaningfully.
    pub fn validate(&self) -> Result<()> {
        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(Error::InvalidInput(
                    "test run end_time precedes start_time".to_string(),
                ));
            }
        }
        for suite in &self.suite_runs {
            if suite.suite_name.trim().is_empty() {
                return Err(Error::InvalidInput("suite_name must not be empty".to_string()));
            }
            for spec in &suite.spec_runs {
                if spec.status.trim().is_empty() {
                    return Err(Error::InvalidInput(format!(
                        "spec '{}' has an empty status",
                        spec.spec_description
                    )));
                }
                if spec.tags.iter().any(|t| t.name.trim().is_empty()) {
                    return Err(Error::InvalidInput(format!(
                        "spec '{}' has a tag with an empty name",
                        spec.spec_description
                    )));
                }
            }
        }
        Ok(())
    }

    /// Spec statuses across all suites, in order.
    pub fn spec_statuses(&self) -> impl Iterator<Item = &str> {
        self.suite_runs
            .iter()
            .flat_map(|s| s.spec_runs.iter())
            .map(|s| s.status.as_str())
    }
}
