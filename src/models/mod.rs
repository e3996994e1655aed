//! Data models for testhub entities.
//!
//! This module defines the persisted entities:
//! - `TestRun` - One execution of a project's tests, owning suite runs
//! - `SuiteRun` - A logical grouping of specs inside a run
//! - `SpecRun` - A single test case result with tags
//! - `Tag` - A name/value label used for dynamic grouping
//! - `ProjectDetails` - A project that runs are reported against
//! - `AppUser`, `ProjectGroup`, `PreferredProject` - Per-user project preferences
//!
//! Ingest payloads live in [`ingest`], preference requests and views in
//! [`preferences`].

pub mod ingest;
pub mod preferences;

pub use ingest::{NewSpecRun, NewSuiteRun, NewTag, NewTestRun};
pub use preferences::{
    DeleteOutcome, GroupSpec, GroupView, PreferenceView, ReplaceOutcome, UserPreferences,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Overall status of a test run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    #[default]
    Passed,
    Failed,
    Skipped,
}

impl RunStatus {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PASSED" => Some(RunStatus::Passed),
            "FAILED" => Some(RunStatus::Failed),
            "SKIPPED" => Some(RunStatus::Skipped),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Passed => "PASSED",
            RunStatus::Failed => "FAILED",
            RunStatus::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a single spec run's free-form status string is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecOutcome {
    Passed,
    Failed,
    Skipped,
    /// Anything outside the three canonical values
    Pending,
}

impl SpecOutcome {
    /// Classify a spec status, case-insensitively.
    pub fn classify(status: &str) -> Self {
        if status.eq_ignore_ascii_case("failed") {
            SpecOutcome::Failed
        } else if status.eq_ignore_ascii_case("skipped") {
            SpecOutcome::Skipped
        } else if status.eq_ignore_ascii_case("passed") {
            SpecOutcome::Passed
        } else {
            SpecOutcome::Pending
        }
    }
}

/// A name/value label attached to spec runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// A project that test runs report against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDetails {
    /// Row identity, never exposed as the project's public id
    #[serde(skip)]
    pub id: i64,

    /// Stable public identifier
    pub uuid: Uuid,

    /// Display name
    pub name: String,

    pub created_at: DateTime<Utc>,
}

/// One individual test case result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecRun {
    pub id: i64,
    pub suite_id: i64,
    pub spec_description: String,

    /// Free-form status, canonically "passed", "failed" or "skipped"
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default)]
    pub tags: Vec<Tag>,

    pub start_time: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl SpecRun {
    /// Value of the first tag named `name`, if any.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name == name)
            .and_then(|t| t.value.as_deref())
    }
}

/// A grouping of spec runs within a test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteRun {
    pub id: i64,
    pub test_run_id: i64,
    pub suite_name: String,
    pub start_time: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub spec_runs: Vec<SpecRun>,
}

/// One execution of a test project, materialized with its full tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    pub id: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectDetails>,

    pub test_seed: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_sha: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_url: Option<String>,

    pub start_time: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    /// Stored derived status; `None` until computed or backfilled
    pub status: Option<RunStatus>,

    #[serde(default)]
    pub suite_runs: Vec<SuiteRun>,
}

impl TestRun {
    /// All spec runs across all suites, in suite order.
    pub fn spec_runs(&self) -> impl Iterator<Item = &SpecRun> {
        self.suite_runs.iter().flat_map(|s| s.spec_runs.iter())
    }

    pub fn spec_count(&self) -> usize {
        self.suite_runs.iter().map(|s| s.spec_runs.len()).sum()
    }
}

/// A user identified by an opaque cookie string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppUser {
    #[serde(skip)]
    pub id: i64,
    pub cookie: String,
    pub is_dark: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// A user-scoped named bucket of preferred projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectGroup {
    pub group_id: i64,
    #[serde(skip)]
    pub user_id: i64,
    pub group_name: String,
}

/// Join row between a user, a project and an optional group.
///
/// `group_id == None` means the project is an ungrouped favourite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredProject {
    pub id: i64,
    pub user_id: i64,
    pub project_id: i64,
    pub group_id: Option<i64>,
}
