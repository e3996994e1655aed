//! Tag group-by summaries of a test run.
//!
//! Every spec run is bucketed by the values of the requested tag dimensions.
//! A dimension the spec run is not tagged with resolves to
//! [`UNSPECIFIED`]. Each bucket counts its spec runs by outcome; the report
//! lists buckets sorted by their dimension values in request order.

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::{RunStatus, SpecOutcome, SpecRun, TestRun};
use crate::status::derive_status;

/// Value used for a dimension a spec run carries no tag for.
pub const UNSPECIFIED: &str = "unspecified";

/// Dimensions used when the caller asks for none.
pub const DEFAULT_GROUP_BY: [&str; 4] = ["component", "owner", "category", "priority"];

/// Whether `name` can be used as a grouping dimension.
pub fn is_valid_dimension(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(|c| c.is_control() || c == ',')
}

/// The ordered list of tag dimensions a summary groups by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupBy(Vec<String>);

impl Default for GroupBy {
    fn default() -> Self {
        GroupBy(DEFAULT_GROUP_BY.iter().map(|d| d.to_string()).collect())
    }
}

impl GroupBy {
    /// Resolve the caller's dimensions, falling back to `defaults`.
    ///
    /// Names are trimmed, invalid names dropped and repeats removed. If
    /// nothing usable is left, `defaults` is used instead.
    pub fn resolve<S: AsRef<str>>(requested: &[S], defaults: &GroupBy) -> Self {
        let mut dims: Vec<String> = Vec::new();
        for raw in requested {
            let name = raw.as_ref().trim();
            if !is_valid_dimension(name) {
                tracing::debug!(dimension = raw.as_ref(), "dropping invalid group-by dimension");
                continue;
            }
            if !dims.iter().any(|d| d == name) {
                dims.push(name.to_string());
            }
        }
        if dims.is_empty() {
            defaults.clone()
        } else {
            GroupBy(dims)
        }
    }

    pub fn dimensions(&self) -> &[String] {
        &self.0
    }

    /// Composite key of `spec` under these dimensions.
    pub fn key_for(&self, spec: &SpecRun) -> GroupKey {
        GroupKey(
            self.0
                .iter()
                .map(|dim| {
                    let value = spec.tag_value(dim).unwrap_or(UNSPECIFIED);
                    (dim.clone(), value.to_string())
                })
                .collect(),
        )
    }
}

/// Ordered `(dimension, value)` pairs identifying one summary bucket.
///
/// Serializes as a map in dimension order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey(Vec<(String, String)>);

impl GroupKey {
    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn value(&self, dimension: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(d, _)| d == dimension)
            .map(|(_, v)| v.as_str())
    }

    fn values(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(_, v)| v.as_str())
    }
}

impl From<Vec<(String, String)>> for GroupKey {
    fn from(pairs: Vec<(String, String)>) -> Self {
        GroupKey(pairs)
    }
}

impl Serialize for GroupKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (dimension, value) in &self.0 {
            map.serialize_entry(dimension, value)?;
        }
        map.end()
    }
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// Spec run counts by outcome. Zero counters are left out when serialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub total: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub passed: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub failed: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub skipped: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub pending: u64,
}

impl StatusCounts {
    pub fn record(&mut self, status: &str) {
        self.total += 1;
        match SpecOutcome::classify(status) {
            SpecOutcome::Passed => self.passed += 1,
            SpecOutcome::Failed => self.failed += 1,
            SpecOutcome::Skipped => self.skipped += 1,
            SpecOutcome::Pending => self.pending += 1,
        }
    }
}

/// Counts across every spec run of a test run, without grouping.
pub fn count_statuses(test_run: &TestRun) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for spec in test_run.spec_runs() {
        counts.record(&spec.status);
    }
    counts
}

/// One bucket of the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryEntry {
    pub group: GroupKey,
    #[serde(flatten)]
    pub counts: StatusCounts,
}

/// Project identity shown in a summary head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub uuid: Uuid,
    pub name: String,
}

/// Header block of a summary report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryHead {
    pub test_run_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectRef>,
    pub test_seed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_sha: Option<String>,
    pub status: RunStatus,
    pub spec_count: usize,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub group_by: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryReport {
    pub head: SummaryHead,
    pub summary: Vec<SummaryEntry>,
}

/// Summarize a materialized test run grouped by `group_by`.
pub fn summarize(test_run: &TestRun, group_by: &GroupBy) -> SummaryReport {
    let mut buckets: HashMap<GroupKey, StatusCounts> = HashMap::new();
    for spec in test_run.spec_runs() {
        buckets
            .entry(group_by.key_for(spec))
            .or_default()
            .record(&spec.status);
    }

    let mut summary: Vec<SummaryEntry> = buckets
        .into_iter()
        .map(|(group, counts)| SummaryEntry { group, counts })
        .collect();
    summary.sort_by(compare_entries);

    let head = SummaryHead {
        test_run_id: test_run.id,
        project: test_run.project.as_ref().map(|p| ProjectRef {
            uuid: p.uuid,
            name: p.name.clone(),
        }),
        test_seed: test_run.test_seed,
        git_branch: test_run.git_branch.clone(),
        git_sha: test_run.git_sha.clone(),
        status: derive_status(test_run),
        spec_count: test_run.spec_count(),
        start_time: test_run.start_time,
        end_time: test_run.end_time,
        group_by: group_by.dimensions().to_vec(),
    };

    SummaryReport { head, summary }
}

/// Dimension values in request order, then the serialized entry so equal
/// values still sort the same way every time.
fn compare_entries(a: &SummaryEntry, b: &SummaryEntry) -> Ordering {
    a.group.values().cmp(b.group.values()).then_with(|| {
        let left = serde_json::to_string(a).unwrap_or_default();
        let right = serde_json::to_string(b).unwrap_or_default();
        left.cmp(&right)
    })
}
