//! Preference requests and views for preferred project groups.

use serde::{Deserialize, Serialize};

use super::ProjectDetails;

/// One requested group in a replace-preferences call.
///
/// A missing or zero `group_id` asks for a new group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    #[serde(default)]
    pub group_id: Option<i64>,
    pub group_name: String,
    #[serde(default)]
    pub projects: Vec<String>,
}

impl GroupSpec {
    pub fn new(group_id: Option<i64>, group_name: impl Into<String>, projects: &[&str]) -> Self {
        Self {
            group_id,
            group_name: group_name.into(),
            projects: projects.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// The group id claimed as pre-existing, if any.
    pub fn claimed_id(&self) -> Option<i64> {
        self.group_id.filter(|id| *id != 0)
    }

    /// Project identifiers with duplicates removed, first occurrence kept.
    pub fn unique_projects(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.projects
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty() && seen.insert(*p))
            .collect()
    }
}

/// A group as seen by its owner, with resolved projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupView {
    pub group_id: i64,
    pub group_name: String,
    pub projects: Vec<ProjectDetails>,
}

/// Result of replacing a user's groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceOutcome {
    pub groups: Vec<GroupView>,

    /// Project identifiers that did not resolve and were left out
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_projects: Vec<String>,
}

/// Result of deleting a user's groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub groups_deleted: usize,
    pub memberships_deleted: usize,
}

/// Everything a user has saved: grouped projects and ungrouped favourites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceView {
    pub cookie: String,
    pub groups: Vec<GroupView>,
    pub favourites: Vec<ProjectDetails>,
}

/// Per-user display flags. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub is_dark: Option<bool>,
    #[serde(default)]
    pub timezone: Option<String>,
}
