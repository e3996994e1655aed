//! Command implementations for the testhub CLI.
//!
//! Each command takes an open [`Storage`] (or the resolved config) and
//! returns a result value implementing [`Output`], which `main` prints as
//! JSON or as human-readable text. Commands are grouped by entity:
//! - `init` - create the database
//! - `project_*` - project CRUD
//! - `run_*` - ingest, inspect, summarize and page through test runs
//! - `prefs_*`, `user_set` - per-user preferred projects and flags
//! - `backfill` - recompute stored run statuses
//! - `config_show` - resolved configuration

use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::backfill::{Backfill, BackfillReport};
use crate::cancel::CancellationToken;
use crate::config::ResolvedConfig;
use crate::models::{
    DeleteOutcome, GroupSpec, GroupView, NewTestRun, PreferenceView, ProjectDetails,
    ReplaceOutcome, RunStatus, TestRun, UserPreferences,
};
use crate::pagination::{Connection, Cursor, OrderKey, PageRequest};
use crate::status::derive_status;
use crate::storage::Storage;
use crate::summary::{GroupBy, StatusCounts, SummaryReport, count_statuses, summarize};
use crate::{Error, Result};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        serde_json::json!({ "error": e.to_string(), "kind": "internal" }).to_string()
    })
}

/// Parse a UUID argument.
pub fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| Error::InvalidInput(format!("not a valid UUID: {}", raw)))
}

/// Read command input from a file, or from stdin when `source` is `-`.
pub fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(std::fs::read_to_string(source)?)
    }
}

// === Init ===

#[derive(Serialize)]
pub struct InitResult {
    pub database: PathBuf,
    pub created: bool,
}

impl Output for InitResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.created {
            format!("Initialized testhub database at {}", self.database.display())
        } else {
            format!("Database already initialized at {}", self.database.display())
        }
    }
}

/// Create the database if it does not exist yet.
pub fn init(database: &Path) -> Result<InitResult> {
    let created = !Storage::exists(database);
    Storage::init(database)?;
    Ok(InitResult {
        database: database.to_path_buf(),
        created,
    })
}

// === Projects ===

#[derive(Serialize)]
pub struct ProjectResult {
    pub project: ProjectDetails,
}

impl Output for ProjectResult {
    fn to_json(&self) -> String {
        json(&self.project)
    }

    fn to_human(&self) -> String {
        format!("{}  {}", self.project.uuid, self.project.name)
    }
}

#[derive(Serialize)]
pub struct ProjectList {
    pub projects: Vec<ProjectDetails>,
    pub count: usize,
}

impl Output for ProjectList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.projects.is_empty() {
            return "No projects.".to_string();
        }
        let mut lines = vec![format!("{} project(s):", self.count)];
        for p in &self.projects {
            lines.push(format!("  {}  {}", p.uuid, p.name));
        }
        lines.join("\n")
    }
}

/// Result of a delete-style command.
#[derive(Serialize)]
pub struct Deleted {
    pub deleted: String,
    pub kind: &'static str,
}

impl Output for Deleted {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Deleted {} {}", self.kind, self.deleted)
    }
}

pub fn project_create(storage: &mut Storage, name: &str) -> Result<ProjectResult> {
    let project = storage.create_project(name)?;
    Ok(ProjectResult { project })
}

pub fn project_list(storage: &Storage) -> Result<ProjectList> {
    let projects = storage.list_projects()?;
    Ok(ProjectList {
        count: projects.len(),
        projects,
    })
}

pub fn project_delete(storage: &mut Storage, uuid: &str) -> Result<Deleted> {
    let uuid = parse_uuid(uuid)?;
    storage.delete_project(&uuid)?;
    Ok(Deleted {
        deleted: uuid.to_string(),
        kind: "project",
    })
}

// === Test runs ===

#[derive(Serialize)]
pub struct RunIngested {
    pub id: i64,
    pub status: Option<RunStatus>,
    pub suites: usize,
    pub specs: usize,
}

impl Output for RunIngested {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Ingested test run {} ({} suite(s), {} spec(s), {})",
            self.id,
            self.suites,
            self.specs,
            self.status.map(|s| s.as_str()).unwrap_or("no status"),
        )
    }
}

/// Ingest a JSON test run payload.
pub fn run_ingest(
    storage: &mut Storage,
    source: &str,
    cancel: &CancellationToken,
) -> Result<RunIngested> {
    let input: NewTestRun = serde_json::from_str(&read_input(source)?)?;
    let run = storage.ingest_test_run(&input, cancel)?;
    Ok(RunIngested {
        id: run.id,
        status: run.status,
        suites: run.suite_runs.len(),
        specs: run.spec_count(),
    })
}

#[derive(Serialize)]
#[serde(transparent)]
pub struct RunShow {
    pub run: TestRun,
}

impl Output for RunShow {
    fn to_json(&self) -> String {
        json(&self.run)
    }

    fn to_human(&self) -> String {
        let run = &self.run;
        let mut lines = vec![format!(
            "Test run {} [{}]",
            run.id,
            run.status.map(|s| s.as_str()).unwrap_or("no status")
        )];
        if let Some(ref project) = run.project {
            lines.push(format!("  Project: {} ({})", project.name, project.uuid));
        }
        lines.push(format!("  Seed: {}", run.test_seed));
        if let Some(ref branch) = run.git_branch {
            lines.push(format!(
                "  Git: {} {}",
                branch,
                run.git_sha.as_deref().unwrap_or("")
            ));
        }
        lines.push(format!("  Started: {}", run.start_time.to_rfc3339()));
        if let Some(end) = run.end_time {
            lines.push(format!("  Ended: {}", end.to_rfc3339()));
        }
        for suite in &run.suite_runs {
            lines.push(format!("  Suite: {}", suite.suite_name));
            for spec in &suite.spec_runs {
                lines.push(format!("    [{}] {}", spec.status, spec.spec_description));
            }
        }
        lines.join("\n")
    }
}

pub fn run_show(storage: &Storage, id: i64) -> Result<RunShow> {
    Ok(RunShow {
        run: storage.load_full(id)?,
    })
}

#[derive(Serialize)]
pub struct RunStatusResult {
    pub id: i64,
    pub status: RunStatus,
    /// Status currently stored for the run, if any
    pub stored: Option<RunStatus>,
    pub counts: StatusCounts,
}

impl Output for RunStatusResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut line = format!(
            "Test run {}: {} ({} spec(s): {} passed, {} failed, {} skipped",
            self.id,
            self.status,
            self.counts.total,
            self.counts.passed,
            self.counts.failed,
            self.counts.skipped
        );
        if self.counts.pending > 0 {
            line.push_str(&format!(", {} pending", self.counts.pending));
        }
        line.push(')');
        if self.stored != Some(self.status) {
            line.push_str("\n  Stored status is out of date; run `testhub backfill`");
        }
        line
    }
}

/// Derive a run's status from its specs.
pub fn run_status(storage: &Storage, id: i64) -> Result<RunStatusResult> {
    let run = storage.load_full(id)?;
    Ok(RunStatusResult {
        id,
        status: derive_status(&run),
        stored: run.status,
        counts: count_statuses(&run),
    })
}

impl Output for SummaryReport {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let head = &self.head;
        let mut lines = vec![format!(
            "Test run {} [{}] {} spec(s), seed {}",
            head.test_run_id, head.status, head.spec_count, head.test_seed
        )];
        if let Some(ref project) = head.project {
            lines.push(format!("Project: {} ({})", project.name, project.uuid));
        }
        lines.push(format!("Grouped by: {}", head.group_by.join(", ")));
        if self.summary.is_empty() {
            lines.push("No specs.".to_string());
        }
        for entry in &self.summary {
            let group = entry
                .group
                .pairs()
                .iter()
                .map(|(dim, value)| format!("{}={}", dim, value))
                .collect::<Vec<_>>()
                .join(" ");
            let c = &entry.counts;
            let mut line = format!(
                "  {}  total {} / passed {} / failed {} / skipped {}",
                group, c.total, c.passed, c.failed, c.skipped
            );
            if c.pending > 0 {
                line.push_str(&format!(" / pending {}", c.pending));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

/// Summarize a run by tag dimensions; no dimensions means the defaults.
pub fn run_summary(
    storage: &Storage,
    id: i64,
    group_by: &[String],
    defaults: &GroupBy,
) -> Result<SummaryReport> {
    let run = storage.load_full(id)?;
    Ok(summarize(&run, &GroupBy::resolve(group_by, defaults)))
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct RunList {
    pub page: Connection<TestRun>,
}

impl Output for RunList {
    fn to_json(&self) -> String {
        json(&self.page)
    }

    fn to_human(&self) -> String {
        let page = &self.page;
        if page.edges.is_empty() {
            return format!("No test runs on this page ({} total).", page.total_count);
        }
        let mut lines = vec![format!(
            "{} of {} test run(s):",
            page.edges.len(),
            page.total_count
        )];
        for run in page.nodes() {
            lines.push(format!(
                "  {:>6}  {:<7}  {}  {}",
                run.id,
                run.status.map(|s| s.as_str()).unwrap_or("-"),
                run.start_time.to_rfc3339(),
                run.project.as_ref().map(|p| p.name.as_str()).unwrap_or("-"),
            ));
        }
        if let (true, Some(cursor)) = (page.page_info.has_next_page, &page.page_info.end_cursor) {
            lines.push(format!("Next page: --after {}", cursor));
        }
        lines.join("\n")
    }
}

/// Options for `run list`.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub first: Option<usize>,
    pub after: Option<String>,
    pub order_by: Option<String>,
    pub desc: bool,
    pub project: Option<String>,
}

pub fn run_list(
    storage: &Storage,
    options: &ListOptions,
    default_page_size: usize,
    cancel: &CancellationToken,
) -> Result<RunList> {
    let order_by = match options.order_by.as_deref() {
        Some(raw) => OrderKey::parse(raw).ok_or_else(|| {
            Error::InvalidInput(format!(
                "unknown order key {:?} (expected id, start-time or end-time)",
                raw
            ))
        })?,
        None => OrderKey::default(),
    };
    let mut request = PageRequest::new(options.first.unwrap_or(default_page_size))
        .order_by(order_by, options.desc);
    if let Some(ref after) = options.after {
        request = request.after(Cursor::from(after.as_str()));
    }
    let project = options.project.as_deref().map(parse_uuid).transpose()?;

    let page = storage.list_test_runs(&request, project.as_ref(), cancel)?;
    Ok(RunList { page })
}

pub fn run_delete(storage: &mut Storage, id: i64) -> Result<Deleted> {
    storage.delete_test_run(id)?;
    Ok(Deleted {
        deleted: id.to_string(),
        kind: "test run",
    })
}

// === Preferences ===

fn human_groups(groups: &[GroupView], lines: &mut Vec<String>) {
    for group in groups {
        lines.push(format!("  [{}] {}", group.group_id, group.group_name));
        for p in &group.projects {
            lines.push(format!("      {}  {}", p.uuid, p.name));
        }
    }
}

impl Output for PreferenceView {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("Preferences for {}", self.cookie)];
        if self.groups.is_empty() {
            lines.push("  No groups.".to_string());
        }
        human_groups(&self.groups, &mut lines);
        if !self.favourites.is_empty() {
            lines.push("  Favourites:".to_string());
            for p in &self.favourites {
                lines.push(format!("      {}  {}", p.uuid, p.name));
            }
        }
        lines.join("\n")
    }
}

impl Output for ReplaceOutcome {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("Saved {} group(s)", self.groups.len())];
        human_groups(&self.groups, &mut lines);
        if !self.skipped_projects.is_empty() {
            lines.push(format!("  Skipped: {}", self.skipped_projects.join(", ")));
        }
        lines.join("\n")
    }
}

impl Output for DeleteOutcome {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Deleted {} group(s) and {} membership(s)",
            self.groups_deleted, self.memberships_deleted
        )
    }
}

pub fn prefs_show(storage: &Storage, cookie: &str) -> Result<PreferenceView> {
    storage.preferred_projects(cookie)
}

/// Replace preferred project groups from a JSON array of groups.
pub fn prefs_set(
    storage: &mut Storage,
    cookie: &str,
    source: &str,
    cancel: &CancellationToken,
) -> Result<ReplaceOutcome> {
    let groups: Vec<GroupSpec> = serde_json::from_str(&read_input(source)?)?;
    storage.replace_preferences(cookie, &groups, cancel)
}

pub fn prefs_delete(
    storage: &mut Storage,
    cookie: &str,
    group_ids: &[i64],
    cancel: &CancellationToken,
) -> Result<DeleteOutcome> {
    storage.delete_preferences(cookie, group_ids, cancel)
}

#[derive(Serialize)]
pub struct FavouriteResult {
    pub cookie: String,
    pub project: ProjectDetails,
    pub favourite: bool,
}

impl Output for FavouriteResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.favourite {
            format!("Added {} to favourites", self.project.name)
        } else {
            format!("Removed {} from favourites", self.project.name)
        }
    }
}

pub fn prefs_favourite(storage: &mut Storage, cookie: &str, uuid: &str) -> Result<FavouriteResult> {
    let project = storage.add_favourite(cookie, &parse_uuid(uuid)?)?;
    Ok(FavouriteResult {
        cookie: cookie.to_string(),
        project,
        favourite: true,
    })
}

pub fn prefs_unfavourite(
    storage: &mut Storage,
    cookie: &str,
    uuid: &str,
) -> Result<FavouriteResult> {
    let uuid = parse_uuid(uuid)?;
    storage.remove_favourite(cookie, &uuid)?;
    Ok(FavouriteResult {
        cookie: cookie.to_string(),
        project: storage.get_project(&uuid)?,
        favourite: false,
    })
}

#[derive(Serialize)]
#[serde(transparent)]
pub struct UserResult {
    pub user: crate::models::AppUser,
}

impl Output for UserResult {
    fn to_json(&self) -> String {
        json(&self.user)
    }

    fn to_human(&self) -> String {
        format!(
            "User {} (dark mode: {}, timezone: {})",
            self.user.cookie,
            if self.user.is_dark { "on" } else { "off" },
            self.user.timezone.as_deref().unwrap_or("unset")
        )
    }
}

pub fn user_set(
    storage: &mut Storage,
    cookie: &str,
    is_dark: Option<bool>,
    timezone: Option<String>,
) -> Result<UserResult> {
    let user = storage.upsert_user(cookie, &UserPreferences { is_dark, timezone })?;
    Ok(UserResult { user })
}

// === Backfill ===

impl Output for BackfillReport {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.is_noop() {
            return "All test runs already have a status.".to_string();
        }
        let mut line = format!(
            "Backfilled {} of {} test run(s) in {} batch(es)",
            self.updated, self.processed, self.batches
        );
        if !self.failed.is_empty() {
            let ids: Vec<String> = self.failed.iter().map(|id| id.to_string()).collect();
            line.push_str(&format!("\n  Failed: {} (re-run to retry)", ids.join(", ")));
        }
        line
    }
}

pub fn backfill(
    storage: &mut Storage,
    batch_size: usize,
    cancel: &CancellationToken,
) -> Result<BackfillReport> {
    Backfill::new(batch_size).run(storage, cancel)
}

// === Config ===

#[derive(Serialize)]
#[serde(transparent)]
pub struct ConfigShow {
    pub config: ResolvedConfig,
}

impl Output for ConfigShow {
    fn to_json(&self) -> String {
        json(&self.config)
    }

    fn to_human(&self) -> String {
        let c = &self.config;
        let mut lines = vec![match c.config_path {
            Some(ref path) => format!("Config file: {}", path.display()),
            None => "Config file: (none)".to_string(),
        }];
        lines.push(format!(
            "  database = {}  ({})",
            c.database.value.display(),
            c.database.source
        ));
        lines.push(format!(
            "  default-group-by = {}  ({})",
            c.default_group_by.value.join(", "),
            c.default_group_by.source
        ));
        lines.push(format!("  page-size = {}  ({})", c.page_size.value, c.page_size.source));
        lines.push(format!(
            "  backfill-batch-size = {}  ({})",
            c.backfill_batch_size.value, c.backfill_batch_size.source
        ));
        lines.push(format!(
            "  output-format = {}  ({})",
            c.output_format.value, c.output_format.source
        ));
        lines.push(format!(
            "  log-format = {}  ({})",
            c.log_format.value, c.log_format.source
        ));
        lines.join("\n")
    }
}

pub fn config_show(config: &ResolvedConfig) -> ConfigShow {
    ConfigShow {
        config: config.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::new_run;
    use tempfile::TempDir;

    const PAYLOAD: &str = r#"{
        "test_seed": 9,
        "start_time": "2024-03-01T12:00:00Z",
        "end_time": "2024-03-01T12:05:00Z",
        "suite_runs": [{
            "suite_name": "Checkout",
            "start_time": "2024-03-01T12:00:00Z",
            "spec_runs": [
                {"spec_description": "pays", "status": "passed",
                 "start_time": "2024-03-01T12:00:01Z",
                 "tags": [{"name": "owner", "value": "payments"}]},
                {"spec_description": "refunds", "status": "failed",
                 "start_time": "2024-03-01T12:00:02Z",
                 "tags": [{"name": "owner", "value": "payments"}]}
            ]
        }]
    }"#;

    fn ingest_payload(storage: &mut Storage) -> RunIngested {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.json");
        std::fs::write(&path, PAYLOAD).unwrap();
        run_ingest(storage, path.to_str().unwrap(), &CancellationToken::new()).unwrap()
    }

    #[test]
    fn test_init_reports_creation() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("hub.db");
        assert!(init(&db).unwrap().created);
        assert!(!init(&db).unwrap().created);
    }

    #[test]
    fn test_ingest_then_status_and_summary() {
        let mut storage = Storage::open_in_memory().unwrap();
        let ingested = ingest_payload(&mut storage);
        assert_eq!(ingested.status, Some(RunStatus::Failed));
        assert_eq!(ingested.specs, 2);

        let status = run_status(&storage, ingested.id).unwrap();
        assert_eq!(status.status, RunStatus::Failed);
        assert_eq!(status.stored, Some(RunStatus::Failed));
        assert_eq!(status.counts.total, 2);

        let report = run_summary(&storage, ingested.id, &["owner".to_string()], &GroupBy::default())
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(value["summary"][0]["group"]["owner"], "payments");
        assert_eq!(value["summary"][0]["total"], 2);
        assert!(report.to_human().contains("owner=payments"));
    }

    #[test]
    fn test_status_and_summary_count_pending_specs() {
        let mut storage = Storage::open_in_memory().unwrap();
        let run = storage
            .ingest_test_run(
                &new_run(None, &[("passed", &[("owner", "amy")]), ("pending", &[("owner", "amy")])]),
                &CancellationToken::new(),
            )
            .unwrap();

        let status = run_status(&storage, run.id).unwrap();
        assert_eq!(status.counts.total, 2);
        assert_eq!(status.counts.pending, 1);
        assert!(status.to_human().contains("1 pending"));

        let report =
            run_summary(&storage, run.id, &["owner".to_string()], &GroupBy::default()).unwrap();
        let text = report.to_human();
        assert!(text.contains("owner=amy  total 2 / passed 1"));
        assert!(text.contains("/ pending 1"));
    }

    #[test]
    fn test_run_list_rejects_unknown_order_key() {
        let storage = Storage::open_in_memory().unwrap();
        let options = ListOptions {
            order_by: Some("seed".to_string()),
            ..ListOptions::default()
        };
        let err = run_list(&storage, &options, 20, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_run_list_uses_default_page_size() {
        let mut storage = Storage::open_in_memory().unwrap();
        for _ in 0..3 {
            ingest_payload(&mut storage);
        }
        let list = run_list(&storage, &ListOptions::default(), 2, &CancellationToken::new())
            .unwrap();
        assert_eq!(list.page.edges.len(), 2);
        assert!(list.page.page_info.has_next_page);
        assert!(list.to_human().contains("Next page: --after"));
    }

    #[test]
    fn test_parse_uuid_rejects_garbage() {
        assert!(matches!(parse_uuid("nope"), Err(Error::InvalidInput(_))));
        let uuid = Uuid::new_v4();
        assert_eq!(parse_uuid(&format!(" {} ", uuid)).unwrap(), uuid);
    }

    #[test]
    fn test_unfavourite_reports_project() {
        let mut storage = Storage::open_in_memory().unwrap();
        storage.upsert_user("c", &UserPreferences::default()).unwrap();
        let project = storage.create_project("web").unwrap();
        let uuid = project.uuid.to_string();
        prefs_favourite(&mut storage, "c", &uuid).unwrap();
        let removed = prefs_unfavourite(&mut storage, "c", &uuid).unwrap();
        assert!(!removed.favourite);
        assert_eq!(removed.project, project);
    }

    #[test]
    fn test_backfill_human_output() {
        let report = BackfillReport {
            missing: 2,
            processed: 2,
            updated: 1,
            batches: 1,
            failed: vec![4],
        };
        let text = report.to_human();
        assert!(text.contains("Backfilled 1 of 2"));
        assert!(text.contains("Failed: 4"));
        assert_eq!(BackfillReport::default().to_human(), "All test runs already have a status.");
    }
}
