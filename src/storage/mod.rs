//! Storage layer for testhub data.
//!
//! A single SQLite database holds projects, test runs and their
//! suite/spec/tag tree, and per-user project preferences. Cascades are
//! declared in the schema:
//!
//! - test run → suite runs → spec runs → spec/tag links
//! - user → project groups and preferred projects
//! - project or group → preferred projects
//!
//! Reads hand back fully materialized trees ([`Storage::load_full`]); nothing
//! is lazily loaded. Multi-step writes run inside one immediate transaction
//! and roll back as a whole.

pub mod preferences;
pub mod tags;

pub use tags::resolve_tag;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, InterruptHandle, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::models::{
    AppUser, NewTestRun, ProjectDetails, RunStatus, SpecRun, SuiteRun, Tag, TestRun,
    UserPreferences,
};
use crate::pagination::{Connection as Page, OrderKey, PageRequest};
use crate::status::derive_from_statuses;
use crate::summary::{StatusCounts, count_statuses};
use crate::{Error, Result};

/// Storage manager backed by one SQLite database.
pub struct Storage {
    conn: Connection,
    location: String,
}

impl Storage {
    /// Open an existing database.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotInitialized(path.display().to_string()));
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, path.display().to_string())
    }

    /// Create the database (and its parent directory) if needed, then open it.
    pub fn init(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, path.display().to_string())
    }

    /// Check if a database exists at `path`.
    pub fn exists(path: &Path) -> bool {
        path.is_file()
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, ":memory:".to_string())
    }

    fn from_connection(conn: Connection, location: String) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init_schema(&conn)?;
        Ok(Self { conn, location })
    }

    /// Initialize the SQLite schema.
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS test_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER REFERENCES projects(id) ON DELETE SET NULL,
                test_seed INTEGER NOT NULL DEFAULT 0,
                git_branch TEXT,
                git_sha TEXT,
                start_time TEXT NOT NULL,
                end_time TEXT,
                status TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_test_runs_project ON test_runs(project_id);
            CREATE INDEX IF NOT EXISTS idx_test_runs_start_time ON test_runs(start_time);
            CREATE INDEX IF NOT EXISTS idx_test_runs_status ON test_runs(status);

            CREATE TABLE IF NOT EXISTS suite_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                test_run_id INTEGER NOT NULL REFERENCES test_runs(id) ON DELETE CASCADE,
                suite_name TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_suite_runs_test_run ON suite_runs(test_run_id);

            CREATE TABLE IF NOT EXISTS spec_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                suite_id INTEGER NOT NULL REFERENCES suite_runs(id) ON DELETE CASCADE,
                spec_description TEXT NOT NULL,
                status TEXT NOT NULL,
                message TEXT,
                start_time TEXT NOT NULL,
                end_time TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_spec_runs_suite ON spec_runs(suite_id);

            -- Tags are shared between spec runs; one row per name
            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                value TEXT
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_tags_name ON tags(name);

            CREATE TABLE IF NOT EXISTS spec_run_tags (
                spec_run_id INTEGER NOT NULL REFERENCES spec_runs(id) ON DELETE CASCADE,
                tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                position INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (spec_run_id, tag_id)
            );

            CREATE INDEX IF NOT EXISTS idx_spec_run_tags_tag ON spec_run_tags(tag_id);

            -- Users and their preferred projects
            CREATE TABLE IF NOT EXISTS app_users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cookie TEXT NOT NULL UNIQUE,
                is_dark INTEGER NOT NULL DEFAULT 0,
                timezone TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS project_groups (
                group_id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES app_users(id) ON DELETE CASCADE,
                group_name TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_project_groups_user ON project_groups(user_id);

            CREATE TABLE IF NOT EXISTS preferred_projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES app_users(id) ON DELETE CASCADE,
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                group_id INTEGER REFERENCES project_groups(group_id) ON DELETE CASCADE,
                created_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_preferred_projects_unique
                ON preferred_projects(user_id, project_id, COALESCE(group_id, 0));
            CREATE INDEX IF NOT EXISTS idx_preferred_projects_group ON preferred_projects(group_id);
            "#,
        )?;

        Self::run_migrations(conn)?;

        Ok(())
    }

    /// Run database migrations for schema changes.
    fn run_migrations(conn: &Connection) -> Result<()> {
        // Migration: build_url was added after the first schema.
        // SQLite has no ADD COLUMN IF NOT EXISTS, so check the schema first.
        let has_build_url: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM pragma_table_info('test_runs') WHERE name = 'build_url'",
                [],
                |row| row.get(0),
            )
            .unwrap_or(false);

        if !has_build_url {
            conn.execute("ALTER TABLE test_runs ADD COLUMN build_url TEXT", [])?;
        }

        Ok(())
    }

    /// Where this database lives, for display.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Handle that aborts whatever statement is running on this connection.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.conn.get_interrupt_handle()
    }

    /// Run `f` in one immediate transaction, committing on success.
    ///
    /// Domain errors (not found, invalid input, conflict, cancelled) come back
    /// as they are; anything else is wrapped in [`Error::Transaction`].
    pub(crate) fn run_in_transaction<T, F>(
        &mut self,
        operation: &'static str,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        cancel.checkpoint()?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| transaction_error(operation, e.into()))?;

        match f(&tx) {
            Ok(value) => {
                tx.commit()
                    .map_err(|e| transaction_error(operation, e.into()))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    tracing::warn!(operation, error = %rollback_err, "rollback failed");
                }
                tracing::debug!(operation, error = %err, "transaction rolled back");
                Err(transaction_error(operation, err))
            }
        }
    }

    // === Project Operations ===

    /// Create a project with a fresh UUID. Names are unique.
    pub fn create_project(&mut self, name: &str) -> Result<ProjectDetails> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("project name must not be empty".to_string()));
        }

        let taken: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM projects WHERE name = ?1",
            [name],
            |row| row.get(0),
        )?;
        if taken {
            return Err(Error::Conflict(format!("project '{}'", name)));
        }

        let mut project = ProjectDetails {
            id: 0,
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.conn.execute(
            "INSERT INTO projects (uuid, name, created_at) VALUES (?1, ?2, ?3)",
            params![project.uuid.to_string(), project.name, fmt_time(&project.created_at)],
        )?;
        project.id = self.conn.last_insert_rowid();

        Ok(project)
    }

    /// Get a project by UUID.
    pub fn get_project(&self, uuid: &Uuid) -> Result<ProjectDetails> {
        find_project(&self.conn, uuid)?
            .ok_or_else(|| Error::NotFound(format!("Project not found: {}", uuid)))
    }

    /// List all projects by name.
    pub fn list_projects(&self) -> Result<Vec<ProjectDetails>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM projects p ORDER BY p.name, p.id",
            PROJECT_COLUMNS
        ))?;
        let projects = stmt
            .query_map([], |row| project_from_row(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(projects)
    }

    /// Delete a project. Its preferred-project rows go with it; its test runs
    /// are kept without a project.
    pub fn delete_project(&mut self, uuid: &Uuid) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM projects WHERE uuid = ?1", [uuid.to_string()])?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("Project not found: {}", uuid)));
        }
        Ok(())
    }

    // === User Operations ===

    /// Create the user or update its display flags.
    pub fn upsert_user(&mut self, cookie: &str, prefs: &UserPreferences) -> Result<AppUser> {
        let cookie = cookie.trim();
        if cookie.is_empty() {
            return Err(Error::InvalidInput("user cookie must not be empty".to_string()));
        }

        let existing = find_user(&self.conn, cookie)?;
        let is_dark = prefs
            .is_dark
            .or(existing.as_ref().map(|u| u.is_dark))
            .unwrap_or(false);
        let timezone = prefs
            .timezone
            .clone()
            .or_else(|| existing.and_then(|u| u.timezone));
        let now = fmt_time(&Utc::now());

        self.conn.execute(
            r#"
            INSERT INTO app_users (cookie, is_dark, timezone, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(cookie) DO UPDATE SET
                is_dark = excluded.is_dark,
                timezone = excluded.timezone,
                updated_at = excluded.updated_at
            "#,
            params![cookie, is_dark, timezone, now],
        )?;

        self.get_user(cookie)
    }

    /// Get a user by cookie.
    pub fn get_user(&self, cookie: &str) -> Result<AppUser> {
        find_user(&self.conn, cookie)?
            .ok_or_else(|| Error::NotFound(format!("User not found: {}", cookie)))
    }

    // === Test Run Operations ===

    /// Store a new test run with its whole tree in one transaction.
    ///
    /// Tags are resolved to shared rows and the run's status is derived from
    /// its spec statuses before it is written.
    pub fn ingest_test_run(
        &mut self,
        input: &NewTestRun,
        cancel: &CancellationToken,
    ) -> Result<TestRun> {
        input.validate()?;
        let status = derive_from_statuses(input.spec_statuses());

        let run_id = self.run_in_transaction("ingest_test_run", cancel, |tx| {
            let project_id = match &input.project_uuid {
                Some(uuid) => Some(
                    find_project(tx, uuid)?
                        .ok_or_else(|| Error::NotFound(format!("Project not found: {}", uuid)))?
                        .id,
                ),
                None => None,
            };

            tx.execute(
                r#"
                INSERT INTO test_runs
                (project_id, test_seed, git_branch, git_sha, build_url, start_time, end_time, status)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    project_id,
                    input.test_seed,
                    input.git_branch,
                    input.git_sha,
                    input.build_url,
                    fmt_time(&input.start_time),
                    input.end_time.as_ref().map(fmt_time),
                    status.as_str(),
                ],
            )?;
            let run_id = tx.last_insert_rowid();

            let mut insert_suite = tx.prepare(
                "INSERT INTO suite_runs (test_run_id, suite_name, start_time, end_time)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut insert_spec = tx.prepare(
                "INSERT INTO spec_runs (suite_id, spec_description, status, message, start_time, end_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            let mut link_tag = tx.prepare(
                "INSERT OR IGNORE INTO spec_run_tags (spec_run_id, tag_id, position)
                 VALUES (?1, ?2, ?3)",
            )?;

            for suite in &input.suite_runs {
                cancel.checkpoint()?;
                insert_suite.execute(params![
                    run_id,
                    suite.suite_name,
                    fmt_time(&suite.start_time),
                    suite.end_time.as_ref().map(fmt_time),
                ])?;
                let suite_id = tx.last_insert_rowid();

                for spec in &suite.spec_runs {
                    insert_spec.execute(params![
                        suite_id,
                        spec.spec_description,
                        spec.status,
                        spec.message,
                        fmt_time(&spec.start_time),
                        spec.end_time.as_ref().map(fmt_time),
                    ])?;
                    let spec_id = tx.last_insert_rowid();

                    for (position, tag) in spec.tags.iter().enumerate() {
                        let tag = resolve_tag(tx, &tag.name, tag.value.as_deref())?;
                        link_tag.execute(params![spec_id, tag.id, position as i64])?;
                    }
                }
            }

            Ok(run_id)
        })?;

        tracing::info!(
            test_run_id = run_id,
            status = %status,
            "ingested test run"
        );
        self.load_full(run_id)
    }

    /// Load a test run with its suites, specs and tags.
    pub fn load_full(&self, test_run_id: i64) -> Result<TestRun> {
        load_full(&self.conn, test_run_id)
    }

    /// Delete a test run; suites, specs and tag links cascade.
    pub fn delete_test_run(&mut self, test_run_id: i64) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM test_runs WHERE id = ?1", [test_run_id])?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("Test run not found: {}", test_run_id)));
        }
        Ok(())
    }

    /// Number of test runs, optionally for one project.
    pub fn count_test_runs(&self, project: Option<&Uuid>) -> Result<usize> {
        let project_id = self.project_filter(project)?;
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM test_runs WHERE (?1 IS NULL OR project_id = ?1)",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// One page of test runs, ordered by `request.order_by` with the run id
    /// as tie-break.
    pub fn list_test_runs(
        &self,
        request: &PageRequest,
        project: Option<&Uuid>,
        cancel: &CancellationToken,
    ) -> Result<Page<TestRun>> {
        cancel.checkpoint()?;
        let project_id = self.project_filter(project)?;
        let total = self.count_test_runs(project)?;
        let offset = request.offset();
        let limit = request.limit();

        let direction = if request.desc { "DESC" } else { "ASC" };
        let sql = format!(
            "{} WHERE (?1 IS NULL OR tr.project_id = ?1)
             ORDER BY tr.{} {dir}, tr.id {dir}
             LIMIT ?2 OFFSET ?3",
            TEST_RUN_SELECT,
            order_column(request.order_by),
            dir = direction,
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let heads = stmt
            .query_map(params![project_id, to_sql_int(limit), to_sql_int(offset)], |row| {
                test_run_from_row(row)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut runs = Vec::with_capacity(heads.len());
        for mut run in heads {
            cancel.checkpoint()?;
            load_tree(&self.conn, &mut run)?;
            runs.push(run);
        }

        Ok(Page::from_page(runs, offset, limit, total))
    }

    /// Spec counts by outcome for one test run.
    pub fn status_counts(&self, test_run_id: i64) -> Result<StatusCounts> {
        Ok(count_statuses(&self.load_full(test_run_id)?))
    }

    /// Number of test runs whose stored status is missing or empty.
    pub fn count_missing_status(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM test_runs WHERE status IS NULL OR status = ''",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Test run ids in id order, for batch processing.
    pub fn test_run_ids(&self, offset: usize, limit: usize) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM test_runs ORDER BY id LIMIT ?1 OFFSET ?2")?;
        let ids = stmt
            .query_map(params![to_sql_int(limit), to_sql_int(offset)], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Overwrite the stored status of one test run.
    pub fn set_status(&self, test_run_id: i64, status: RunStatus) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE test_runs SET status = ?1 WHERE id = ?2",
            params![status.as_str(), test_run_id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Test run not found: {}", test_run_id)));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn clear_status_for_tests(&self, test_run_id: i64) {
        self.conn
            .execute("UPDATE test_runs SET status = NULL WHERE id = ?1", [test_run_id])
            .unwrap();
    }

    fn project_filter(&self, project: Option<&Uuid>) -> Result<Option<i64>> {
        match project {
            Some(uuid) => Ok(Some(self.get_project(uuid)?.id)),
            None => Ok(None),
        }
    }
}

fn transaction_error(operation: &'static str, err: Error) -> Error {
    match err {
        Error::NotFound(_) | Error::InvalidInput(_) | Error::Conflict(_) | Error::Cancelled(_) => {
            err
        }
        other => Error::Transaction {
            operation,
            source: Box::new(other),
        },
    }
}

fn order_column(key: OrderKey) -> &'static str {
    match key {
        OrderKey::Id => "id",
        OrderKey::StartTime => "start_time",
        OrderKey::EndTime => "end_time",
    }
}

fn to_sql_int(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

// === Row mapping ===

/// Timestamps are stored as fixed-width RFC 3339 so text order is time order.
pub(crate) fn fmt_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_opt_time(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|r| parse_time(idx, r)).transpose()
}

fn parse_uuid(idx: usize, raw: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

const PROJECT_COLUMNS: &str = "p.id, p.uuid, p.name, p.created_at";

pub(crate) fn project_from_row(row: &Row<'_>, start: usize) -> rusqlite::Result<ProjectDetails> {
    Ok(ProjectDetails {
        id: row.get(start)?,
        uuid: parse_uuid(start + 1, row.get(start + 1)?)?,
        name: row.get(start + 2)?,
        created_at: parse_time(start + 3, row.get(start + 3)?)?,
    })
}

pub(crate) fn find_project(conn: &Connection, uuid: &Uuid) -> Result<Option<ProjectDetails>> {
    let project = conn
        .query_row(
            &format!("SELECT {} FROM projects p WHERE p.uuid = ?1", PROJECT_COLUMNS),
            [uuid.to_string()],
            |row| project_from_row(row, 0),
        )
        .optional()?;
    Ok(project)
}

pub(crate) fn find_user(conn: &Connection, cookie: &str) -> Result<Option<AppUser>> {
    let user = conn
        .query_row(
            "SELECT id, cookie, is_dark, timezone FROM app_users WHERE cookie = ?1",
            [cookie],
            |row| {
                Ok(AppUser {
                    id: row.get(0)?,
                    cookie: row.get(1)?,
                    is_dark: row.get(2)?,
                    timezone: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(user)
}

const TEST_RUN_SELECT: &str = "SELECT tr.id, tr.test_seed, tr.git_branch, tr.git_sha, tr.build_url, \
     tr.start_time, tr.end_time, tr.status, p.id, p.uuid, p.name, p.created_at \
     FROM test_runs tr LEFT JOIN projects p ON p.id = tr.project_id";

fn test_run_from_row(row: &Row<'_>) -> rusqlite::Result<TestRun> {
    let project = match row.get::<_, Option<i64>>(8)? {
        Some(_) => Some(project_from_row(row, 8)?),
        None => None,
    };
    let status: Option<String> = row.get(7)?;

    Ok(TestRun {
        id: row.get(0)?,
        project,
        test_seed: row.get(1)?,
        git_branch: row.get(2)?,
        git_sha: row.get(3)?,
        build_url: row.get(4)?,
        start_time: parse_time(5, row.get(5)?)?,
        end_time: parse_opt_time(6, row.get(6)?)?,
        status: status.as_deref().and_then(RunStatus::parse),
        suite_runs: Vec::new(),
    })
}

pub(crate) fn load_full(conn: &Connection, test_run_id: i64) -> Result<TestRun> {
    let mut run = conn
        .query_row(
            &format!("{} WHERE tr.id = ?1", TEST_RUN_SELECT),
            [test_run_id],
            test_run_from_row,
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("Test run not found: {}", test_run_id)))?;
    load_tree(conn, &mut run)?;
    Ok(run)
}

/// Fill in the suites, specs and tags of a test run head.
fn load_tree(conn: &Connection, run: &mut TestRun) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT id, test_run_id, suite_name, start_time, end_time
         FROM suite_runs WHERE test_run_id = ?1 ORDER BY id",
    )?;
    let suites = stmt
        .query_map([run.id], |row| {
            Ok(SuiteRun {
                id: row.get(0)?,
                test_run_id: row.get(1)?,
                suite_name: row.get(2)?,
                start_time: parse_time(3, row.get(3)?)?,
                end_time: parse_opt_time(4, row.get(4)?)?,
                spec_runs: Vec::new(),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT sp.id, sp.suite_id, sp.spec_description, sp.status, sp.message,
                sp.start_time, sp.end_time
         FROM spec_runs sp
         JOIN suite_runs su ON su.id = sp.suite_id
         WHERE su.test_run_id = ?1
         ORDER BY sp.id",
    )?;
    let specs = stmt
        .query_map([run.id], |row| {
            Ok(SpecRun {
                id: row.get(0)?,
                suite_id: row.get(1)?,
                spec_description: row.get(2)?,
                status: row.get(3)?,
                message: row.get(4)?,
                tags: Vec::new(),
                start_time: parse_time(5, row.get(5)?)?,
                end_time: parse_opt_time(6, row.get(6)?)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT st.spec_run_id, t.id, t.name, t.value
         FROM spec_run_tags st
         JOIN tags t ON t.id = st.tag_id
         JOIN spec_runs sp ON sp.id = st.spec_run_id
         JOIN suite_runs su ON su.id = sp.suite_id
         WHERE su.test_run_id = ?1
         ORDER BY st.spec_run_id, st.position",
    )?;
    let mut tags_by_spec: HashMap<i64, Vec<Tag>> = HashMap::new();
    let rows = stmt.query_map([run.id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            Tag {
                id: row.get(1)?,
                name: row.get(2)?,
                value: row.get(3)?,
            },
        ))
    })?;
    for row in rows {
        let (spec_id, tag) = row?;
        tags_by_spec.entry(spec_id).or_default().push(tag);
    }

    let mut specs_by_suite: HashMap<i64, Vec<SpecRun>> = HashMap::new();
    for mut spec in specs {
        spec.tags = tags_by_spec.remove(&spec.id).unwrap_or_default();
        specs_by_suite.entry(spec.suite_id).or_default().push(spec);
    }

    run.suite_runs = suites
        .into_iter()
        .map(|mut suite| {
            suite.spec_runs = specs_by_suite.remove(&suite.id).unwrap_or_default();
            suite
        })
        .collect();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::Cursor;
    use crate::test_utils::{at, new_run};
    use tempfile::TempDir;

    fn create_test_storage() -> Storage {
        Storage::open_in_memory().unwrap()
    }

    fn ingest(storage: &mut Storage, project: Option<Uuid>, statuses: &[&str]) -> TestRun {
        let specs: Vec<(&str, &[(&str, &str)])> = statuses.iter().map(|s| (*s, &[][..])).collect();
        storage
            .ingest_test_run(&new_run(project, &specs), &CancellationToken::new())
            .unwrap()
    }

    #[test]
    fn test_storage_init_and_open() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("testhub.db");
        assert!(!Storage::exists(&path));
        assert!(matches!(Storage::open(&path), Err(Error::NotInitialized(_))));

        let mut storage = Storage::init(&path).unwrap();
        storage.create_project("web").unwrap();
        drop(storage);

        assert!(Storage::exists(&path));
        let storage = Storage::open(&path).unwrap();
        assert_eq!(storage.list_projects().unwrap().len(), 1);
    }

    #[test]
    fn test_migration_adds_build_url_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE test_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER,
                test_seed INTEGER NOT NULL DEFAULT 0,
                git_branch TEXT,
                git_sha TEXT,
                start_time TEXT NOT NULL,
                end_time TEXT,
                status TEXT
            );",
        )
        .unwrap();

        let mut storage = Storage::from_connection(conn, ":memory:".to_string()).unwrap();
        let mut input = new_run(None, &[]);
        input.build_url = Some("https://ci.example/1".to_string());
        let run = storage
            .ingest_test_run(&input, &CancellationToken::new())
            .unwrap();
        assert_eq!(run.build_url.as_deref(), Some("https://ci.example/1"));
    }

    #[test]
    fn test_create_project_conflict() {
        let mut storage = create_test_storage();
        let project = storage.create_project("  api  ").unwrap();
        assert_eq!(project.name, "api");
        assert!(matches!(storage.create_project("api"), Err(Error::Conflict(_))));
        assert!(matches!(storage.create_project(" "), Err(Error::InvalidInput(_))));
        assert_eq!(storage.get_project(&project.uuid).unwrap(), project);
    }

    #[test]
    fn test_delete_project_not_found() {
        let mut storage = create_test_storage();
        assert!(matches!(
            storage.delete_project(&Uuid::new_v4()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_ingest_and_load_full() {
        let mut storage = create_test_storage();
        let project = storage.create_project("web").unwrap();
        let input = new_run(
            Some(project.uuid),
            &[
                ("passed", &[("owner", "amy"), ("component", "ui")]),
                ("failed", &[("owner", "amy")]),
            ],
        );
        let run = storage
            .ingest_test_run(&input, &CancellationToken::new())
            .unwrap();

        assert_eq!(run.project.as_ref().map(|p| p.uuid), Some(project.uuid));
        assert_eq!(run.status, Some(RunStatus::Failed));
        assert_eq!(run.test_seed, 42);
        assert_eq!(run.start_time, at(0));
        assert_eq!(run.end_time, Some(at(10)));
        assert_eq!(run.suite_runs.len(), 1);
        let specs = &run.suite_runs[0].spec_runs;
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].tag_value("owner"), Some("amy"));
        assert_eq!(specs[0].tag_value("component"), Some("ui"));
        assert_eq!(specs[0].tags[0].name, "owner");
        // Same name resolves to the same tag row
        assert_eq!(specs[0].tags[0].id, specs[1].tags[0].id);

        assert_eq!(storage.load_full(run.id).unwrap(), run);
    }

    #[test]
    fn test_ingest_unknown_project_rolls_back() {
        let mut storage = create_test_storage();
        let input = new_run(Some(Uuid::new_v4()), &[("passed", &[("owner", "amy")])]);
        let err = storage
            .ingest_test_run(&input, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(storage.count_test_runs(None).unwrap(), 0);
        assert!(storage.list_tags().unwrap().is_empty());
    }

    #[test]
    fn test_ingest_cancelled_writes_nothing() {
        let mut storage = create_test_storage();
        let token = CancellationToken::new();
        token.cancel();
        let err = storage
            .ingest_test_run(&new_run(None, &[("passed", &[])]), &token)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
        assert_eq!(storage.count_test_runs(None).unwrap(), 0);
    }

    #[test]
    fn test_load_full_not_found() {
        let storage = create_test_storage();
        assert!(matches!(storage.load_full(99), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_delete_test_run_cascades() {
        let mut storage = create_test_storage();
        let input = new_run(None, &[("passed", &[("owner", "amy")])]);
        let run = storage
            .ingest_test_run(&input, &CancellationToken::new())
            .unwrap();

        storage.delete_test_run(run.id).unwrap();

        let count = |table: &str| -> i64 {
            storage
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
                .unwrap()
        };
        assert_eq!(count("suite_runs"), 0);
        assert_eq!(count("spec_runs"), 0);
        assert_eq!(count("spec_run_tags"), 0);
        // Tags are shared and outlive the run
        assert_eq!(count("tags"), 1);
        assert!(matches!(storage.delete_test_run(run.id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_delete_project_keeps_runs() {
        let mut storage = create_test_storage();
        let project = storage.create_project("web").unwrap();
        let run = ingest(&mut storage, Some(project.uuid), &["passed"]);
        storage.delete_project(&project.uuid).unwrap();
        assert!(storage.load_full(run.id).unwrap().project.is_none());
    }

    #[test]
    fn test_list_test_runs_last_partial_page() {
        let mut storage = create_test_storage();
        for _ in 0..5 {
            ingest(&mut storage, None, &["passed"]);
        }
        let request = PageRequest::new(2).after(Cursor::encode(4));
        let page = storage
            .list_test_runs(&request, None, &CancellationToken::new())
            .unwrap();
        assert_eq!(page.total_count, 5);
        assert_eq!(page.edges.len(), 1);
        assert!(!page.page_info.has_next_page);
        assert!(page.page_info.has_previous_page);
    }

    #[test]
    fn test_list_test_runs_walks_all_pages() {
        let mut storage = create_test_storage();
        let mut expected = Vec::new();
        for _ in 0..5 {
            expected.push(ingest(&mut storage, None, &["passed"]).id);
        }

        let token = CancellationToken::new();
        let mut seen = Vec::new();
        let mut request = PageRequest::new(2);
        loop {
            let page = storage.list_test_runs(&request, None, &token).unwrap();
            seen.extend(page.nodes().map(|r| r.id));
            if !page.page_info.has_next_page {
                break;
            }
            request = request.after(page.page_info.end_cursor.clone().unwrap());
        }
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_list_test_runs_descending_with_tie_break() {
        let mut storage = create_test_storage();
        // Same start time everywhere, so ordering falls back to id
        let ids: Vec<i64> = (0..3).map(|_| ingest(&mut storage, None, &["passed"]).id).collect();
        let request = PageRequest::new(10).order_by(OrderKey::StartTime, true);
        let token = CancellationToken::new();
        let first: Vec<i64> = storage
            .list_test_runs(&request, None, &token)
            .unwrap()
            .nodes()
            .map(|r| r.id)
            .collect();
        let again: Vec<i64> = storage
            .list_test_runs(&request, None, &token)
            .unwrap()
            .nodes()
            .map(|r| r.id)
            .collect();
        assert_eq!(first, ids.iter().rev().copied().collect::<Vec<_>>());
        assert_eq!(first, again);
    }

    #[test]
    fn test_list_test_runs_project_filter() {
        let mut storage = create_test_storage();
        let web = storage.create_project("web").unwrap();
        let api = storage.create_project("api").unwrap();
        ingest(&mut storage, Some(web.uuid), &["passed"]);
        ingest(&mut storage, Some(api.uuid), &["failed"]);
        ingest(&mut storage, Some(web.uuid), &["skipped"]);

        let page = storage
            .list_test_runs(&PageRequest::default(), Some(&web.uuid), &CancellationToken::new())
            .unwrap();
        assert_eq!(page.total_count, 2);
        assert!(page.nodes().all(|r| r.project.as_ref().unwrap().uuid == web.uuid));

        let missing = storage.list_test_runs(
            &PageRequest::default(),
            Some(&Uuid::new_v4()),
            &CancellationToken::new(),
        );
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_empty_page_past_the_end() {
        let mut storage = create_test_storage();
        ingest(&mut storage, None, &["passed"]);
        let request = PageRequest::new(3).after(Cursor::encode(10));
        let page = storage
            .list_test_runs(&request, None, &CancellationToken::new())
            .unwrap();
        assert!(page.edges.is_empty());
        assert!(page.page_info.start_cursor.is_none());
        assert!(page.page_info.has_previous_page);
    }

    #[test]
    fn test_status_counts() {
        let mut storage = create_test_storage();
        let run = ingest(&mut storage, None, &["passed", "failed", "skipped", "pending"]);
        let counts = storage.status_counts(run.id).unwrap();
        assert_eq!(counts.total, 4);
        assert_eq!(counts.passed, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.skipped, 1);
        assert_eq!(counts.pending, 1);
    }

    #[test]
    fn test_missing_status_and_set_status() {
        let mut storage = create_test_storage();
        let run = ingest(&mut storage, None, &["failed"]);
        assert_eq!(storage.count_missing_status().unwrap(), 0);

        storage
            .conn
            .execute("UPDATE test_runs SET status = NULL WHERE id = ?1", [run.id])
            .unwrap();
        assert_eq!(storage.count_missing_status().unwrap(), 1);
        assert_eq!(storage.load_full(run.id).unwrap().status, None);

        storage.set_status(run.id, RunStatus::Failed).unwrap();
        assert_eq!(storage.count_missing_status().unwrap(), 0);
        assert!(matches!(
            storage.set_status(999, RunStatus::Passed),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_upsert_user_merges_flags() {
        let mut storage = create_test_storage();
        let user = storage
            .upsert_user("cookie-1", &UserPreferences::default())
            .unwrap();
        assert!(!user.is_dark);
        assert_eq!(user.timezone, None);

        let user = storage
            .upsert_user(
                "cookie-1",
                &UserPreferences {
                    is_dark: Some(true),
                    timezone: Some("Europe/Berlin".to_string()),
                },
            )
            .unwrap();
        assert!(user.is_dark);

        let user = storage
            .upsert_user(
                "cookie-1",
                &UserPreferences {
                    is_dark: None,
                    timezone: Some("UTC".to_string()),
                },
            )
            .unwrap();
        assert!(user.is_dark);
        assert_eq!(user.timezone.as_deref(), Some("UTC"));
        assert!(matches!(storage.get_user("nobody"), Err(Error::NotFound(_))));
    }
}
