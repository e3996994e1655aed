//! Common test utilities for testhub integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't touch the
//! user's real database or config file.

#![allow(dead_code)]

use assert_cmd::Command;
use serde_json::Value;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

/// A test environment with its own database and config file.
///
/// The `testhub()` method returns a `Command` with `TESTHUB_DB` and
/// `TESTHUB_CONFIG` pointing into a private temporary directory, so tests
/// are parallel-safe.
pub struct TestEnv {
    pub data_dir: TempDir,
}

impl TestEnv {
    /// Create a new test environment without a database.
    pub fn new() -> Self {
        Self {
            data_dir: TempDir::new().unwrap(),
        }
    }

    /// Create a new test environment and initialize the database.
    pub fn init() -> Self {
        let env = Self::new();
        env.testhub().arg("init").assert().success();
        env
    }

    /// Get a Command for the testhub binary bound to this environment.
    pub fn testhub(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_testhub"));
        cmd.current_dir(self.data_dir.path());
        cmd.env("TESTHUB_DB", self.db_path());
        cmd.env("TESTHUB_CONFIG", self.config_path());
        cmd.env_remove("TESTHUB_LOG_FORMAT");
        cmd.env_remove("RUST_LOG");
        cmd
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.path().join("testhub.db")
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.path().join("config.kdl")
    }

    pub fn write_config(&self, content: &str) {
        std::fs::write(self.config_path(), content).unwrap();
    }

    /// Write `content` to a file in the environment and return its path.
    pub fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.data_dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Run a command that must succeed and parse its stdout as JSON.
    pub fn json(&self, args: &[&str]) -> Value {
        let output = self.testhub().args(args).assert().success().get_output().clone();
        parse_json(&output.stdout)
    }

    /// Create a project and return its UUID.
    pub fn create_project(&self, name: &str) -> String {
        let project = self.json(&["project", "create", name]);
        project["uuid"].as_str().unwrap().to_string()
    }

    /// Ingest a run with one suite and the given `(status, tags)` specs.
    /// Returns the new run id.
    pub fn ingest(&self, project: Option<&str>, specs: &[(&str, &[(&str, &str)])]) -> i64 {
        let payload = run_payload(project, specs);
        let path = self.write_file(&format!("run-{}.json", unique_suffix()), &payload);
        let result = self.json(&["run", "ingest", path.to_str().unwrap()]);
        result["id"].as_i64().unwrap()
    }

    pub fn path(&self) -> &Path {
        self.data_dir.path()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

fn unique_suffix() -> String {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    COUNTER.fetch_add(1, Ordering::SeqCst).to_string()
}

/// Parse command stdout as a single JSON document.
pub fn parse_json(stdout: &[u8]) -> Value {
    serde_json::from_slice(stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({}): {}",
            e,
            String::from_utf8_lossy(stdout)
        )
    })
}

/// JSON ingest payload with one suite holding `specs`.
pub fn run_payload(project: Option<&str>, specs: &[(&str, &[(&str, &str)])]) -> String {
    let spec_runs: Vec<Value> = specs
        .iter()
        .enumerate()
        .map(|(i, (status, tags))| {
            let tags: Vec<Value> = tags
                .iter()
                .map(|(name, value)| serde_json::json!({ "name": name, "value": value }))
                .collect();
            serde_json::json!({
                "spec_description": format!("case {}", i),
                "status": status,
                "start_time": "2024-03-01T12:00:01Z",
                "end_time": "2024-03-01T12:00:02Z",
                "tags": tags,
            })
        })
        .collect();

    serde_json::json!({
        "project_uuid": project,
        "test_seed": 1234,
        "git_branch": "main",
        "git_sha": "deadbeef",
        "start_time": "2024-03-01T12:00:00Z",
        "end_time": "2024-03-01T12:10:00Z",
        "suite_runs": [{
            "suite_name": "Suite",
            "start_time": "2024-03-01T12:00:00Z",
            "spec_runs": spec_runs,
        }],
    })
    .to_string()
}
