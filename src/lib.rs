//! testhub - test run reporting for hierarchical test results.
//!
//! This library ingests test runs (test run → suite run → spec run → tags) and
//! derives the reporting views built on top of them:
//! - overall run status ([`status`])
//! - cursor pagination over runs ([`pagination`])
//! - dynamic tag group-by summaries ([`summary`])
//! - tag dedup and per-user preferred project groups ([`storage`])
//! - one-shot status backfill ([`backfill`])

pub mod backfill;
pub mod cancel;
pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
pub mod models;
pub mod pagination;
pub mod status;
pub mod storage;
pub mod summary;

/// Test utilities shared by unit tests.
#[cfg(test)]
pub(crate) mod test_utils {
    use chrono::{DateTime, TimeZone, Utc};

    use crate::models::{NewSpecRun, NewSuiteRun, NewTag, NewTestRun, SpecRun, SuiteRun, Tag, TestRun};

    /// Fixed timestamp so fixtures are reproducible.
    pub fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
    }

    /// Build a spec run with the given status and `(name, value)` tags.
    pub fn spec(id: i64, status: &str, tags: &[(&str, &str)]) -> SpecRun {
        SpecRun {
            id,
            suite_id: 1,
            spec_description: format!("spec {}", id),
            status: status.to_string(),
            message: None,
            tags: tags
                .iter()
                .enumerate()
                .map(|(i, (name, value))| Tag {
                    id: i as i64 + 1,
                    name: name.to_string(),
                    value: Some(value.to_string()),
                })
                .collect(),
            start_time: at(0),
            end_time: Some(at(1)),
        }
    }

    /// Build a materialized test run with one suite per entry of `suites`.
    pub fn run_with(suites: Vec<Vec<SpecRun>>) -> TestRun {
        TestRun {
            id: 7,
            project: None,
            test_seed: 1234,
            git_branch: Some("main".to_string()),
            git_sha: Some("abc1234".to_string()),
            build_url: None,
            start_time: at(0),
            end_time: Some(at(5)),
            status: None,
            suite_runs: suites
                .into_iter()
                .enumerate()
                .map(|(i, spec_runs)| SuiteRun {
                    id: i as i64 + 1,
                    test_run_id: 7,
                    suite_name: format!("suite {}", i + 1),
                    start_time: at(0),
                    end_time: Some(at(5)),
                    spec_runs,
                })
                .collect(),
        }
    }

    /// Build an ingest payload with a single suite holding the given specs.
    pub fn new_run(project: Option<uuid::Uuid>, specs: &[(&str, &[(&str, &str)])]) -> NewTestRun {
        NewTestRun {
            project_uuid: project,
            test_seed: 42,
            git_branch: Some("main".to_string()),
            git_sha: Some("deadbeef".to_string()),
            build_url: None,
            start_time: at(0),
            end_time: Some(at(10)),
            suite_runs: vec![NewSuiteRun {
                suite_name: "Suite".to_string(),
                start_time: at(0),
                end_time: Some(at(10)),
                spec_runs: specs
                    .iter()
                    .enumerate()
                    .map(|(i, (status, tags))| NewSpecRun {
                        spec_description: format!("case {}", i),
                        status: status.to_string(),
                        message: None,
                        tags: tags
                            .iter()
                            .map(|(name, value)| NewTag {
                                name: name.to_string(),
                                value: Some(value.to_string()),
                            })
                            .collect(),
                        start_time: at(1),
                        end_time: Some(at(2)),
                    })
                    .collect(),
            }],
        }
    }
}

/// Library-level error type for testhub operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Database not initialized at {0}: run `testhub init` first")]
    NotInitialized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Transaction `{operation}` rolled back: {source}")]
    Transaction {
        operation: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref ffi, _)
                if ffi.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                Error::Cancelled("database operation interrupted".to_string())
            }
            other => Error::Database(other),
        }
    }
}

/// Caller-facing classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    Transaction,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Transaction => "transaction",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }

    /// HTTP-equivalent status for front ends that speak HTTP.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Validation => 400,
            ErrorKind::Conflict => 409,
            ErrorKind::Cancelled => 499,
            ErrorKind::Transaction | ErrorKind::Internal => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) | Error::NotInitialized(_) => ErrorKind::NotFound,
            Error::InvalidInput(_) | Error::Config(_) | Error::Json(_) => ErrorKind::Validation,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Transaction { .. } => ErrorKind::Transaction,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::Io(_) | Error::Database(_) => ErrorKind::Internal,
        }
    }

    /// Structured error payload shown to callers.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind().as_str(),
        })
    }
}

/// Result type alias for testhub operations.
pub type Result<T> = std::result::Result<T, Error>;
