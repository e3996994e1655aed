//! One-shot backfill of stored test run statuses.
//!
//! Runs are walked in fixed-size offset batches; each run is loaded on its
//! own, its status re-derived from its specs and written with an independent
//! update. A run that fails to load or update is logged and counted, never
//! fatal, so the job can simply be run again.

use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::models::{RunStatus, TestRun};
use crate::status::derive_status;
use crate::storage::Storage;
use crate::{Error, Result};

/// Records processed per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// The store operations the backfill needs.
pub trait StatusStore {
    /// Number of runs with a missing or empty status.
    fn count_missing_status(&self) -> Result<usize>;

    /// Up to `limit` run ids starting at `offset`, in a stable order.
    fn batch_ids(&self, offset: usize, limit: usize) -> Result<Vec<i64>>;

    /// One fully materialized run.
    fn load_run(&self, test_run_id: i64) -> Result<TestRun>;

    fn update_status(&mut self, test_run_id: i64, status: RunStatus) -> Result<()>;
}

impl StatusStore for Storage {
    fn count_missing_status(&self) -> Result<usize> {
        Storage::count_missing_status(self)
    }

    fn batch_ids(&self, offset: usize, limit: usize) -> Result<Vec<i64>> {
        self.test_run_ids(offset, limit)
    }

    fn load_run(&self, test_run_id: i64) -> Result<TestRun> {
        self.load_full(test_run_id)
    }

    fn update_status(&mut self, test_run_id: i64, status: RunStatus) -> Result<()> {
        self.set_status(test_run_id, status)
    }
}

/// Summary of one backfill invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillReport {
    /// Runs that were missing a status when the job started
    pub missing: usize,
    pub processed: usize,
    pub updated: usize,
    pub batches: usize,

    /// Ids whose update failed; they keep their old status
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<i64>,
}

impl BackfillReport {
    pub fn is_noop(&self) -> bool {
        self.missing == 0
    }
}

/// Backfill job configuration.
#[derive(Debug, Clone)]
pub struct Backfill {
    batch_size: usize,
}

impl Default for Backfill {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl Backfill {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Recompute and store the status of every run.
    ///
    /// Returns immediately when no run is missing a status. Cancellation is
    /// checked between batches and between records; updates already written
    /// stay written.
    pub fn run<S: StatusStore>(
        &self,
        store: &mut S,
        cancel: &CancellationToken,
    ) -> Result<BackfillReport> {
        cancel.checkpoint()?;
        let mut report = BackfillReport {
            missing: store.count_missing_status()?,
            ..BackfillReport::default()
        };
        if report.is_noop() {
            tracing::info!("no test runs missing a status, nothing to backfill");
            return Ok(report);
        }

        tracing::info!(
            missing = report.missing,
            batch_size = self.batch_size,
            "starting status backfill"
        );

        let mut offset = 0;
        loop {
            cancel.checkpoint()?;
            let batch = store.batch_ids(offset, self.batch_size)?;
            if batch.is_empty() {
                break;
            }
            let fetched = batch.len();

            for id in batch {
                cancel.checkpoint()?;
                report.processed += 1;
                let result = store
                    .load_run(id)
                    .and_then(|run| store.update_status(id, derive_status(&run)));
                match result {
                    Ok(()) => report.updated += 1,
                    Err(err @ Error::Cancelled(_)) => return Err(err),
                    Err(err) => {
                        tracing::warn!(
                            test_run_id = id,
                            error = %err,
                            "failed to backfill test run status"
                        );
                        report.failed.push(id);
                    }
                }
            }

            report.batches += 1;
            offset += fetched;
            tracing::info!(
                batch = report.batches,
                processed = report.processed,
                "backfill batch done"
            );

            if fetched < self.batch_size {
                break;
            }
        }

        tracing::info!(
            processed = report.processed,
            updated = report.updated,
            failed = report.failed.len(),
            "status backfill finished"
        );
        Ok(report)
    }
}

/// Backfill with the default batch size.
pub fn backfill_statuses<S: StatusStore>(
    store: &mut S,
    cancel: &CancellationToken,
) -> Result<BackfillReport> {
    Backfill::default().run(store, cancel)
}
