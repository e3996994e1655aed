//! Caller-supplied cancellation for store operations.
//!
//! A [`CancellationToken`] is cheap to clone and shared between the caller
//! (signal handler, request timeout) and the operation, which polls it with
//! [`CancellationToken::checkpoint`] between store calls. A tripped token
//! surfaces as [`Error::Cancelled`]; inside a transaction that rolls it back.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<DateTime<Utc>>,
}

impl CancellationToken {
    /// A token that only trips when [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also trips once `deadline` has passed.
    pub fn with_deadline(deadline: DateTime<Utc>) -> Self {
        Self {
            cancelled: Arc::default(),
            deadline: Some(deadline),
        }
    }

    /// A token that trips `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        let timeout = chrono::Duration::from_std(timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let deadline = Utc::now()
            .checked_add_signed(timeout)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::with_deadline(deadline)
    }

    /// Trip the token for every clone.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.checkpoint().is_err()
    }

    /// Fail with [`Error::Cancelled`] if the token has tripped.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(Error::Cancelled("operation cancelled by caller".to_string()));
        }
        if let Some(deadline) = self.deadline {
            if Utc::now() >= deadline {
                return Err(Error::Cancelled("operation deadline exceeded".to_string()));
            }
        }
        Ok(())
    }
}
