//! Single-assignment request/response handles

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;

use crate::event::Payload;

/// Shared handle to a [`PendingResult`]
///
/// Held jointly by the requester (until [`PendingResult::wait`] returns)
/// and by the bus event carrying the request (until answered).
pub type PendingHandle = Arc<PendingResult>;

/// Error surfaced to a waiting requester
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The responder determined the operation failed
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// A single-assignment, single-reader synchronization cell
///
/// Exactly one responder is expected to call [`resolve`](Self::resolve) or
/// [`reject`](Self::reject), exactly once. [`wait`](Self::wait) has no
/// built-in timeout: a request nobody answers blocks its caller forever,
/// which is the issuer's responsibility, not the bus's.
pub struct PendingResult {
    cell: Mutex<Option<Result<Payload, String>>>,
    notify: Notify,
}

impl std::fmt::Debug for PendingResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResult")
            .field("answered", &self.is_answered())
            .finish_non_exhaustive()
    }
}

impl PendingResult {
    /// Create an unanswered handle
    pub fn new() -> PendingHandle {
        Arc::new(Self {
            cell: Mutex::new(None),
            notify: Notify::new(),
        })
    }

    /// Assign the success value; a second assignment is ignored
    pub fn resolve(&self, value: Payload) {
        let mut cell = self.cell.lock();
        if cell.is_none() {
            *cell = Some(Ok(value));
            self.notify.notify_one();
        }
    }

    /// Assign the error; a second assignment is ignored
    pub fn reject(&self, error: impl Into<String>) {
        let mut cell = self.cell.lock();
        if cell.is_none() {
            *cell = Some(Err(error.into()));
            self.notify.notify_one();
        }
    }

    /// True once either assignment happened
    pub fn is_answered(&self) -> bool {
        self.cell.lock().is_some()
    }

    /// Block the calling task until answered, then return the value or the
    /// responder's error
    pub async fn wait(&self) -> Result<Payload, RequestError> {
        loop {
            if let Some(answer) = self.cell.lock().clone() {
                return answer.map_err(RequestError::Rejected);
            }
            self.notify.notified().await;
        }
    }
}
