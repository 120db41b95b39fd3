//! Request/response types and last-operation status for the emberdb client

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Outcome of the most recent client operation.
///
/// Overwritten by every one-shot verb and every drained stream event.
/// Exactly one of succeeded/failed holds after any operation, and `message`
/// is non-empty iff the operation failed.
#[derive(Debug, Clone)]
pub struct OperationStatus {
    /// Whether the operation completed successfully
    pub succeeded: bool,
    /// Human-readable failure message; empty on success
    pub message: String,
}

impl Default for OperationStatus {
    fn default() -> Self {
        // Before any operation runs, nothing has failed.
        Self {
            succeeded: true,
            message: String::new(),
        }
    }
}

/// Shared last-operation status cell.
///
/// The verb facade and any stream sessions it opens write the same cell;
/// last write wins.
#[derive(Debug, Clone, Default)]
pub(crate) struct StatusCell(Arc<Mutex<OperationStatus>>);

impl StatusCell {
    pub fn record_ok(&self) {
        *self.0.lock() = OperationStatus {
            succeeded: true,
            message: String::new(),
        };
    }

    pub fn record_err(&self, message: impl Into<String>) {
        let mut message = message.into();
        if message.is_empty() {
            message.push_str("unknown error");
        }
        *self.0.lock() = OperationStatus {
            succeeded: false,
            message,
        };
    }

    pub fn snapshot(&self) -> OperationStatus {
        self.0.lock().clone()
    }
}

/// Body of a successful push (create-in-list) response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    /// Generated child name under the target list
    #[serde(default)]
    pub name: String,
}
