use serde::Serialize;

use crate::diagnostics::FileDiagnostics;

/// One decoded monitor notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Indexing finished (`index == total`)
    ProgressUpdate { index: u64, total: u64 },
    /// Complete issue set for one file; may be empty
    DiagnosticBatch(FileDiagnostics),
    /// The indexer daemon could not be reached; no events follow
    ConnectionError { message: String },
}

impl StreamEvent {
    pub fn is_indexing_complete(&self) -> bool {
        matches!(self, StreamEvent::ProgressUpdate { index, total } if index == total)
    }
}
