use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Malformed monitor element: {0}")]
    Protocol(String),

    #[error("Malformed indexer reply: {0}")]
    Reply(String),

    #[error("Indexer unreachable: {0}")]
    Connection(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job {job_id} failed: {error}")]
    Job { job_id: String, error: JobError },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Failure classification carried inside a [`JobResult`](crate::scheduler::JobResult).
///
/// Unlike [`BridgeError`] this is cheap to clone, so every completion
/// callback of a job can observe it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum JobError {
    Launch(String),
    Timeout(String),
    Protocol(String),
    Connection(String),
    Cancelled,
    Internal(String),
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::Launch(msg) => write!(f, "launch failed: {}", msg),
            JobError::Timeout(msg) => write!(f, "timed out: {}", msg),
            JobError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            JobError::Connection(msg) => write!(f, "connection error: {}", msg),
            JobError::Cancelled => write!(f, "cancelled"),
            JobError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl From<&BridgeError> for JobError {
    fn from(err: &BridgeError) -> Self {
        match err {
            BridgeError::Launch { .. } => JobError::Launch(err.to_string()),
            BridgeError::Timeout(_) => JobError::Timeout(err.to_string()),
            BridgeError::Protocol(msg) | BridgeError::Reply(msg) => JobError::Protocol(msg.clone()),
            BridgeError::Connection(msg) => JobError::Connection(msg.clone()),
            BridgeError::Cancelled => JobError::Cancelled,
            BridgeError::Io(e) => JobError::Internal(e.to_string()),
            BridgeError::Job { error, .. } => error.clone(),
            BridgeError::Internal(msg) => JobError::Internal(msg.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn timeout_maps_to_job_timeout() {
        let err = BridgeError::Timeout(Duration::from_millis(500));
        assert!(matches!(JobError::from(&err), JobError::Timeout(_)));
    }

    #[test]
    fn launch_error_keeps_program_name() {
        let err = BridgeError::Launch {
            program: "/nope/rc".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        match JobError::from(&err) {
            JobError::Launch(msg) => assert!(msg.contains("/nope/rc")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn malformed_reply_maps_to_protocol() {
        let err = BridgeError::Reply("not JSON".to_string());
        assert_eq!(JobError::from(&err), JobError::Protocol("not JSON".to_string()));
    }

    #[test]
    fn job_error_serializes_with_kind_tag() {
        let json = serde_json::to_string(&JobError::Cancelled).unwrap();
        assert_eq!(json, r#"{"kind":"cancelled"}"#);
    }
}
