use std::borrow::Cow;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tokio::sync::oneshot;

use crate::error::{BridgeError, JobError};

/// How a job's process is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteStrategy {
    /// Run on the bounded pool, collect all output, report once
    OneShot,
    /// Run on a dedicated task, decode output as monitor events
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

pub type CompletionCallback = Box<dyn FnOnce(&JobResult) + Send + 'static>;

/// A request to run the indexer client once.
pub struct Job {
    pub id: String,
    pub args: Vec<String>,
    pub input: Vec<u8>,
    pub timeout: Option<Duration>,
    pub strategy: ExecuteStrategy,
    pub quiet: bool,
    pub(crate) callbacks: Vec<CompletionCallback>,
    pub(crate) waiters: Vec<oneshot::Sender<JobResult>>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("args", &self.args)
            .field("input_len", &self.input.len())
            .field("timeout", &self.timeout)
            .field("strategy", &self.strategy)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl Job {
    pub fn new<I, S>(id: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            args: args.into_iter().map(Into::into).collect(),
            input: Vec::new(),
            timeout: None,
            strategy: ExecuteStrategy::OneShot,
            quiet: false,
            callbacks: Vec::new(),
            waiters: Vec::new(),
        }
    }

    pub fn with_input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = input.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn streaming(mut self) -> Self {
        self.strategy = ExecuteStrategy::Streaming;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Register a callback fired exactly once with the job's result.
    pub fn on_complete(mut self, callback: impl FnOnce(&JobResult) + Send + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub(crate) fn waiter(&mut self) -> oneshot::Receiver<JobResult> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        rx
    }
}

/// Outcome of one job, delivered once to every callback.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job_id: String,
    pub status: JobStatus,
    /// `None` for abnormal termination (signal, timeout, cancellation, launch failure)
    pub exit_code: Option<i32>,
    #[serde(serialize_with = "lossy_text")]
    pub output: Vec<u8>,
    pub error: Option<JobError>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl JobResult {
    pub fn success(&self) -> bool {
        self.error.is_none() && self.exit_code == Some(0)
    }

    pub fn output_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }

    pub fn lines(&self) -> Vec<String> {
        self.output_text().lines().map(str::to_string).collect()
    }

    /// Turn a carried failure into an `Err`. A non-zero exit is not a failure
    /// here; queries with no results exit non-zero.
    pub fn check(mut self) -> Result<Self, BridgeError> {
        match self.error.take() {
            None => Ok(self),
            Some(JobError::Cancelled) => Err(BridgeError::Cancelled),
            Some(error) => Err(BridgeError::Job {
                job_id: self.job_id,
                error,
            }),
        }
    }
}

fn lossy_text<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}
