use std::collections::HashMap;
use std::ops::ControlFlow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, oneshot, watch, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::AbortHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::config::IndexerConfig;
use crate::error::{BridgeError, JobError, Result};
use crate::scheduler::job::{
    CompletionCallback, ExecuteStrategy, Job, JobResult, JobStatus,
};
use crate::stream::{StreamDecoder, StreamEvent};
use crate::worker::{ProcessOutput, ProcessRunner};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Bookkeeping for one running job.
struct ActiveJob {
    /// Distinguishes successive jobs that reuse the same identity
    seq: u64,
    runner: ProcessRunner,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
    abort: Option<AbortHandle>,
    strategy: ExecuteStrategy,
}

type ActiveMap = Arc<Mutex<HashMap<String, ActiveJob>>>;

/// Everything a job needs once it leaves the critical section.
struct PreparedJob {
    exec: Execution,
    completion: Completion,
}

/// What the running process borrows. Kept apart from [`Completion`] so the
/// spawned task only holds shared references to `Sync` data.
struct Execution {
    args: Vec<String>,
    input: Vec<u8>,
    timeout: Option<Duration>,
    strategy: ExecuteStrategy,
    runner: ProcessRunner,
    cancel: CancellationToken,
}

/// Owned by the task until the result is delivered.
struct Completion {
    id: String,
    seq: u64,
    callbacks: Vec<CompletionCallback>,
    waiters: Vec<oneshot::Sender<JobResult>>,
    done: watch::Sender<bool>,
}

/// Runs indexer jobs with at most one in flight per job identity.
///
/// One-shot jobs share a bounded pool; a streaming job (the monitor) runs
/// on its own task and publishes decoded events to every subscriber. The
/// active-job map is the only shared state and is only ever locked for
/// bookkeeping, never while a process runs.
pub struct JobScheduler {
    program: PathBuf,
    default_timeout: Duration,
    cancel_grace: Duration,
    max_element_bytes: usize,
    pool: Arc<Semaphore>,
    active: ActiveMap,
    events: broadcast::Sender<StreamEvent>,
    next_seq: AtomicU64,
    next_id: AtomicU64,
}

impl JobScheduler {
    pub fn new(config: &IndexerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            program: config.rc_path.clone(),
            default_timeout: config.rc_timeout,
            cancel_grace: config.cancel_grace,
            max_element_bytes: config.max_element_bytes,
            pool: Arc::new(Semaphore::new(config.pool_size.max(1))),
            active: Arc::new(Mutex::new(HashMap::new())),
            events,
            next_seq: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
        }
    }

    /// Unique suffix for caller-built job identities.
    pub fn next_id(&self) -> String {
        (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    /// Schedule `job`. Returns `false` (and does nothing) when a job with the
    /// same identity is still running.
    ///
    /// One-shot submissions wait here for a free pool slot.
    pub async fn submit(&self, mut job: Job, on_complete: Option<CompletionCallback>) -> bool {
        if let Some(callback) = on_complete {
            job.callbacks.push(callback);
        }
        self.schedule(job).await
    }

    /// Like [`submit`](Self::submit), returning a receiver that resolves
    /// with the result after the job's bookkeeping has been removed.
    pub async fn submit_with_receiver(&self, mut job: Job) -> Option<oneshot::Receiver<JobResult>> {
        let rx = job.waiter();
        if self.schedule(job).await {
            Some(rx)
        } else {
            None
        }
    }

    /// Start `job` as the streaming monitor (if it is not already running)
    /// and subscribe to its events.
    pub async fn submit_stream(&self, job: Job) -> broadcast::Receiver<StreamEvent> {
        let events = self.subscribe();
        let job = job.streaming();
        let id = job.id.clone();
        if !self.schedule(job).await {
            tracing::debug!(job_id = %id, "Monitor already running, subscribed to existing stream");
        }
        events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    pub fn event_stream(&self) -> BroadcastStream<StreamEvent> {
        BroadcastStream::new(self.subscribe())
    }

    /// Execute on the caller's task, bypassing the pool and identity tracking.
    pub async fn run_blocking(&self, mut job: Job, timeout: Option<Duration>) -> JobResult {
        if !job.quiet {
            tracing::debug!(job_id = %job.id, "Running blocking job");
        }
        let runner = ProcessRunner::new(&self.program, &job.id).quiet(job.quiet);
        let started_at = Utc::now();
        let limit = timeout.or(job.timeout).unwrap_or(self.default_timeout);
        let outcome = runner.execute(&job.args, &job.input, Some(limit)).await;
        let result = into_result(&job.id, started_at, outcome);

        for callback in job.callbacks.drain(..) {
            invoke(callback, &result);
        }
        for waiter in job.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
        result
    }

    /// Stop a running job and wait up to the grace period for it to finish.
    /// Returns `false` if no job with that identity is running.
    pub async fn cancel(&self, job_id: &str) -> bool {
        let (seq, runner, cancel, mut done) = {
            let active = self.active.lock().await;
            match active.get(job_id) {
                Some(entry) => (
                    entry.seq,
                    entry.runner.clone(),
                    entry.cancel.clone(),
                    entry.done.clone(),
                ),
                None => {
                    tracing::debug!(job_id, "Job not running, nothing to cancel");
                    return false;
                }
            }
        };

        tracing::debug!(job_id, "Cancelling job");
        runner.stop();
        cancel.cancel();

        let acknowledged = matches!(
            tokio::time::timeout(self.cancel_grace, done.wait_for(|finished| *finished)).await,
            Ok(Ok(_))
        );

        if acknowledged {
            tracing::debug!(job_id, "Job finished after cancellation");
        } else {
            let mut active = self.active.lock().await;
            if active.get(job_id).is_some_and(|entry| entry.seq == seq) {
                if let Some(abort) = active.remove(job_id).and_then(|entry| entry.abort) {
                    abort.abort();
                }
            }
            drop(active);
            tracing::warn!(
                job_id,
                grace = ?self.cancel_grace,
                "Job did not acknowledge cancellation, force-cancelled"
            );
        }
        true
    }

    /// Cancel every running job. Used at shutdown.
    pub async fn cancel_all(&self) {
        let ids = self.active_jobs().await;
        if !ids.is_empty() {
            tracing::info!(jobs = ?ids, "Cancelling all running jobs");
        }
        for id in ids {
            self.cancel(&id).await;
        }
    }

    pub async fn is_active(&self, job_id: &str) -> bool {
        self.active.lock().await.contains_key(job_id)
    }

    /// Identities of all running jobs, sorted.
    pub async fn active_jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    pub async fn streaming_jobs(&self) -> Vec<String> {
        self.active
            .lock()
            .await
            .iter()
            .filter(|(_, entry)| entry.strategy == ExecuteStrategy::Streaming)
            .map(|(id, _)| id.clone())
            .collect()
    }

    async fn schedule(&self, job: Job) -> bool {
        let Some(prepared) = self.register(job).await else {
            return false;
        };

        let permit = match prepared.exec.strategy {
            ExecuteStrategy::Streaming => None,
            ExecuteStrategy::OneShot => {
                match self.acquire_slot(&prepared.exec.cancel).await {
                    Ok(permit) => Some(permit),
                    Err(e) => {
                        // Cancelled (or pool closed) while queued: report and release.
                        let result = failed_result(&prepared.completion.id, Utc::now(), &e);
                        finish(&self.active, prepared.completion, result).await;
                        return true;
                    }
                }
            }
        };

        let id = prepared.completion.id.clone();
        let seq = prepared.completion.seq;
        let ctx = RunContext {
            active: self.active.clone(),
            events: self.events.clone(),
            default_timeout: self.default_timeout,
            max_element_bytes: self.max_element_bytes,
        };

        let handle = tokio::spawn(async move {
            let _permit = permit;
            ctx.run(prepared).await;
        });

        let mut active = self.active.lock().await;
        if let Some(entry) = active.get_mut(&id) {
            if entry.seq == seq {
                entry.abort = Some(handle.abort_handle());
            }
        }
        true
    }

    /// Claim the job's identity. `None` if it is already taken.
    async fn register(&self, mut job: Job) -> Option<PreparedJob> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let runner = ProcessRunner::new(&self.program, &job.id).quiet(job.quiet);
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);

        {
            let mut active = self.active.lock().await;
            if active.contains_key(&job.id) {
                tracing::debug!(job_id = %job.id, "Job still active, submission rejected");
                return None;
            }
            active.insert(
                job.id.clone(),
                ActiveJob {
                    seq,
                    runner: runner.clone(),
                    cancel: cancel.clone(),
                    done: done_rx,
                    abort: None,
                    strategy: job.strategy,
                },
            );
        }

        if !job.quiet {
            tracing::debug!(job_id = %job.id, strategy = ?job.strategy, "Starting async job");
        }

        Some(PreparedJob {
            exec: Execution {
                args: job.args,
                input: job.input,
                timeout: job.timeout,
                strategy: job.strategy,
                runner,
                cancel,
            },
            completion: Completion {
                id: job.id,
                seq,
                callbacks: std::mem::take(&mut job.callbacks),
                waiters: std::mem::take(&mut job.waiters),
                done: done_tx,
            },
        })
    }

    async fn acquire_slot(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit> {
        tokio::select! {
            permit = self.pool.clone().acquire_owned() => {
                permit.map_err(|_| BridgeError::Internal("worker pool closed".to_string()))
            }
            _ = cancel.cancelled() => Err(BridgeError::Cancelled),
        }
    }
}

struct RunContext {
    active: ActiveMap,
    events: broadcast::Sender<StreamEvent>,
    default_timeout: Duration,
    max_element_bytes: usize,
}

impl RunContext {
    async fn run(self, job: PreparedJob) {
        let PreparedJob { exec, completion } = job;
        let started_at = Utc::now();

        let execution = async {
            match exec.strategy {
                ExecuteStrategy::OneShot => {
                    let limit = exec.timeout.unwrap_or(self.default_timeout);
                    exec.runner.execute(&exec.args, &exec.input, Some(limit)).await
                }
                ExecuteStrategy::Streaming => self.stream(&exec).await,
            }
        };

        let outcome = tokio::select! {
            outcome = execution => outcome,
            _ = exec.cancel.cancelled() => Err(BridgeError::Cancelled),
        };

        let result = into_result(&completion.id, started_at, outcome);
        finish(&self.active, completion, result).await;
    }

    async fn stream(&self, job: &Execution) -> Result<ProcessOutput> {
        let mut decoder = StreamDecoder::with_max_element_bytes(self.max_element_bytes);
        let mut connection_error: Option<String> = None;

        let output = job
            .runner
            .execute_streaming(&job.args, &job.input, job.timeout, |line| {
                // Protocol errors were logged by the decoder, which has already reset.
                if let Ok(events) = decoder.push_bytes(line) {
                    for event in events {
                        if let StreamEvent::ConnectionError { message } = &event {
                            connection_error = Some(message.clone());
                        }
                        // No subscribers is fine; events are not replayed.
                        let _ = self.events.send(event);
                    }
                }
                if decoder.is_finished() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .await?;

        match connection_error {
            Some(message) => Err(BridgeError::Connection(message)),
            None => Ok(output),
        }
    }
}

fn into_result(
    job_id: &str,
    started_at: chrono::DateTime<Utc>,
    outcome: Result<ProcessOutput>,
) -> JobResult {
    match outcome {
        Ok(output) => {
            let status = if output.success() {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            };
            JobResult {
                job_id: job_id.to_string(),
                status,
                exit_code: output.exit_code,
                output: output.output,
                error: None,
                started_at,
                completed_at: Utc::now(),
            }
        }
        Err(e) => failed_result(job_id, started_at, &e),
    }
}

fn failed_result(job_id: &str, started_at: chrono::DateTime<Utc>, err: &BridgeError) -> JobResult {
    let error = JobError::from(err);
    let status = if error == JobError::Cancelled {
        JobStatus::Cancelled
    } else {
        JobStatus::Failed
    };
    JobResult {
        job_id: job_id.to_string(),
        status,
        exit_code: None,
        output: Vec::new(),
        error: Some(error),
        started_at,
        completed_at: Utc::now(),
    }
}

/// Fire callbacks, drop bookkeeping, then wake cancel waiters and receivers.
async fn finish(active: &ActiveMap, job: Completion, result: JobResult) {
    match &result.error {
        None => tracing::info!(
            job_id = %job.id,
            status = %result.status,
            exit_code = ?result.exit_code,
            output_len = result.output.len(),
            "Job completed"
        ),
        Some(JobError::Cancelled) => tracing::info!(job_id = %job.id, "Job cancelled"),
        Some(error) => tracing::error!(job_id = %job.id, error = %error, "Job failed"),
    }

    for callback in job.callbacks {
        invoke(callback, &result);
    }

    remove_entry(active, &job.id, job.seq).await;
    job.done.send_replace(true);

    for waiter in job.waiters {
        let _ = waiter.send(result.clone());
    }
}

async fn remove_entry(active: &ActiveMap, job_id: &str, seq: u64) {
    let mut active = active.lock().await;
    if active.get(job_id).is_some_and(|entry| entry.seq == seq) {
        active.remove(job_id);
        tracing::debug!(job_id, "Removed bookkeeping for job");
    }
}

fn invoke(callback: CompletionCallback, result: &JobResult) {
    if catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
        tracing::error!(job_id = %result.job_id, "Completion callback panicked");
    }
}
