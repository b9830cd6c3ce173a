use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::commands::{self, CompletionItem, LocationQuery, SymbolInfo, MONITOR_JOB_ID};
use crate::config::IndexerConfig;
use crate::diagnostics::{DiagnosticsAggregator, DiagnosticsSummary, FileDiagnostics};
use crate::error::{BridgeError, Result};
use crate::navigation::{
    HistoryEntry, JumpHistory, Location, LocationList, NavigationPayload, NavigationState,
    RenamePlan,
};
use crate::scheduler::{Job, JobResult, JobScheduler};
use crate::stream::StreamEvent;

/// Snapshot published whenever the tracked file's diagnostics change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticsUpdate {
    pub diagnostics: FileDiagnostics,
    pub summary: DiagnosticsSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Indexing { file: String },
    Ready,
    ReindexFailed { file: String, message: String },
    Disconnected { message: String },
}

/// Results of a navigation query, including ones deferred behind a reindex.
#[derive(Debug, Clone, Serialize)]
pub struct NavigationResult {
    pub file: String,
    /// Zero-based cursor position the query was issued from
    pub row: u32,
    pub col: u32,
    pub locations: LocationList,
}

/// Symbol details plus where the symbol is defined, if the index knows.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolReport {
    pub info: SymbolInfo,
    pub definition: Option<Location>,
}

#[derive(Debug)]
pub enum NavigationOutcome {
    /// Results are available now
    Ready(NavigationResult),
    /// A reindex was started; results follow on [`Session::navigation_results`]
    Deferred,
}

/// Everything the monitor dispatch loop shares with the session.
#[derive(Clone)]
struct Shared {
    scheduler: Arc<JobScheduler>,
    navigation: Arc<Mutex<NavigationState>>,
    history: Arc<Mutex<JumpHistory>>,
    aggregator: Arc<Mutex<DiagnosticsAggregator>>,
    diagnostics_tx: Arc<watch::Sender<Option<DiagnosticsUpdate>>>,
    status_tx: Arc<watch::Sender<SessionStatus>>,
    navigation_tx: broadcast::Sender<NavigationResult>,
}

/// Editor-facing context: one scheduler, one monitor, one tracked file.
pub struct Session {
    config: IndexerConfig,
    shared: Shared,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    completion_id: Mutex<Option<String>>,
    shutdown: CancellationToken,
}

impl Session {
    pub fn new(config: IndexerConfig) -> Self {
        let (diagnostics_tx, _) = watch::channel(None);
        let (status_tx, _) = watch::channel(SessionStatus::Idle);
        let (navigation_tx, _) = broadcast::channel(16);
        let shared = Shared {
            scheduler: Arc::new(JobScheduler::new(&config)),
            navigation: Arc::new(Mutex::new(NavigationState::new())),
            history: Arc::new(Mutex::new(JumpHistory::new(config.jump_limit))),
            aggregator: Arc::new(Mutex::new(DiagnosticsAggregator::new(config.fixits))),
            diagnostics_tx: Arc::new(diagnostics_tx),
            status_tx: Arc::new(status_tx),
            navigation_tx,
        };
        Self {
            config,
            shared,
            dispatch: Mutex::new(None),
            completion_id: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.shared.scheduler
    }

    pub fn diagnostics(&self) -> watch::Receiver<Option<DiagnosticsUpdate>> {
        self.shared.diagnostics_tx.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn navigation_results(&self) -> broadcast::Receiver<NavigationResult> {
        self.shared.navigation_tx.subscribe()
    }

    pub async fn is_navigation_done(&self) -> bool {
        self.shared.navigation.lock().await.is_done()
    }

    /// Start the monitor and its dispatch loop unless both are already running.
    pub async fn start_monitor(&self) {
        let mut dispatch = self.dispatch.lock().await;
        let dispatching = dispatch.as_ref().is_some_and(|handle| !handle.is_finished());
        if dispatching && self.shared.scheduler.is_active(MONITOR_JOB_ID).await {
            return;
        }
        if let Some(handle) = dispatch.take() {
            handle.abort();
        }

        tracing::info!("Starting monitor");
        let events = self.shared.scheduler.submit_stream(commands::monitor()).await;
        let shared = self.shared.clone();
        let shutdown = self.shutdown.clone();
        *dispatch = Some(tokio::spawn(async move {
            shared.dispatch(events, shutdown).await;
        }));
    }

    /// Track `file`, reindex it (with `unsaved` contents if non-empty) and
    /// ask for fresh diagnostics once indexing succeeds.
    ///
    /// Returns `None` if a reindex is already running. Otherwise the receiver
    /// resolves with the reindex result after the follow-up has run.
    pub async fn reindex(&self, file: &str, unsaved: &[u8]) -> Option<oneshot::Receiver<JobResult>> {
        {
            let mut aggregator = self.shared.aggregator.lock().await;
            aggregator.track(file);
            aggregator.clear();
        }
        self.shared.diagnostics_tx.send_replace(None);
        self.start_monitor().await;

        // Set before submitting so a fast completion is not overwritten.
        self.shared.status_tx.send_replace(SessionStatus::Indexing {
            file: file.to_string(),
        });
        let Some(done) = self
            .shared
            .scheduler
            .submit_with_receiver(commands::reindex(&self.config, file, unsaved))
            .await
        else {
            tracing::debug!(file, "Reindex already running");
            return None;
        };

        let (tx, rx) = oneshot::channel();
        let shared = self.shared.clone();
        let file = file.to_string();
        tokio::spawn(async move {
            let Ok(result) = done.await else {
                return;
            };
            shared.after_reindex(&file, &result).await;
            let _ = tx.send(result);
        });
        Some(rx)
    }

    /// Run a location query from a zero-based cursor position.
    ///
    /// If `dirty_text` is given, differs from the text last sent for
    /// navigation and no navigation is outstanding, the buffer is reindexed
    /// first and the query re-runs once the monitor reports completion.
    pub async fn navigate(
        &self,
        query: LocationQuery,
        file: &str,
        row: u32,
        col: u32,
        dirty_text: Option<&[u8]>,
    ) -> Result<NavigationOutcome> {
        if let Some(text) = dirty_text {
            let requested = {
                let mut navigation = self.shared.navigation.lock().await;
                navigation.is_done()
                    && navigation.last_text() != Some(text)
                    && navigation.request(
                        query.switches(),
                        NavigationPayload {
                            file: file.to_string(),
                            row,
                            col,
                            text: text.to_vec(),
                        },
                    )
            };
            if requested {
                if self.reindex(file, text).await.is_none() {
                    tracing::debug!(file, "Navigation waits on the running reindex");
                }
                return Ok(NavigationOutcome::Deferred);
            }
        }

        let id = format!("{}{}", query.job_prefix(), self.shared.scheduler.next_id());
        let outcome = self
            .query(commands::location(id, &query.switches(), file, row, col))
            .await;
        self.shared.navigation.lock().await.complete();

        let result = self.shared.navigation_result(file, row, col, &outcome?).await;
        Ok(NavigationOutcome::Ready(result))
    }

    /// Group the references under the cursor for a rename.
    pub async fn rename_plan(&self, file: &str, row: u32, col: u32) -> Result<RenamePlan> {
        match self.navigate(LocationQuery::Rename, file, row, col, None).await? {
            NavigationOutcome::Ready(result) => {
                Ok(RenamePlan::from_locations(&result.locations.locations))
            }
            NavigationOutcome::Deferred => {
                Err(BridgeError::Internal("rename query was deferred".to_string()))
            }
        }
    }

    /// Symbol info at a zero-based position, followed by a lookup of the
    /// symbol's definition.
    pub async fn symbol_info(&self, file: &str, row: u32, col: u32) -> Result<SymbolReport> {
        let id = format!("symbol-info-{}", self.shared.scheduler.next_id());
        let result = self.query(commands::symbol_info(id, file, row, col)).await?;
        let info = SymbolInfo::parse(&result.output_text())?;

        let id = format!(
            "{}{}",
            LocationQuery::FollowSymbol.job_prefix(),
            self.shared.scheduler.next_id()
        );
        let switches = LocationQuery::FollowSymbol.switches();
        let definition = match self.query(commands::location(id, &switches, file, row, col)).await {
            Ok(result) => result.output_text().lines().find_map(Location::parse),
            Err(e) => {
                tracing::warn!(file, error = %e, "Symbol location lookup failed");
                None
            }
        };

        Ok(SymbolReport { info, definition })
    }

    /// Include directives that provide `symbol` to `file`. A blank symbol
    /// yields nothing without asking the indexer.
    pub async fn include_for(&self, file: &str, symbol: &str) -> Result<Vec<String>> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Ok(Vec::new());
        }
        let id = format!("include-{}", self.shared.scheduler.next_id());
        let result = self.query(commands::include_file(id, file, symbol)).await?;
        Ok(commands::parse_includes(&result.output_text()))
    }

    /// Completions at a zero-based position of the unsaved `text`.
    ///
    /// A completion still running for a different position is cancelled
    /// first. Returns `Ok(None)` if this exact request is already running or
    /// gets cancelled by a newer one.
    pub async fn complete_at(
        &self,
        file: &str,
        text: &[u8],
        offset: usize,
        row: u32,
        col: u32,
    ) -> Result<Option<Vec<CompletionItem>>> {
        let id = commands::completion_job_id(offset);
        let previous = self.completion_id.lock().await.replace(id.clone());
        if let Some(previous) = previous.filter(|previous| *previous != id) {
            self.shared.scheduler.cancel(&previous).await;
        }

        let job = commands::completion(&self.config, file, text, offset, row, col);
        let Some(done) = self.shared.scheduler.submit_with_receiver(job).await else {
            tracing::debug!(job_id = %id, "Completion already running for this position");
            return Ok(None);
        };

        let result = done
            .await
            .map_err(|_| BridgeError::Internal("completion job dropped".to_string()));

        {
            let mut current = self.completion_id.lock().await;
            if current.as_deref() == Some(id.as_str()) {
                *current = None;
            }
        }

        match result.and_then(JobResult::check) {
            Ok(result) => Ok(Some(commands::parse_completions(&result.output_text()))),
            Err(BridgeError::Cancelled) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Most recent jump origin, removed from the history.
    pub async fn jump_back(&self) -> Option<HistoryEntry> {
        self.shared.history.lock().await.pop()
    }

    /// Oldest first.
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.shared.history.lock().await.entries().cloned().collect()
    }

    pub async fn jump_to(&self, index: usize) -> Option<HistoryEntry> {
        self.shared.history.lock().await.truncate_to(index)
    }

    pub async fn current_diagnostics(&self) -> Option<FileDiagnostics> {
        self.shared.aggregator.lock().await.diagnostics().cloned()
    }

    /// Run a one-shot query on the pool and wait for its result.
    async fn query(&self, job: Job) -> Result<JobResult> {
        let id = job.id.clone();
        match self.shared.scheduler.submit_with_receiver(job).await {
            Some(done) => done
                .await
                .map_err(|_| BridgeError::Internal(format!("{} dropped", id)))
                .and_then(JobResult::check),
            None => Err(BridgeError::Internal(format!("job id collision: {}", id))),
        }
    }

    /// Stop the dispatch loop and cancel every running job.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down session");
        self.shutdown.cancel();
        self.shared.scheduler.cancel_all().await;
        if let Some(handle) = self.dispatch.lock().await.take() {
            handle.abort();
        }
    }
}

impl Shared {
    async fn dispatch(self, mut events: broadcast::Receiver<StreamEvent>, shutdown: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(StreamEvent::DiagnosticBatch(diagnostics)) => self.on_diagnostics(diagnostics).await,
                Ok(StreamEvent::ProgressUpdate { index, total }) => {
                    tracing::debug!(index, total, "Indexing complete");
                    self.status_tx.send_replace(SessionStatus::Ready);
                    self.resume_navigation().await;
                }
                Ok(StreamEvent::ConnectionError { message }) => {
                    tracing::warn!(message = %message, "Monitor disconnected");
                    self.status_tx
                        .send_replace(SessionStatus::Disconnected { message });
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Dispatch fell behind the monitor");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("Monitor dispatch stopped");
    }

    async fn on_diagnostics(&self, diagnostics: FileDiagnostics) {
        let summary = self.aggregator.lock().await.apply(diagnostics.clone());
        if let Some(summary) = summary {
            tracing::info!(filename = %diagnostics.filename, summary = %summary, "Diagnostics");
            self.diagnostics_tx
                .send_replace(Some(DiagnosticsUpdate { diagnostics, summary }));
        }
    }

    /// Re-run a navigation that was waiting for the reindex to finish.
    async fn resume_navigation(&self) {
        let pending = {
            let navigation = self.navigation.lock().await;
            if navigation.is_done() {
                return;
            }
            navigation
                .payload()
                .cloned()
                .map(|payload| (navigation.switches().to_vec(), payload))
        };

        if let Some((switches, payload)) = pending {
            let id = format!("navigate-{}", self.scheduler.next_id());
            let job = commands::location(id, &switches, &payload.file, payload.row, payload.col);
            match self.scheduler.run_blocking(job, None).await.check() {
                Ok(result) => {
                    let result = self
                        .navigation_result(&payload.file, payload.row, payload.col, &result)
                        .await;
                    let _ = self.navigation_tx.send(result);
                }
                Err(e) => tracing::warn!(error = %e, "Deferred navigation failed"),
            }
        }
        self.navigation.lock().await.complete();
    }

    async fn after_reindex(&self, file: &str, result: &JobResult) {
        if result.success() {
            // A clean file is never reported on its own; ask for it explicitly.
            let diagnose = self.scheduler.run_blocking(commands::diagnose(file), None).await;
            if !diagnose.success() {
                tracing::warn!(file, exit_code = ?diagnose.exit_code, "Diagnose follow-up failed");
            }
            return;
        }

        let message = match &result.error {
            Some(error) => error.to_string(),
            None => result.output_text().trim().to_string(),
        };
        tracing::warn!(file, message = %message, "Reindex failed");
        self.status_tx.send_replace(SessionStatus::ReindexFailed {
            file: file.to_string(),
            message,
        });
        // A navigation waiting on this reindex will never be resumed.
        self.navigation.lock().await.complete();
    }

    async fn navigation_result(&self, file: &str, row: u32, col: u32, result: &JobResult) -> NavigationResult {
        let locations = LocationList::parse(&result.output_text(), row + 1);
        if !locations.is_empty() {
            self.history
                .lock()
                .await
                .push(HistoryEntry::new(file, row + 1, col + 1));
        }
        NavigationResult {
            file: file.to_string(),
            row,
            col,
            locations,
        }
    }
}
