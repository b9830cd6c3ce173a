use crate::diagnostics::issue::{DiagnosticsSummary, FileDiagnostics};

/// Holds the latest diagnostics for the one file a consumer is tracking.
///
/// Every accepted update replaces the stored set wholesale. Updates for any
/// other file are logged and dropped.
#[derive(Debug)]
pub struct DiagnosticsAggregator {
    enabled: bool,
    active_file: Option<String>,
    current: Option<FileDiagnostics>,
}

impl Default for DiagnosticsAggregator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl DiagnosticsAggregator {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            active_file: None,
            current: None,
        }
    }

    /// Switch to tracking `filename`, discarding anything stored for the
    /// previously tracked file.
    pub fn track(&mut self, filename: impl Into<String>) {
        let filename = filename.into();
        if self.active_file.as_deref() != Some(filename.as_str()) {
            tracing::debug!(filename = %filename, "Tracking diagnostics");
            self.current = None;
        }
        self.active_file = Some(filename);
    }

    pub fn active_file(&self) -> Option<&str> {
        self.active_file.as_deref()
    }

    /// Replace the stored diagnostics. Returns the summary for status
    /// display, or `None` when the update was dropped.
    pub fn apply(&mut self, diagnostics: FileDiagnostics) -> Option<DiagnosticsSummary> {
        if !self.enabled {
            tracing::debug!(filename = %diagnostics.filename, "Diagnostics disabled, update dropped");
            return None;
        }

        match self.active_file.as_deref() {
            Some(active) if active == diagnostics.filename => {}
            Some(active) => {
                tracing::warn!(
                    filename = %diagnostics.filename,
                    active,
                    "Diagnostics update for untracked file dropped"
                );
                return None;
            }
            None => {
                tracing::warn!(filename = %diagnostics.filename, "No tracked file, update dropped");
                return None;
            }
        }

        let summary = diagnostics.summary();
        tracing::debug!(
            filename = %diagnostics.filename,
            errors = summary.errors,
            warnings = summary.warnings,
            "Diagnostics updated"
        );
        self.current = Some(diagnostics);
        Some(summary)
    }

    /// Drop the stored diagnostics. Idempotent.
    pub fn clear(&mut self) {
        self.current = None;
    }

    pub fn diagnostics(&self) -> Option<&FileDiagnostics> {
        self.current.as_ref()
    }

    pub fn diagnostics_for(&self, filename: &str) -> Option<&FileDiagnostics> {
        self.current.as_ref().filter(|d| d.filename == filename)
    }
}
