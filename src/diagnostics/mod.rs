//! Per-file diagnostics collected from the monitor stream.

pub mod aggregator;
pub mod issue;

pub use aggregator::DiagnosticsAggregator;
pub use issue::{
    DiagnosticsSummary, FileDiagnostics, Issue, IssueSpan, NavigationItem, Severity,
};
