use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    /// Map a monitor `severity` attribute. Fixits count as errors; anything
    /// else (notes, skipped ranges) is not reported.
    pub fn from_monitor(value: &str) -> Option<Self> {
        match value {
            "warning" => Some(Severity::Warning),
            "error" | "fixit" => Some(Severity::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A single diagnostic at a 1-based line/column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub line: u32,
    pub column: u32,
    /// `None` means the issue runs to the end of its line
    pub length: Option<u32>,
    pub message: String,
}

/// Column range covered by an issue, resolved against the line it sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSpan {
    ToEndOfLine { start: u32 },
    Columns { start: u32, end: u32 },
}

impl IssueSpan {
    /// Exclusive 1-based end column, given the length of the issue's line.
    pub fn end_column(&self, line_length: usize) -> u32 {
        match *self {
            IssueSpan::ToEndOfLine { start } => {
                let eol = u32::try_from(line_length).unwrap_or(u32::MAX).saturating_add(1);
                eol.max(start)
            }
            IssueSpan::Columns { end, .. } => end,
        }
    }
}

impl Issue {
    /// Build an issue from raw monitor values. Line and column are clamped
    /// to 1; a negative length means "to end of line".
    pub fn new(
        severity: Severity,
        line: i64,
        column: i64,
        length: Option<i64>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            line: clamp_position(line),
            column: clamp_position(column),
            length: length.and_then(|len| u32::try_from(len).ok()),
            message: message.into(),
        }
    }

    pub fn span(&self) -> IssueSpan {
        match self.length {
            Some(len) => IssueSpan::Columns {
                start: self.column,
                end: self.column.saturating_add(len),
            },
            None => IssueSpan::ToEndOfLine { start: self.column },
        }
    }
}

fn clamp_position(value: i64) -> u32 {
    u32::try_from(value.max(1)).unwrap_or(u32::MAX)
}

/// Error/warning counts for status display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsSummary {
    pub errors: usize,
    pub warnings: usize,
}

impl DiagnosticsSummary {
    pub fn is_clean(&self) -> bool {
        self.errors == 0 && self.warnings == 0
    }
}

impl std::fmt::Display for DiagnosticsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_clean() {
            return write!(f, "✅");
        }
        let mut parts = Vec::new();
        if self.errors > 0 {
            parts.push(format!("⛔: {}", self.errors));
        }
        if self.warnings > 0 {
            parts.push(format!("✋: {}", self.warnings));
        }
        write!(f, "{}", parts.join(" "))
    }
}

/// The complete issue set reported for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiagnostics {
    pub filename: String,
    pub warnings: Vec<Issue>,
    pub errors: Vec<Issue>,
}

/// Entry for a diagnostics picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavigationItem {
    pub filename: String,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl FileDiagnostics {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Default::default()
        }
    }

    /// Sort issues into their severity lists, keeping arrival order.
    pub fn from_issues(filename: impl Into<String>, issues: impl IntoIterator<Item = Issue>) -> Self {
        let mut diagnostics = Self::new(filename);
        for issue in issues {
            diagnostics.push(issue);
        }
        diagnostics
    }

    pub fn push(&mut self, issue: Issue) {
        match issue.severity {
            Severity::Warning => self.warnings.push(issue),
            Severity::Error => self.errors.push(issue),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }

    pub fn summary(&self) -> DiagnosticsSummary {
        DiagnosticsSummary {
            errors: self.errors.len(),
            warnings: self.warnings.len(),
        }
    }

    /// Errors first, then warnings.
    pub fn navigation_items(&self) -> Vec<NavigationItem> {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .map(|issue| NavigationItem {
                filename: self.filename.clone(),
                line: issue.line,
                column: issue.column,
                message: issue.message.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixit_maps_to_error() {
        assert_eq!(Severity::from_monitor("fixit"), Some(Severity::Error));
        assert_eq!(Severity::from_monitor("warning"), Some(Severity::Warning));
        assert_eq!(Severity::from_monitor("note"), None);
    }

    #[test]
    fn negative_length_runs_to_end_of_line() {
        let issue = Issue::new(Severity::Error, 3, 5, Some(-1), "boom");
        assert_eq!(issue.length, None);
        assert_eq!(issue.span(), IssueSpan::ToEndOfLine { start: 5 });
        assert_eq!(issue.span().end_column(20), 21);
    }

    #[test]
    fn missing_length_runs_to_end_of_line() {
        let issue = Issue::new(Severity::Warning, 1, 1, None, "unused");
        assert_eq!(issue.span(), IssueSpan::ToEndOfLine { start: 1 });
    }

    #[test]
    fn explicit_length_gives_end_column() {
        let zero = Issue::new(Severity::Error, 2, 7, Some(0), "here");
        assert_eq!(zero.span(), IssueSpan::Columns { start: 7, end: 7 });

        let four = Issue::new(Severity::Error, 2, 7, Some(4), "here");
        assert_eq!(four.span(), IssueSpan::Columns { start: 7, end: 11 });
        assert_eq!(four.span().end_column(100), 11);
    }

    #[test]
    fn positions_are_clamped_to_one() {
        let issue = Issue::new(Severity::Error, 0, -4, None, "odd");
        assert_eq!(issue.line, 1);
        assert_eq!(issue.column, 1);
    }

    #[test]
    fn end_of_line_never_precedes_start() {
        let span = IssueSpan::ToEndOfLine { start: 30 };
        assert_eq!(span.end_column(10), 30);
    }

    #[test]
    fn summary_rendering() {
        assert_eq!(DiagnosticsSummary::default().to_string(), "✅");
        let both = DiagnosticsSummary { errors: 2, warnings: 1 };
        assert_eq!(both.to_string(), "⛔: 2 ✋: 1");
        let warnings = DiagnosticsSummary { errors: 0, warnings: 3 };
        assert_eq!(warnings.to_string(), "✋: 3");
    }

    #[test]
    fn navigation_items_list_errors_first() {
        let diagnostics = FileDiagnostics::from_issues(
            "a.cpp",
            vec![
                Issue::new(Severity::Warning, 1, 1, None, "w"),
                Issue::new(Severity::Error, 9, 2, Some(3), "e"),
            ],
        );
        let items = diagnostics.navigation_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].message, "e");
        assert_eq!(items[0].line, 9);
        assert_eq!(items[1].message, "w");
    }
}
