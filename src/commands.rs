//! Argument builders for the indexer client and parsers for its replies.

use serde::Serialize;
use serde_json::Value;

use crate::config::IndexerConfig;
use crate::error::{BridgeError, Result};
use crate::scheduler::Job;

pub const REINDEX_JOB_ID: &str = "reindex";
pub const MONITOR_JOB_ID: &str = "monitor";

/// A cursor-position query against the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationQuery {
    FollowSymbol,
    References,
    Rename,
}

impl LocationQuery {
    pub fn switches(self) -> Vec<String> {
        let switches: &[&str] = match self {
            LocationQuery::FollowSymbol => &["-f"],
            LocationQuery::References => &["-r"],
            LocationQuery::Rename => &["--rename", "-r"],
        };
        switches.iter().map(|s| s.to_string()).collect()
    }

    pub fn job_prefix(self) -> &'static str {
        match self {
            LocationQuery::FollowSymbol => "follow-",
            LocationQuery::References => "references-",
            LocationQuery::Rename => "rename-",
        }
    }
}

/// `<file>:<row+1>:<col+1>` for zero-based editor coordinates.
pub fn position(file: &str, row: u32, col: u32) -> String {
    format!("{}:{}:{}", file, row + 1, col + 1)
}

/// Reindex `file`, passing its unsaved contents on stdin when there are any.
pub fn reindex(config: &IndexerConfig, file: &str, unsaved: &[u8]) -> Job {
    let mut args = vec!["-V".to_string(), file.to_string()];
    if !unsaved.is_empty() {
        args.push("--unsaved-file".to_string());
        args.push(format!("{}:{}", file, unsaved.len()));
    }
    Job::new(REINDEX_JOB_ID, args)
        .with_input(unsaved)
        .with_timeout(config.reindex_timeout)
}

/// Ask the daemon to re-send diagnostics for `file` on the monitor stream.
pub fn diagnose(file: &str) -> Job {
    Job::new(format!("diagnose-{}", file), ["--diagnose", file]).quiet()
}

/// The long-lived diagnostics/progress feed.
pub fn monitor() -> Job {
    Job::new(MONITOR_JOB_ID, ["-m"]).streaming()
}

pub fn completion_job_id(offset: usize) -> String {
    format!("completion-{}", offset)
}

/// Synchronous completion at a zero-based `row`/`col` of the unsaved `text`.
/// `offset` is the buffer position that identifies the request.
pub fn completion(
    config: &IndexerConfig,
    file: &str,
    text: &[u8],
    offset: usize,
    row: u32,
    col: u32,
) -> Job {
    Job::new(
        completion_job_id(offset),
        [
            "-l".to_string(),
            position(file, row, col),
            "--unsaved-file".to_string(),
            format!("{}:{}", file, text.len()),
            "--synchronous-completions".to_string(),
        ],
    )
    .with_input(text)
    .with_timeout(config.completion_timeout)
}

/// A location query with explicit switches, e.g. `-f` or `--rename -r`.
pub fn location(
    id: impl Into<String>,
    switches: &[String],
    file: &str,
    row: u32,
    col: u32,
) -> Job {
    let mut args = vec!["--absolute-path".to_string()];
    args.extend(switches.iter().cloned());
    args.push(position(file, row, col));
    Job::new(id, args)
}

/// `--symbol-info` as JSON for the symbol at a zero-based position.
pub fn symbol_info(id: impl Into<String>, file: &str, row: u32, col: u32) -> Job {
    Job::new(
        id,
        [
            "--absolute-path".to_string(),
            "--json".to_string(),
            "--symbol-info".to_string(),
            position(file, row, col),
        ],
    )
}

/// Include directives that would make `symbol` visible from `file`.
pub fn include_file(id: impl Into<String>, file: &str, symbol: &str) -> Job {
    Job::new(
        id,
        [
            format!("--current-file={}", file),
            "--include-file".to_string(),
            symbol.to_string(),
        ],
    )
}

/// One candidate per non-empty line, e.g. `#include <vector>`.
pub fn parse_includes(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Boolean keys that qualify the symbol's kind rather than stand alone.
const KIND_EXTENSIONS: [&str; 7] = [
    "auto",
    "virtual",
    "container",
    "definition",
    "reference",
    "staticmethod",
    "templatereference",
];

/// Keys shown first, in this order.
const LEADING_KEYS: [&str; 6] = ["symbolName", "briefComment", "type", "kind", "linkage", "sizeof"];

fn field_title(key: &str) -> &str {
    match key {
        "argumentIndex" => "argument index",
        "briefComment" => "brief comment",
        "constmethod" => "const method",
        "fieldOffset" => "field offset",
        "purevirtual" => "pure virtual",
        "macroexpansion" => "macro expansion",
        "templatespecialization" => "template specialization",
        "templatereference" => "template reference",
        "staticmethod" => "static method",
        "stackCost" => "size on stack",
        "symbolName" => "name",
        other => other,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolField {
    /// Raw key in the indexer's reply
    pub key: String,
    pub title: String,
    pub value: String,
}

/// `--symbol-info --json` reply, ordered for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SymbolInfo {
    pub fields: Vec<SymbolField>,
    /// Titles of the kind extensions that are set, sorted
    pub kind_extensions: Vec<String>,
}

impl SymbolInfo {
    pub fn parse(output: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(output)
            .map_err(|e| BridgeError::Reply(format!("symbol info is not JSON: {}", e)))?;
        let Value::Object(object) = value else {
            return Err(BridgeError::Reply(
                "symbol info is not a JSON object".to_string(),
            ));
        };

        let mut kind_extensions = Vec::new();
        let mut leading: Vec<(usize, &String)> = Vec::new();
        let mut rest: Vec<&String> = Vec::new();
        for (key, value) in &object {
            if KIND_EXTENSIONS.contains(&key.as_str()) {
                if value.as_bool().unwrap_or(false) {
                    kind_extensions.push(field_title(key).to_string());
                }
            } else if let Some(rank) = LEADING_KEYS.iter().position(|k| k == key) {
                leading.push((rank, key));
            } else {
                rest.push(key);
            }
        }
        leading.sort();
        rest.sort();
        kind_extensions.sort();

        let fields = leading
            .into_iter()
            .map(|(_, key)| key)
            .chain(rest)
            .filter_map(|key| {
                let value = match &object[key] {
                    Value::String(text) => text.trim().to_string(),
                    other => other.to_string(),
                };
                // `Invalid` linkage means no information
                if key == "linkage" && value == "Invalid" {
                    return None;
                }
                Some(SymbolField {
                    key: key.clone(),
                    title: field_title(key).to_string(),
                    value,
                })
            })
            .collect();

        Ok(Self {
            fields,
            kind_extensions,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.key == key)
            .map(|field| field.value.as_str())
    }
}

/// One completion proposal, shaped for an editor popup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionItem {
    /// `<signature>\t<kind>`
    pub label: String,
    /// Text to insert; `$0` marks the final cursor position
    pub insert: String,
}

/// Parse `--synchronous-completions` output.
///
/// Each line reads `name signature... Kind`, e.g.
/// `dump String dump() CXXMethod`.
pub fn parse_completions(output: &str) -> Vec<CompletionItem> {
    output
        .lines()
        .filter_map(|line| {
            let elements: Vec<&str> = line.split_whitespace().collect();
            if elements.len() < 2 {
                if !line.trim().is_empty() {
                    tracing::debug!(line, "Skipping short completion line");
                }
                return None;
            }
            let (name, rest) = elements.split_first()?;
            let (kind, signature) = rest.split_last()?;
            Some(CompletionItem {
                label: format!("{}\t{}", signature.join(" "), kind),
                insert: format!("{}$0", name),
            })
        })
        .collect()
}
