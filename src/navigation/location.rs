use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::Result;

static LOCATION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+):(\d+):(\d+):(.*)$").expect("location pattern is valid")
});

/// One `file:line:col:usage` line from a location query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub usage: String,
}

impl Location {
    pub fn parse(line: &str) -> Option<Self> {
        let caps = LOCATION_LINE.captures(line.trim_end())?;
        Some(Self {
            file: caps[1].to_string(),
            line: caps[2].parse().ok()?,
            column: caps[3].parse().ok()?,
            usage: caps[4].trim().to_string(),
        })
    }

    /// Last path component, for compact listings.
    pub fn short_name(&self) -> &str {
        self.file.rsplit('/').next().unwrap_or(&self.file)
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Sorted results of a location query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LocationList {
    pub locations: Vec<Location>,
    /// First result on the cursor's line, preselected in a picker
    pub preferred: Option<usize>,
}

impl LocationList {
    /// Parse query output. `cursor_line` is the one-based line the query
    /// was issued from.
    pub fn parse(output: &str, cursor_line: u32) -> Self {
        let mut locations: Vec<Location> = output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let parsed = Location::parse(line);
                if parsed.is_none() {
                    tracing::debug!(line, "Skipping unrecognized location line");
                }
                parsed
            })
            .collect();

        locations.sort_by(|a, b| {
            (a.file.as_str(), a.line, a.column).cmp(&(b.file.as_str(), b.line, b.column))
        });

        let preferred = locations.iter().position(|l| l.line == cursor_line);
        Self {
            locations,
            preferred,
        }
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// The single result, when there is nothing to choose from.
    pub fn unique(&self) -> Option<&Location> {
        match self.locations.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

/// Occurrences to rewrite for a symbol rename, grouped per file and line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenamePlan {
    /// file → one-based line → one-based byte columns
    pub mutations: BTreeMap<String, BTreeMap<u32, Vec<u32>>>,
}

impl RenamePlan {
    pub fn from_locations<'a>(locations: impl IntoIterator<Item = &'a Location>) -> Self {
        let mut mutations: BTreeMap<String, BTreeMap<u32, Vec<u32>>> = BTreeMap::new();
        for location in locations {
            mutations
                .entry(location.file.clone())
                .or_default()
                .entry(location.line)
                .or_default()
                .push(location.column);
        }
        Self { mutations }
    }

    pub fn file_count(&self) -> usize {
        self.mutations.len()
    }

    pub fn occurrence_count(&self) -> usize {
        self.mutations
            .values()
            .flat_map(|lines| lines.values())
            .map(Vec::len)
            .sum()
    }

    /// Replace `old` with `new` at the planned positions of `file` in `text`.
    ///
    /// Positions where `old` does not actually occur are left untouched.
    /// Returns the rewritten text and the number of replacements made.
    pub fn apply_to_text(&self, file: &str, text: &str, old: &str, new: &str) -> (String, usize) {
        let Some(lines) = self.mutations.get(file) else {
            return (text.to_string(), 0);
        };

        let mut replaced = 0;
        let mut out = String::with_capacity(text.len());
        for (index, line) in text.split_inclusive('\n').enumerate() {
            let Some(columns) = u32::try_from(index + 1).ok().and_then(|n| lines.get(&n)) else {
                out.push_str(line);
                continue;
            };

            let mut rewritten = line.to_string();
            let mut columns = columns.clone();
            columns.sort_unstable();
            columns.dedup();
            // Right to left, so earlier columns stay valid.
            for column in columns.into_iter().rev() {
                let start = column.saturating_sub(1) as usize;
                let matches = rewritten
                    .get(start..)
                    .is_some_and(|rest| rest.starts_with(old));
                if matches {
                    rewritten.replace_range(start..start + old.len(), new);
                    replaced += 1;
                } else {
                    tracing::warn!(file, line = index + 1, column, old, "Occurrence not found, skipping");
                }
            }
            out.push_str(&rewritten);
        }
        (out, replaced)
    }

    /// Rewrite every planned file on disk. Returns the total replacement count.
    pub async fn apply(&self, old: &str, new: &str) -> Result<usize> {
        let mut total = 0;
        for file in self.mutations.keys() {
            let text = tokio::fs::read_to_string(Path::new(file)).await?;
            let (rewritten, count) = self.apply_to_text(file, &text, old, new);
            if count > 0 {
                tokio::fs::write(Path::new(file), rewritten).await?;
            }
            tracing::info!(file = %file, replacements = count, "Renamed occurrences");
            total += count;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_location_line() {
        let loc = Location::parse("/src/main.cpp:12:5:    foo(bar);").unwrap();
        assert_eq!(loc.file, "/src/main.cpp");
        assert_eq!(loc.line, 12);
        assert_eq!(loc.column, 5);
        assert_eq!(loc.usage, "foo(bar);");
        assert_eq!(loc.short_name(), "main.cpp");
        assert_eq!(loc.to_string(), "/src/main.cpp:12:5");
    }

    #[test]
    fn rejects_non_location_lines() {
        assert!(Location::parse("Can't seem to connect to server").is_none());
        assert!(Location::parse("/src/a.cpp:x:1:").is_none());
    }

    #[test]
    fn sorts_and_prefers_cursor_line() {
        let list = LocationList::parse(
            "/src/b.cpp:3:1:b\n/src/a.cpp:9:2:second\n/src/a.cpp:9:1:first\n/src/a.cpp:1:1:top\n",
            9,
        );
        let order: Vec<String> = list.locations.iter().map(|l| l.to_string()).collect();
        assert_eq!(
            order,
            vec!["/src/a.cpp:1:1", "/src/a.cpp:9:1", "/src/a.cpp:9:2", "/src/b.cpp:3:1"]
        );
        assert_eq!(list.preferred, Some(1));
        assert!(list.unique().is_none());
    }

    #[test]
    fn no_preferred_when_cursor_line_absent() {
        let list = LocationList::parse("/src/a.cpp:4:1:x\n", 7);
        assert_eq!(list.preferred, None);
        assert_eq!(list.unique().map(|l| l.line), Some(4));
    }

    #[test]
    fn rename_plan_groups_by_file_and_line() {
        let list = LocationList::parse(
            "/src/a.cpp:1:5:\n/src/a.cpp:1:12:\n/src/a.cpp:3:1:\n/src/b.cpp:2:2:\n",
            1,
        );
        let plan = RenamePlan::from_locations(&list.locations);
        assert_eq!(plan.file_count(), 2);
        assert_eq!(plan.occurrence_count(), 4);
        assert_eq!(plan.mutations["/src/a.cpp"][&1], vec![5, 12]);
    }

    #[test]
    fn rename_rewrites_right_to_left() {
        let list = LocationList::parse("a.cpp:1:5:\na.cpp:1:12:\na.cpp:2:1:\n", 1);
        let plan = RenamePlan::from_locations(&list.locations);
        let text = "int foo = foo + 1;\nfoo();\nbar();\n";
        let (out, count) = plan.apply_to_text("a.cpp", text, "foo", "value");
        // Column 12 does not hold `foo` (it starts at 11), so only two match.
        assert_eq!(count, 2);
        assert_eq!(out, "int value = foo + 1;\nvalue();\nbar();\n");
    }

    #[test]
    fn rename_skips_unplanned_files() {
        let plan = RenamePlan::default();
        let (out, count) = plan.apply_to_text("x.cpp", "foo", "foo", "bar");
        assert_eq!(out, "foo");
        assert_eq!(count, 0);
    }
}
