use std::collections::VecDeque;

use serde::Serialize;

/// A position jumped away from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl HistoryEntry {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

/// Bounded stack of jump origins; the oldest entry is evicted when full.
#[derive(Debug, Clone)]
pub struct JumpHistory {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
}

impl JumpHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit),
            limit,
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.limit == 0 {
            return;
        }
        if self.entries.len() == self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Most recent entry.
    pub fn pop(&mut self) -> Option<HistoryEntry> {
        self.entries.pop_back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Jump back to the entry at `index` (oldest first): drops it and
    /// everything newer, returning it.
    pub fn truncate_to(&mut self, index: usize) -> Option<HistoryEntry> {
        if index >= self.entries.len() {
            return None;
        }
        let entry = self.entries.get(index).cloned();
        self.entries.truncate(index);
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(line: u32) -> HistoryEntry {
        HistoryEntry::new("/src/a.cpp", line, 1)
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut history = JumpHistory::new(2);
        history.push(entry(1));
        history.push(entry(2));
        history.push(entry(3));
        assert_eq!(history.len(), 2);
        let lines: Vec<u32> = history.entries().map(|e| e.line).collect();
        assert_eq!(lines, vec![2, 3]);
    }

    #[test]
    fn pop_returns_most_recent() {
        let mut history = JumpHistory::new(10);
        history.push(entry(1));
        history.push(entry(2));
        assert_eq!(history.pop(), Some(entry(2)));
        assert_eq!(history.pop(), Some(entry(1)));
        assert_eq!(history.pop(), None);
    }

    #[test]
    fn truncate_to_drops_selected_and_newer() {
        let mut history = JumpHistory::new(10);
        for line in 1..=4 {
            history.push(entry(line));
        }
        assert_eq!(history.truncate_to(1), Some(entry(2)));
        assert_eq!(history.len(), 1);
        assert_eq!(history.truncate_to(5), None);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn zero_limit_keeps_nothing() {
        let mut history = JumpHistory::new(0);
        history.push(entry(1));
        assert!(history.is_empty());
    }
}
