use serde::{Deserialize, Serialize};

use crate::jobs::Job;

/// Kind of a replicated entry. `CloseJob` is reserved for a future
/// worker-completion path and is never constructed today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    OpenJob,
    CloseJob,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::OpenJob => write!(f, "OpenJob"),
            EntryKind::CloseJob => write!(f, "CloseJob"),
        }
    }
}

/// A single entry in the replicated log, carrying a job assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub kind: EntryKind,
    /// Term in which the then-current leader accepted the entry.
    pub term: u64,
    /// Worker chosen by the leader when the entry was appended.
    pub worker_id: u64,
    pub job: Job,
}

impl LogEntry {
    pub fn open(job: Job) -> Self {
        Self {
            kind: EntryKind::OpenJob,
            term: 0,
            worker_id: 0,
            job,
        }
    }
}

/// Per-replica ordered log, indexed from 1. Indices form a dense `1..=len`
/// sequence at all times.
#[derive(Debug, Clone, Default)]
pub struct Log {
    entries: Vec<LogEntry>,
}

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest index in the log, 0 when empty.
    pub fn last_index(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Term of the entry at `index`, or 0 when out of range (including 0).
    pub fn term_at(&self, index: u64) -> u64 {
        if index < 1 || index > self.last_index() {
            return 0;
        }
        self.entries[(index - 1) as usize].term
    }

    pub fn entry(&self, index: u64) -> Option<&LogEntry> {
        if index < 1 {
            return None;
        }
        self.entries.get((index - 1) as usize)
    }

    /// Append at `last_index + 1`, returning the new index.
    pub fn append(&mut self, entry: LogEntry) -> u64 {
        self.entries.push(entry);
        self.last_index()
    }

    /// Write `entry` at `index`, overwriting an existing entry or extending
    /// the log by exactly one slot.
    ///
    /// # Panics
    ///
    /// Panics if `index` would leave a hole (`index > last_index + 1` or 0).
    pub fn put(&mut self, index: u64, entry: LogEntry) {
        assert!(
            index >= 1 && index <= self.last_index() + 1,
            "log write at {} would break dense indexing (len {})",
            index,
            self.last_index()
        );
        if index == self.last_index() + 1 {
            self.entries.push(entry);
        } else {
            self.entries[(index - 1) as usize] = entry;
        }
    }

    /// Entries in `lo..=hi`; empty when the range is empty or out of bounds.
    pub fn range(&self, lo: u64, hi: u64) -> Vec<LogEntry> {
        if lo < 1 || lo > hi || lo > self.last_index() {
            return Vec::new();
        }
        let hi = hi.min(self.last_index());
        self.entries[(lo - 1) as usize..hi as usize].to_vec()
    }

    /// Remove every entry with index greater than `index`.
    pub fn truncate_after(&mut self, index: u64) {
        self.entries.truncate(index as usize);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }
}
