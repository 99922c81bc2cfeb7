//! # log
//!
//! why: manage the append-only log of commands that raft replicates
//! relations: read by the role handlers, mutated only by node.rs when it applies
//! an Outcome; the durable implementation lives in raft-storage
//! what: LogEntry struct, ReadableRaftLog / RaftLog traits, InMemoryRaftLog

use crate::content::ReplicatedContent;
use crate::error::LogError;
use crate::types::{LogIndex, Term, NO_INDEX};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A single entry in the replicated log.
///
/// The index is implied by the entry's position, it is not stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The term when this entry was created
    pub term: Term,
    /// The command to be applied to the state machine
    pub content: ReplicatedContent,
}

impl LogEntry {
    /// Create a new log entry
    pub fn new(term: Term, content: ReplicatedContent) -> Self {
        Self { term, content }
    }
}

/// Read side of a replicated log.
///
/// The live range is `(prev_index, append_index]`; `prev_index` itself still
/// has a known term (the log's `prev_term`) so consistency checks against the
/// entry just before the live range keep working after pruning.
pub trait ReadableRaftLog: Send + Sync {
    /// Index of the last appended entry, or -1
    fn append_index(&self) -> LogIndex;

    /// Index just below the first live entry
    fn prev_index(&self) -> LogIndex;

    /// Term of the entry at `index`, `None` when the index is outside
    /// `[prev_index, append_index]`
    fn read_entry_term(&self, index: LogIndex) -> Result<Option<Term>, LogError>;

    /// The entry at `index`, `None` when it is not in the live range
    fn entry(&self, index: LogIndex) -> Result<Option<LogEntry>, LogError>;

    /// Up to `max` consecutive entries starting at `from`
    fn entries(&self, from: LogIndex, max: usize) -> Result<Vec<LogEntry>, LogError> {
        let mut out = Vec::new();
        let mut index = from;
        while out.len() < max && index <= self.append_index() {
            match self.entry(index)? {
                Some(entry) => out.push(entry),
                None => break,
            }
            index += 1;
        }
        Ok(out)
    }
}

/// Write side of a replicated log. Implementations are internally synchronized
/// so readers (catch-up, pruning) can share the log with the single writer.
pub trait RaftLog: ReadableRaftLog {
    /// Append entries after `append_index`, durably. Returns the new append index.
    fn append(&self, entries: &[LogEntry]) -> Result<LogIndex, LogError>;

    /// Remove the suffix starting at `from_index`
    fn truncate(&self, from_index: LogIndex) -> Result<(), LogError>;

    /// Drop history strictly below `up_to_exclusive` where the storage layout
    /// allows it. Returns the resulting `prev_index`.
    fn prune(&self, up_to_exclusive: LogIndex) -> Result<LogIndex, LogError>;

    /// Forget everything and continue as if `(index, term)` had been the last
    /// entry. Ignored unless `index` is beyond the append index.
    fn skip(&self, index: LogIndex, term: Term) -> Result<LogIndex, LogError>;
}

#[derive(Debug)]
struct MemoryLogState {
    prev_index: LogIndex,
    prev_term: Term,
    entries: Vec<LogEntry>,
}

impl MemoryLogState {
    fn append_index(&self) -> LogIndex {
        self.prev_index + self.entries.len() as LogIndex
    }

    fn position(&self, index: LogIndex) -> Option<usize> {
        if index <= self.prev_index || index > self.append_index() {
            return None;
        }
        Some((index - self.prev_index - 1) as usize)
    }
}

/// Non-durable log for tests and for members that keep no history
#[derive(Debug)]
pub struct InMemoryRaftLog {
    state: RwLock<MemoryLogState>,
}

impl Default for InMemoryRaftLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRaftLog {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryLogState {
                prev_index: NO_INDEX,
                prev_term: 0,
                entries: Vec::new(),
            }),
        }
    }
}

impl ReadableRaftLog for InMemoryRaftLog {
    fn append_index(&self) -> LogIndex {
        self.state.read().append_index()
    }

    fn prev_index(&self) -> LogIndex {
        self.state.read().prev_index
    }

    fn read_entry_term(&self, index: LogIndex) -> Result<Option<Term>, LogError> {
        let state = self.state.read();
        if index == state.prev_index {
            return Ok(Some(state.prev_term));
        }
        Ok(state.position(index).map(|pos| state.entries[pos].term))
    }

    fn entry(&self, index: LogIndex) -> Result<Option<LogEntry>, LogError> {
        let state = self.state.read();
        Ok(state.position(index).map(|pos| state.entries[pos].clone()))
    }
}

impl RaftLog for InMemoryRaftLog {
    fn append(&self, entries: &[LogEntry]) -> Result<LogIndex, LogError> {
        let mut state = self.state.write();
        state.entries.extend(entries.iter().cloned());
        Ok(state.append_index())
    }

    fn truncate(&self, from_index: LogIndex) -> Result<(), LogError> {
        let mut state = self.state.write();
        if from_index <= state.prev_index {
            return Err(LogError::InvalidTruncate {
                index: from_index,
                prev_index: state.prev_index,
                append_index: state.append_index(),
            });
        }
        if let Some(pos) = state.position(from_index) {
            state.entries.truncate(pos);
        }
        Ok(())
    }

    fn prune(&self, up_to_exclusive: LogIndex) -> Result<LogIndex, LogError> {
        let mut state = self.state.write();
        let new_prev = (up_to_exclusive - 1).min(state.append_index());
        if new_prev <= state.prev_index {
            return Ok(state.prev_index);
        }
        let pos = state.position(new_prev).unwrap_or_default();
        let new_prev_term = state.entries[pos].term;
        state.entries.drain(..=pos);
        state.prev_index = new_prev;
        state.prev_term = new_prev_term;
        Ok(new_prev)
    }

    fn skip(&self, index: LogIndex, term: Term) -> Result<LogIndex, LogError> {
        let mut state = self.state.write();
        if index > state.append_index() {
            state.entries.clear();
            state.prev_index = index;
            state.prev_term = term;
        }
        Ok(state.append_index())
    }
}
