//! In-memory term history, so term lookups never touch disk.

use raft_core::{LogError, LogIndex, Term};

/// Term of every live index, stored as runs of equal terms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terms {
    prev_index: LogIndex,
    prev_term: Term,
    /// first index of each run, ascending
    runs: Vec<(LogIndex, Term)>,
    append_index: LogIndex,
}

impl Terms {
    pub fn new(prev_index: LogIndex, prev_term: Term) -> Self {
        Self {
            prev_index,
            prev_term,
            runs: Vec::new(),
            append_index: prev_index,
        }
    }

    pub fn append_index(&self) -> LogIndex {
        self.append_index
    }

    /// Term of the newest entry, or of `prev_index` when there is none
    pub fn latest(&self) -> Term {
        self.runs.last().map_or(self.prev_term, |(_, term)| *term)
    }

    /// Record `term` for `index`, which must directly follow the last one.
    /// Terms never decrease along the log.
    pub fn append(&mut self, index: LogIndex, term: Term) -> Result<(), LogError> {
        if index != self.append_index + 1 {
            return Err(LogError::damaged(format!(
                "term history expects index {} but got {index}",
                self.append_index + 1
            )));
        }
        if term < self.latest() {
            return Err(LogError::damaged(format!(
                "term {term} at index {index} is lower than the preceding {}",
                self.latest()
            )));
        }
        if self.runs.last().map(|(_, t)| *t) != Some(term) {
            self.runs.push((index, term));
        }
        self.append_index = index;
        Ok(())
    }

    pub fn get(&self, index: LogIndex) -> Option<Term> {
        if index == self.prev_index {
            return Some(self.prev_term);
        }
        if index < self.prev_index || index > self.append_index {
            return None;
        }
        let position = self.runs.partition_point(|(first, _)| *first <= index);
        position.checked_sub(1).map(|p| self.runs[p].1)
    }

    /// Forget `from_index` and everything after it
    pub fn truncate(&mut self, from_index: LogIndex) {
        if from_index > self.append_index {
            return;
        }
        let from_index = from_index.max(self.prev_index + 1);
        self.runs.retain(|(first, _)| *first < from_index);
        self.append_index = from_index - 1;
    }

    /// Make `new_prev_index` the new floor of the history
    pub fn prune(&mut self, new_prev_index: LogIndex) {
        if new_prev_index <= self.prev_index || new_prev_index > self.append_index {
            return;
        }
        self.prev_term = self.get(new_prev_index).unwrap_or(self.prev_term);
        self.prev_index = new_prev_index;

        let first_kept = new_prev_index + 1;
        let covering = self.runs.partition_point(|(first, _)| *first <= first_kept);
        if covering > 0 {
            let term = self.runs[covering - 1].1;
            self.runs.drain(..covering);
            if first_kept <= self.append_index {
                self.runs.insert(0, (first_kept, term));
            }
        }
    }
}
