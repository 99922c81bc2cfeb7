//! # segmented
//!
//! why: the durable replicated log; appends are fsynced before they are
//! acknowledged, history lives in rotating segment files that pruning can
//! delete whole
//! relations: implements raft_core::RaftLog, built from recovery.rs, writes
//! through segment.rs, keeps terms.rs current, asks pruning.rs what to keep
//! what: SegmentedRaftLog

use crate::config::LogConfig;
use crate::pruning::{PruningStrategy, SegmentStats};
use crate::recovery::{self, State};
use crate::segment::{self, Segment, SegmentHeader};
use crate::terms::Terms;
use bytes::BytesMut;
use parking_lot::Mutex;
use raft_core::{LogEntry, LogError, LogIndex, RaftLog, ReadableRaftLog, Term};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

struct Inner {
    directory: PathBuf,
    rotation_size: u64,
    rotation_entries: Option<u64>,
    strategy: PruningStrategy,
    segments: Vec<Segment>,
    writer: File,
    state: State,
    terms: Terms,
    /// set on the first failed write or unreadable record; never cleared
    damaged: Option<String>,
}

/// Segment-file backed [`RaftLog`].
///
/// Once damaged, every operation fails with [`LogError::Damaged`] until the
/// member is restarted and the log recovered or replaced.
pub struct SegmentedRaftLog {
    inner: Mutex<Inner>,
    prune_guard: Mutex<()>,
}

impl std::fmt::Debug for SegmentedRaftLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SegmentedRaftLog")
            .field("directory", &inner.directory)
            .field("state", &inner.state)
            .field("segments", &inner.segments.len())
            .field("damaged", &inner.damaged)
            .finish()
    }
}

impl SegmentedRaftLog {
    /// Recover the log in `config.directory`, creating it if needed
    pub fn open(config: &LogConfig) -> Result<Self, LogError> {
        let strategy = config
            .strategy()
            .map_err(|e| LogError::Io(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        let recovered = recovery::recover(&config.directory)?;

        let active = recovered
            .segments
            .last()
            .ok_or_else(|| LogError::damaged("recovery produced no segments"))?;
        let writer = segment::open_for_append(&active.path)?;

        Ok(Self {
            inner: Mutex::new(Inner {
                directory: config.directory.clone(),
                rotation_size: config.rotation_size,
                rotation_entries: config.rotation_entries,
                strategy,
                segments: recovered.segments,
                writer,
                state: recovered.state,
                terms: recovered.terms,
                damaged: None,
            }),
            prune_guard: Mutex::new(()),
        })
    }

    /// Live range as it stands
    pub fn state(&self) -> State {
        self.inner.lock().state
    }

    pub fn segment_count(&self) -> usize {
        self.inner.lock().segments.len()
    }

    pub fn directory(&self) -> PathBuf {
        self.inner.lock().directory.clone()
    }

    pub fn is_damaged(&self) -> bool {
        self.inner.lock().damaged.is_some()
    }
}

impl Inner {
    fn check(&self) -> Result<(), LogError> {
        match &self.damaged {
            Some(reason) => Err(LogError::damaged(reason.clone())),
            None => Ok(()),
        }
    }

    /// Record damage; the log refuses all further work
    fn damage(&mut self, reason: String) -> LogError {
        tracing::error!(directory = %self.directory.display(), reason = %reason, "raft log damaged");
        self.damaged = Some(reason.clone());
        LogError::Damaged(reason)
    }

    fn active(&self) -> Result<&Segment, LogError> {
        self.segments
            .last()
            .ok_or_else(|| LogError::damaged("no active segment"))
    }

    fn active_mut(&mut self) -> Result<&mut Segment, LogError> {
        self.segments
            .last_mut()
            .ok_or_else(|| LogError::damaged("no active segment"))
    }

    fn segment_for(&self, index: LogIndex) -> Option<&Segment> {
        self.segments.iter().rev().find(|s| s.contains(index))
    }

    fn live(&self, index: LogIndex) -> bool {
        index > self.state.prev_index && index <= self.state.append_index
    }

    fn needs_rotation(&self) -> Result<bool, LogError> {
        let active = self.active()?;
        let by_entries = self
            .rotation_entries
            .is_some_and(|limit| active.entry_count() >= limit);
        Ok(active.size >= self.rotation_size || by_entries)
    }

    /// Close the active segment and continue in a new one starting after
    /// `(prev_index, prev_term)`
    fn start_segment(&mut self, prev_index: LogIndex, prev_term: Term) -> Result<(), LogError> {
        let header = SegmentHeader {
            version: self.active()?.header.version + 1,
            prev_index,
            prev_term,
        };
        let (segment, writer) = match segment::create(&self.directory, header) {
            Ok(created) => created,
            Err(e) => return Err(self.damage(format!("creating segment {}: {e}", header.version))),
        };
        tracing::info!(version = header.version, prev_index, "started new log segment");
        self.segments.push(segment);
        self.writer = writer;
        Ok(())
    }

    fn append(&mut self, entries: &[LogEntry]) -> Result<LogIndex, LogError> {
        self.check()?;
        if entries.is_empty() {
            return Ok(self.state.append_index);
        }

        // validate against the term history before touching the file
        let mut terms = self.terms.clone();
        for (offset, entry) in entries.iter().enumerate() {
            terms.append(self.state.append_index + 1 + offset as LogIndex, entry.term)?;
        }

        let start = self.active()?.size;
        let mut buf = BytesMut::new();
        let mut offsets = Vec::with_capacity(entries.len());
        for entry in entries {
            offsets.push(start + buf.len() as u64);
            segment::encode_record(entry, &mut buf);
        }

        let written = self
            .writer
            .write_all(&buf)
            .and_then(|_| self.writer.sync_data());
        if let Err(e) = written {
            return Err(self.damage(format!("appending {} entries: {e}", entries.len())));
        }

        let active = self.active_mut()?;
        active.offsets.extend(offsets);
        active.size += buf.len() as u64;
        self.terms = terms;
        self.state.append_index += entries.len() as LogIndex;

        if self.needs_rotation()? {
            let prev_term = self.terms.latest();
            self.start_segment(self.state.append_index, prev_term)?;
        }
        Ok(self.state.append_index)
    }

    fn truncate(&mut self, from_index: LogIndex) -> Result<(), LogError> {
        self.check()?;
        if from_index <= self.state.prev_index {
            return Err(LogError::InvalidTruncate {
                index: from_index,
                prev_index: self.state.prev_index,
                append_index: self.state.append_index,
            });
        }
        if from_index > self.state.append_index {
            return Ok(());
        }

        let Some(position) = self.segments.iter().rposition(|s| s.contains(from_index)) else {
            return Err(self.damage(format!("no segment holds live index {from_index}")));
        };

        // newest first, so a crash part way leaves a contiguous prefix
        while self.segments.len() > position + 1 {
            let Some(newer) = self.segments.pop() else { break };
            if let Err(e) = fs::remove_file(&newer.path) {
                return Err(self.damage(format!("removing {}: {e}", newer.path.display())));
            }
        }

        let target = &mut self.segments[position];
        let keep = (from_index - target.header.prev_index - 1) as usize;
        let cut_at = target.offsets[keep];
        let path = target.path.clone();
        let cut = OpenOptions::new()
            .write(true)
            .open(&path)
            .and_then(|file| file.set_len(cut_at).and_then(|_| file.sync_all()))
            .and_then(|_| segment::open_for_append(&path));
        let writer = match cut {
            Ok(writer) => writer,
            Err(e) => return Err(self.damage(format!("truncating {}: {e}", path.display()))),
        };

        let target = &mut self.segments[position];
        target.offsets.truncate(keep);
        target.size = cut_at;
        self.writer = writer;
        self.terms.truncate(from_index);
        self.state.append_index = from_index - 1;

        tracing::info!(from_index, version = self.segments[position].header.version, "truncated log");
        Ok(())
    }

    fn prune(&mut self, up_to_exclusive: LogIndex) -> Result<LogIndex, LogError> {
        self.check()?;

        // a segment may go when everything in it sits below the limit
        let safe = self
            .segments
            .windows(2)
            .take_while(|pair| pair[1].header.prev_index < up_to_exclusive)
            .count();
        let stats: Vec<SegmentStats> = self
            .segments
            .iter()
            .map(|s| SegmentStats {
                entries: s.entry_count(),
                bytes: s.size,
            })
            .collect();
        let removable = safe.min(self.strategy.removable_segments(&stats));
        if removable == 0 {
            return Ok(self.state.prev_index);
        }

        let removed: Vec<Segment> = self.segments.drain(..removable).collect();
        for old in &removed {
            if let Err(e) = fs::remove_file(&old.path) {
                return Err(self.damage(format!("removing {}: {e}", old.path.display())));
            }
        }

        let first = &self.segments[0].header;
        if first.prev_index > self.state.prev_index {
            self.state.prev_index = first.prev_index;
            self.state.prev_term = first.prev_term;
            self.terms.prune(first.prev_index);
        }

        let versions: Vec<u64> = removed.iter().map(|s| s.header.version).collect();
        tracing::info!(
            strategy = %self.strategy,
            up_to_exclusive,
            removed_versions = ?versions,
            removed_entries = removed.iter().map(Segment::entry_count).sum::<u64>(),
            prev_index = self.state.prev_index,
            "pruned log segments"
        );
        Ok(self.state.prev_index)
    }

    fn skip(&mut self, index: LogIndex, term: Term) -> Result<LogIndex, LogError> {
        self.check()?;
        if index <= self.state.append_index {
            return Ok(self.state.append_index);
        }
        self.start_segment(index, term)?;
        self.state = State {
            prev_index: index,
            prev_term: term,
            append_index: index,
        };
        self.terms = Terms::new(index, term);
        tracing::info!(index, term, "skipped log ahead");
        Ok(index)
    }

    fn entry(&mut self, index: LogIndex) -> Result<Option<LogEntry>, LogError> {
        self.check()?;
        if !self.live(index) {
            return Ok(None);
        }
        let read = match self.segment_for(index) {
            Some(segment) => segment.read(index),
            None => Err(LogError::damaged(format!("no segment holds live index {index}"))),
        };
        match read {
            Err(LogError::Damaged(reason)) => Err(self.damage(reason)),
            other => other,
        }
    }
}

impl ReadableRaftLog for SegmentedRaftLog {
    fn append_index(&self) -> LogIndex {
        self.inner.lock().state.append_index
    }

    fn prev_index(&self) -> LogIndex {
        self.inner.lock().state.prev_index
    }

    fn read_entry_term(&self, index: LogIndex) -> Result<Option<Term>, LogError> {
        let inner = self.inner.lock();
        inner.check()?;
        Ok(inner.terms.get(index))
    }

    fn entry(&self, index: LogIndex) -> Result<Option<LogEntry>, LogError> {
        self.inner.lock().entry(index)
    }
}

impl RaftLog for SegmentedRaftLog {
    fn append(&self, entries: &[LogEntry]) -> Result<LogIndex, LogError> {
        self.inner.lock().append(entries)
    }

    fn truncate(&self, from_index: LogIndex) -> Result<(), LogError> {
        self.inner.lock().truncate(from_index)
    }

    /// Only one prune runs at a time; a concurrent call returns the current
    /// `prev_index` without waiting.
    fn prune(&self, up_to_exclusive: LogIndex) -> Result<LogIndex, LogError> {
        let Some(_running) = self.prune_guard.try_lock() else {
            tracing::debug!(up_to_exclusive, "prune already running, skipping");
            return Ok(self.prev_index());
        };
        self.inner.lock().prune(up_to_exclusive)
    }

    fn skip(&self, index: LogIndex, term: Term) -> Result<LogIndex, LogError> {
        self.inner.lock().skip(index, term)
    }
}

/// Path of the segment with `version` under `directory`
pub fn segment_path(directory: &Path, version: u64) -> PathBuf {
    directory.join(segment::file_name(version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use raft_core::ReplicatedContent;
    use tempfile::tempdir;

    fn entry(term: Term) -> LogEntry {
        LogEntry::new(term, ReplicatedContent::Transaction(vec![term as u8; 16]))
    }

    #[test]
    fn concurrent_prune_is_skipped() {
        let dir = tempdir().unwrap();
        let mut config = LogConfig::new(dir.path());
        config.rotation_entries = Some(2);
        config.pruning_strategy = "keep_none".into();
        let log = SegmentedRaftLog::open(&config).unwrap();
        log.append(&[entry(1), entry(1), entry(1), entry(1)]).unwrap();

        let held = log.prune_guard.lock();
        assert_eq!(log.prune(4).unwrap(), -1);
        drop(held);

        assert_eq!(log.prune(4).unwrap(), 3);
    }

    #[test]
    fn failed_read_marks_log_damaged() {
        let dir = tempdir().unwrap();
        let log = SegmentedRaftLog::open(&LogConfig::new(dir.path())).unwrap();
        log.append(&[entry(1), entry(1)]).unwrap();

        // clobber the record bodies behind the log's back
        let path = segment_path(dir.path(), 0);
        let mut bytes = fs::read(&path).unwrap();
        let len = bytes.len();
        for byte in &mut bytes[len - 8..] {
            *byte ^= 0xff;
        }
        fs::write(&path, bytes).unwrap();

        assert!(log.entry(1).unwrap_err().is_damaged());
        assert!(log.is_damaged());
        assert!(log.append(&[entry(1)]).unwrap_err().is_damaged());
        assert!(log.read_entry_term(0).unwrap_err().is_damaged());
    }
}
