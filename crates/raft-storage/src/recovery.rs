//! # recovery
//!
//! why: after a crash the log directory is the only truth; rebuild the live
//! range and term history from it and refuse to continue if it is inconsistent
//! relations: called by SegmentedRaftLog::open, uses segment.rs and terms.rs
//! what: State, Recovered, recover

use crate::segment::{self, Scan, Segment, SegmentHeader};
use crate::terms::Terms;
use raft_core::{LogError, LogIndex, Term, NO_INDEX};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// Live range of the log as found on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State {
    pub prev_index: LogIndex,
    pub prev_term: Term,
    pub append_index: LogIndex,
}

impl State {
    fn empty() -> Self {
        Self {
            prev_index: NO_INDEX,
            prev_term: 0,
            append_index: NO_INDEX,
        }
    }
}

#[derive(Debug)]
pub struct Recovered {
    pub state: State,
    pub terms: Terms,
    /// ascending by version; the last one is where appends go
    pub segments: Vec<Segment>,
}

fn segment_files(directory: &Path) -> Result<Vec<(u64, PathBuf)>, LogError> {
    let mut files = Vec::new();
    for dir_entry in fs::read_dir(directory)? {
        let dir_entry = dir_entry?;
        let name = dir_entry.file_name();
        if let Some(version) = name.to_str().and_then(segment::parse_version) {
            files.push((version, dir_entry.path()));
        }
    }
    files.sort_by_key(|(version, _)| *version);
    Ok(files)
}

/// Scan every segment in `directory`, cutting off a torn final record.
/// An empty directory gets a first segment.
pub fn recover(directory: &Path) -> Result<Recovered, LogError> {
    fs::create_dir_all(directory)?;
    let mut files = segment_files(directory)?;

    // a crash while creating the newest segment leaves a file without a full header
    if let Some((version, path)) = files.last() {
        if matches!(segment::scan(path)?, Scan::TornHeader) {
            tracing::warn!(version, path = %path.display(), "removing segment with torn header");
            fs::remove_file(path)?;
            files.pop();
        }
    }

    if files.is_empty() {
        let header = SegmentHeader {
            version: 0,
            prev_index: NO_INDEX,
            prev_term: 0,
        };
        let (segment, _) = segment::create(directory, header)?;
        tracing::info!(directory = %directory.display(), "created new raft log");
        return Ok(Recovered {
            state: State::empty(),
            terms: Terms::new(NO_INDEX, 0),
            segments: vec![segment],
        });
    }

    let mut state = State::empty();
    let mut terms = Terms::new(NO_INDEX, 0);
    let mut segments = Vec::with_capacity(files.len());
    let last = files.len() - 1;

    for (position, (version, path)) in files.into_iter().enumerate() {
        let (header, entries, valid_len, tail) = match segment::scan(&path)? {
            Scan::TornHeader => {
                return Err(LogError::damaged(format!(
                    "segment {} has a torn header but is not the newest",
                    path.display()
                )))
            }
            Scan::Segment {
                header,
                entries,
                valid_len,
                tail,
            } => (header, entries, valid_len, tail),
        };

        if header.version != version {
            return Err(LogError::damaged(format!(
                "{} claims version {}",
                path.display(),
                header.version
            )));
        }

        if position == 0 || header.prev_index > state.append_index {
            // first segment, or a skip over history we never had
            if position > 0 {
                tracing::info!(
                    version,
                    prev_index = header.prev_index,
                    append_index = state.append_index,
                    "segment skips ahead"
                );
            }
            state = State {
                prev_index: header.prev_index,
                prev_term: header.prev_term,
                append_index: header.prev_index,
            };
            terms = Terms::new(header.prev_index, header.prev_term);
        } else if header.prev_index < state.append_index {
            return Err(LogError::damaged(format!(
                "segment {version} starts after {} but the log already reaches {}",
                header.prev_index, state.append_index
            )));
        } else if terms.get(header.prev_index) != Some(header.prev_term) {
            return Err(LogError::damaged(format!(
                "segment {version} expects term {} at {} but history has {:?}",
                header.prev_term,
                header.prev_index,
                terms.get(header.prev_index)
            )));
        }

        let mut offsets = Vec::with_capacity(entries.len());
        for (offset, term) in entries {
            let index = state.append_index + 1;
            terms.append(index, term)?;
            state.append_index = index;
            offsets.push(offset);
        }

        let size = match tail {
            Some(reason) if position == last => {
                tracing::warn!(
                    version,
                    reason = %reason,
                    valid_len,
                    "cutting torn tail off the newest segment"
                );
                let file = OpenOptions::new().write(true).open(&path)?;
                file.set_len(valid_len)?;
                file.sync_all()?;
                valid_len
            }
            Some(reason) => {
                return Err(LogError::damaged(format!(
                    "segment {version} is not the newest but ends badly: {reason}"
                )))
            }
            None => valid_len,
        };

        segments.push(Segment {
            header,
            path,
            offsets,
            size,
        });
    }

    tracing::info!(
        segments = segments.len(),
        prev_index = state.prev_index,
        append_index = state.append_index,
        "recovered raft log"
    );

    Ok(Recovered {
        state,
        terms,
        segments,
    })
}
