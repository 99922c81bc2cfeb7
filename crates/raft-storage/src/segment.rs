//! # segment
//!
//! why: the on-disk unit of the replicated log; everything that knows about
//! byte layout lives here so the log itself only deals in indices
//! relations: scanned by recovery.rs, written and read by segmented.rs
//! what: SegmentHeader, record encoding with crc32, Segment bookkeeping, scanning

use bytes::{Buf, BufMut, BytesMut};
use raft_core::{LogEntry, LogError, LogIndex, ReplicatedContent, Term};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const SEGMENT_PREFIX: &str = "raft.log.";

const MAGIC: u32 = 0x524c_4f47;

/// magic, version, prev_index, prev_term
pub const HEADER_SIZE: u64 = 4 + 8 + 8 + 8;

/// length, length checksum and body checksum in front of every record body
const RECORD_PREFIX: usize = 4 + 4 + 4;

/// First bytes of every segment file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub version: u64,
    pub prev_index: LogIndex,
    pub prev_term: Term,
}

impl SegmentHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(MAGIC);
        buf.put_u64(self.version);
        buf.put_i64(self.prev_index);
        buf.put_u64(self.prev_term);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, LogError> {
        if buf.remaining() < HEADER_SIZE as usize {
            return Err(LogError::damaged("segment header is incomplete"));
        }
        let magic = buf.get_u32();
        if magic != MAGIC {
            return Err(LogError::damaged(format!("bad segment magic {magic:#x}")));
        }
        Ok(Self {
            version: buf.get_u64(),
            prev_index: buf.get_i64(),
            prev_term: buf.get_u64(),
        })
    }
}

pub fn file_name(version: u64) -> String {
    format!("{SEGMENT_PREFIX}{version}")
}

/// Version encoded in a segment file name, `None` for unrelated files
pub fn parse_version(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?.parse().ok()
}

/// `[len u32][crc32 of len u32][crc32 u32][term u64][content]`, the second
/// crc over term and content
pub fn encode_record(entry: &LogEntry, buf: &mut BytesMut) {
    let mut body = BytesMut::with_capacity(8 + entry.content.marshalled_size());
    body.put_u64(entry.term);
    entry.content.marshal(&mut body);

    let len = (body.len() as u32).to_be_bytes();
    buf.put_slice(&len);
    buf.put_u32(crc32fast::hash(&len));
    buf.put_u32(crc32fast::hash(&body));
    buf.extend_from_slice(&body);
}

/// What sits at some position of a segment
#[derive(Debug)]
pub enum RecordRead {
    Complete { entry: LogEntry, len: usize },
    /// Fewer bytes than the record claims
    Incomplete,
    /// The length field fails its own checksum, so nothing after it can be
    /// located
    BadLength,
    /// A full-length record that does not check out
    Corrupt { reason: String, len: usize },
}

pub fn decode_record(bytes: &[u8]) -> RecordRead {
    if bytes.len() < RECORD_PREFIX {
        return RecordRead::Incomplete;
    }
    let mut prefix = &bytes[..RECORD_PREFIX];
    let body_len = prefix.get_u32();
    if crc32fast::hash(&body_len.to_be_bytes()) != prefix.get_u32() {
        return RecordRead::BadLength;
    }
    let body_len = body_len as usize;
    let crc = prefix.get_u32();
    let len = RECORD_PREFIX + body_len;
    if bytes.len() < len {
        return RecordRead::Incomplete;
    }

    let body = &bytes[RECORD_PREFIX..len];
    if crc32fast::hash(body) != crc {
        return RecordRead::Corrupt {
            reason: "checksum mismatch".into(),
            len,
        };
    }
    if body.len() < 8 {
        return RecordRead::Corrupt {
            reason: format!("record body of {} bytes has no term", body.len()),
            len,
        };
    }

    let mut body = body;
    let term = body.get_u64();
    match ReplicatedContent::unmarshal(&mut body) {
        Ok(content) if !body.has_remaining() => RecordRead::Complete {
            entry: LogEntry::new(term, content),
            len,
        },
        Ok(_) => RecordRead::Corrupt {
            reason: format!("{} trailing bytes after content", body.remaining()),
            len,
        },
        Err(e) => RecordRead::Corrupt {
            reason: e.to_string(),
            len,
        },
    }
}

/// A segment file and where its records start
#[derive(Debug)]
pub struct Segment {
    pub header: SegmentHeader,
    pub path: PathBuf,
    /// file offset of each record, in index order
    pub offsets: Vec<u64>,
    /// current file length including the header
    pub size: u64,
}

impl Segment {
    pub fn entry_count(&self) -> u64 {
        self.offsets.len() as u64
    }

    /// Index of the last record, `prev_index` when empty
    pub fn last_index(&self) -> LogIndex {
        self.header.prev_index + self.offsets.len() as LogIndex
    }

    pub fn contains(&self, index: LogIndex) -> bool {
        index > self.header.prev_index && index <= self.last_index()
    }

    /// Read back the record at `index`, verifying it
    pub fn read(&self, index: LogIndex) -> Result<Option<LogEntry>, LogError> {
        if !self.contains(index) {
            return Ok(None);
        }
        let position = (index - self.header.prev_index - 1) as usize;
        let start = self.offsets[position];
        let end = self.offsets.get(position + 1).copied().unwrap_or(self.size);

        let mut bytes = vec![0u8; (end - start) as usize];
        let mut file = File::open(&self.path).map_err(|e| read_failure(&self.path, e))?;
        file.seek(SeekFrom::Start(start))
            .and_then(|_| file.read_exact(&mut bytes))
            .map_err(|e| read_failure(&self.path, e))?;

        match decode_record(&bytes) {
            RecordRead::Complete { entry, .. } => Ok(Some(entry)),
            RecordRead::Incomplete => Err(LogError::damaged(format!(
                "record {index} in {} is cut short",
                self.path.display()
            ))),
            RecordRead::Corrupt { reason, .. } => Err(LogError::damaged(format!(
                "record {index} in {}: {reason}",
                self.path.display()
            ))),
            RecordRead::BadLength => Err(LogError::damaged(format!(
                "record {index} in {} has a bad length",
                self.path.display()
            ))),
        }
    }
}

fn read_failure(path: &Path, error: io::Error) -> LogError {
    LogError::damaged(format!("reading {}: {error}", path.display()))
}

/// Create a fresh segment file holding only its header. Returns the segment and
/// an append handle to it.
pub fn create(directory: &Path, header: SegmentHeader) -> io::Result<(Segment, File)> {
    let path = directory.join(file_name(header.version));
    let mut file = OpenOptions::new()
        .create_new(true)
        .append(true)
        .open(&path)?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE as usize);
    header.encode(&mut buf);
    file.write_all(&buf)?;
    file.sync_all()?;

    Ok((
        Segment {
            header,
            path,
            offsets: Vec::new(),
            size: HEADER_SIZE,
        },
        file,
    ))
}

pub fn open_for_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().append(true).open(path)
}

/// Result of reading a segment file front to back
#[derive(Debug)]
pub enum Scan {
    /// The file ends before its header does
    TornHeader,
    Segment {
        header: SegmentHeader,
        entries: Vec<(u64, Term)>,
        /// bytes up to the end of the last good record
        valid_len: u64,
        /// why the bytes after `valid_len` were not accepted
        tail: Option<String>,
    },
}

/// Read and verify every record of the segment at `path`.
///
/// Only a bad final record is reported as a tail; anything bad followed by
/// more data is damage.
pub fn scan(path: &Path) -> Result<Scan, LogError> {
    let bytes = fs::read(path).map_err(|e| read_failure(path, e))?;
    if bytes.len() < HEADER_SIZE as usize {
        return Ok(Scan::TornHeader);
    }
    let header = SegmentHeader::decode(&mut &bytes[..HEADER_SIZE as usize])?;

    let mut entries = Vec::new();
    let mut position = HEADER_SIZE as usize;
    let mut tail = None;
    while position < bytes.len() {
        match decode_record(&bytes[position..]) {
            RecordRead::Complete { entry, len } => {
                entries.push((position as u64, entry.term));
                position += len;
            }
            RecordRead::Incomplete => {
                tail = Some(format!("incomplete record at offset {position}"));
                break;
            }
            RecordRead::BadLength if position + RECORD_PREFIX == bytes.len() => {
                tail = Some(format!("bad record length at offset {position}"));
                break;
            }
            RecordRead::BadLength => {
                return Err(LogError::damaged(format!(
                    "{}: bad record length at offset {position}",
                    path.display()
                )));
            }
            RecordRead::Corrupt { reason, len } if position + len == bytes.len() => {
                tail = Some(format!("{reason} at offset {position}"));
                break;
            }
            RecordRead::Corrupt { reason, .. } => {
                return Err(LogError::damaged(format!(
                    "{}: {reason} at offset {position}",
                    path.display()
                )));
            }
        }
    }

    Ok(Scan::Segment {
        header,
        entries,
        valid_len: position as u64,
        tail,
    })
}
