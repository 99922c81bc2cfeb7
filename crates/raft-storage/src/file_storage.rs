//! # file_storage
//!
//! why: term and vote must survive a crash before any vote or append is answered
//! relations: implements raft_core::StateStorage, lives next to the segment files
//! what: FileStateStorage writing meta.json atomically

use raft_core::{MemberId, StateStorage, Term};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

const META_FILE: &str = "meta.json";
const META_TEMP: &str = "meta.tmp";

/// file-based term and vote storage using std::fs
///
/// stores a single meta.json in the given directory
#[derive(Debug)]
pub struct FileStateStorage {
    dir: PathBuf,
}

impl FileStateStorage {
    /// create storage in the given directory, creating it if it doesn't exist
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }
}

/// term and vote as persisted
#[derive(Serialize, Deserialize, Default)]
struct MetaData {
    term: Term,
    voted_for: Option<u64>,
}

impl StateStorage for FileStateStorage {
    fn save_term_and_vote(&mut self, term: Term, voted_for: Option<MemberId>) -> io::Result<()> {
        let meta = MetaData {
            term,
            voted_for: voted_for.map(|member| member.0),
        };
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        // atomic write: temp file, fsync, rename
        let temp_path = self.dir.join(META_TEMP);
        let mut file = File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, self.meta_path())?;

        tracing::trace!(term, voted_for = ?meta.voted_for, "persisted term and vote");
        Ok(())
    }

    fn load_term_and_vote(&self) -> io::Result<(Term, Option<MemberId>)> {
        let path = self.meta_path();
        if !path.exists() {
            return Ok((0, None));
        }

        let mut contents = String::new();
        File::open(&path)?.read_to_string(&mut contents)?;
        let meta: MetaData = serde_json::from_str(&contents)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok((meta.term, meta.voted_for.map(MemberId)))
    }
}
