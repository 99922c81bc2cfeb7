//! Log store settings, usually embedded in the member's cluster config file.

use crate::pruning::{PruningStrategy, PruningStrategyError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Directory holding the segment files and the term/vote file
    pub directory: PathBuf,
    /// Start a new segment once the active one reaches this many bytes
    pub rotation_size: u64,
    /// Start a new segment once the active one holds this many entries
    pub rotation_entries: Option<u64>,
    /// e.g. `"1g size"`, `"100000 entries"`, `"5 files"`, `"keep_all"`
    pub pruning_strategy: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("raft-log"),
            rotation_size: 250 * 1024 * 1024,
            rotation_entries: None,
            pruning_strategy: "1g size".to_string(),
        }
    }
}

impl LogConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    pub fn strategy(&self) -> Result<PruningStrategy, PruningStrategyError> {
        self.pruning_strategy.parse()
    }
}
