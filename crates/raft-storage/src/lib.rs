//! # raft-storage
//!
//! why: provide durable persistence for raft state using standard rust fs apis
//! relations: implements raft-core's RaftLog and StateStorage traits; opened by
//! raft-runtime from its config file
//! what: segmented replicated log, recovery, term history, pruning strategies,
//! file-backed term/vote storage

pub mod config;
pub mod file_storage;
pub mod pruning;
pub mod recovery;
pub mod segment;
pub mod segmented;
pub mod terms;

pub use config::LogConfig;
pub use file_storage::FileStateStorage;
pub use pruning::{PruningStrategy, PruningStrategyError, SegmentStats};
pub use recovery::State;
pub use segmented::SegmentedRaftLog;
pub use terms::Terms;
