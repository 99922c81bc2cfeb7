//! # raft-core
//!
//! why: implement the raft consensus rules as pure, portable rust with no
//! clocks, sockets or files of its own
//! relations: raft-storage provides the durable log and term/vote storage,
//! raft-protocol puts the messages on the wire, raft-runtime drives a RaftNode
//! what: shared types, replicated content, log traits, messages, role
//! handlers, RaftNode

pub mod config;
pub mod content;
pub mod error;
pub mod listener;
pub mod log;
pub mod marshal;
pub mod message;
pub mod node;
pub mod outcome;
mod roles;
pub mod state;
pub mod types;

pub use config::RaftConfig;
pub use content::{IdAllocationRequest, IdType, ReplicatedContent};
pub use error::{LogError, MarshalError, RaftError};
pub use listener::{LeaderInfo, LeaderListener};
pub use log::{InMemoryRaftLog, LogEntry, RaftLog, ReadableRaftLog};
pub use message::{ClusterIdAwareMessage, MessageType, RaftMessage};
pub use node::{NodeState, RaftNode};
pub use outcome::{Directed, LogCommand, Outcome};
pub use state::{InMemoryStateStorage, StateStorage};
pub use types::{ClusterId, LogIndex, MemberId, Term, NO_INDEX};
