//! # raft-runtime
//!
//! why: raft-core decides, but something has to own the clock, the sockets
//! and the state machines, and feed it one event at a time
//! relations: drives raft_core::RaftNode over raft_storage's log, talks to
//! peers through raft_protocol pipelines
//! what: single-writer server actor, command dispatch and state machines,
//! pending results, tcp transport, config, logging, error collection

pub mod benchmark;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod logging;
pub mod machines;
pub mod member;
pub mod network;
pub mod pending;
pub mod server;

pub use config::{ClusterConfig, ConfigError, MemberAddress};
pub use dispatch::CommandDispatcher;
pub use errors::{
    CompositeError, ErrorCollector, ReplicationError, RuntimeError, SendError, StateMachineError,
};
pub use machines::{CommandOutput, StateMachines};
pub use member::ClusterMember;
pub use pending::PendingResults;
pub use server::{Outbound, RaftHandle, RaftServer, RaftStatus};
