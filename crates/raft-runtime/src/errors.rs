//! # errors
//!
//! why: the runtime meets failures from every layer and must tell fatal ones
//! (damaged log, lost term/vote) apart from ones a client or peer can retry
//! relations: wraps raft-core, raft-storage and raft-protocol errors; returned by
//! server.rs, network.rs and main.rs
//! what: RuntimeError, ReplicationError, StateMachineError, SendError,
//! TransportError, CompositeError and ErrorCollector

use crate::config::ConfigError;
use raft_core::{LogError, LogIndex, MemberId, RaftError};
use raft_protocol::{CodecError, NegotiationError};
use std::error::Error as StdError;
use std::io;
use std::time::Duration;
use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure applying one committed command; the log keeps advancing
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("transaction application failed: {0}")]
    TransactionFailed(String),

    #[error("command at index {index} dispatched after index {last_dispatched}")]
    OutOfOrder {
        index: LogIndex,
        last_dispatched: LogIndex,
    },
}

/// Why a replicate-and-wait call did not produce a result
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReplicationError {
    #[error("not the leader (leader is {leader:?})")]
    NotLeader { leader: Option<MemberId> },

    #[error("leadership lost before the entry committed")]
    NotCommitted,

    #[error("no result within {0:?}")]
    Timeout(Duration),

    #[error("entry of {size} bytes exceeds the limit of {limit} bytes")]
    EntryTooLarge { size: usize, limit: usize },

    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    #[error("raft server has shut down")]
    Shutdown,
}

/// A message could not be handed to the transport for a peer
#[derive(Debug, Error)]
pub enum SendError {
    #[error("no connection configured for {0}")]
    UnknownMember(MemberId),

    #[error("outbound queue to {0} is full")]
    QueueFull(MemberId),

    #[error("connection task for {0} has stopped")]
    Closed(MemberId),
}

/// A peer connection could not be set up or broke
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Raft(#[from] RaftError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Composite(#[from] CompositeError),

    #[error("command dispatch failed: {0}")]
    Dispatch(#[from] StateMachineError),

    #[error("runtime io error: {0}")]
    Io(#[from] io::Error),
}

impl RuntimeError {
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Raft(e) => e.is_fatal(),
            Self::Log(e) => e.is_damaged(),
            Self::Dispatch(StateMachineError::OutOfOrder { .. }) => true,
            _ => false,
        }
    }
}

/// Every failure from one group of actions.
///
/// The first failure is the source; the rest are kept alongside it.
#[derive(Debug, Error)]
#[error("{description}: {first} ({} more)", .others.len())]
pub struct CompositeError {
    pub description: String,
    #[source]
    pub first: BoxError,
    pub others: Vec<BoxError>,
}

impl CompositeError {
    pub fn causes(&self) -> impl Iterator<Item = &BoxError> {
        std::iter::once(&self.first).chain(self.others.iter())
    }
}

/// Runs every action it is given and reports all failures at the end
/// rather than stopping at the first.
#[derive(Debug)]
pub struct ErrorCollector {
    description: String,
    errors: Vec<BoxError>,
}

impl ErrorCollector {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            errors: Vec::new(),
        }
    }

    pub fn execute<E>(&mut self, action: impl FnOnce() -> Result<(), E>)
    where
        E: Into<BoxError>,
    {
        if let Err(e) = action() {
            self.errors.push(e.into());
        }
    }

    pub fn add(&mut self, error: impl Into<BoxError>) {
        self.errors.push(error.into());
    }

    pub fn finish(self) -> Result<(), CompositeError> {
        let mut errors = self.errors.into_iter();
        match errors.next() {
            None => Ok(()),
            Some(first) => Err(CompositeError {
                description: self.description,
                first,
                others: errors.collect(),
            }),
        }
    }

    pub fn run_all<I>(description: impl Into<String>, actions: I) -> Result<(), CompositeError>
    where
        I: IntoIterator<Item = Box<dyn FnOnce() -> Result<(), BoxError>>>,
    {
        let mut collector = Self::new(description);
        for action in actions {
            collector.execute(action);
        }
        collector.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn all_actions_run_even_after_failures() {
        let ran = Cell::new(0);
        let mut collector = ErrorCollector::new("stopping");
        collector.execute(|| {
            ran.set(ran.get() + 1);
            Err(SendError::UnknownMember(MemberId(1)))
        });
        collector.execute(|| -> Result<(), SendError> {
            ran.set(ran.get() + 1);
            Ok(())
        });
        collector.execute(|| {
            ran.set(ran.get() + 1);
            Err(SendError::QueueFull(MemberId(2)))
        });

        let err = collector.finish().unwrap_err();
        assert_eq!(ran.get(), 3);
        assert_eq!(err.causes().count(), 2);
        assert!(err.first.to_string().contains("member-1"));
        assert!(err.to_string().starts_with("stopping: "));
    }

    #[test]
    fn no_failures_is_ok() {
        let actions: Vec<Box<dyn FnOnce() -> Result<(), BoxError>>> = vec![Box::new(|| Ok(())), Box::new(|| Ok(()))];
        assert!(ErrorCollector::run_all("nothing", actions).is_ok());
    }

    #[test]
    fn source_is_first_failure() {
        let mut collector = ErrorCollector::new("group");
        collector.add(io::Error::new(io::ErrorKind::Other, "first"));
        collector.add(io::Error::new(io::ErrorKind::Other, "second"));
        let err = collector.finish().unwrap_err();
        assert_eq!(err.source().map(|s| s.to_string()), Some("first".to_string()));
        assert_eq!(err.causes().count(), 2);
    }
}
