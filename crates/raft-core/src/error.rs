//! # error
//!
//! why: separate ordinary failures from the ones that must stop consensus
//! relations: LogError is produced by every RaftLog impl, RaftError by node.rs
//! what: MarshalError, LogError, RaftError

use crate::types::LogIndex;
use std::io;
use thiserror::Error;

/// Failure to read or write a binary payload
#[derive(Debug, Error)]
pub enum MarshalError {
    #[error("unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    EndOfBuffer { needed: usize, remaining: usize },

    #[error("unknown replicated content tag {0}")]
    UnknownContentType(u8),

    #[error("unknown id type ordinal {0}")]
    UnknownIdType(i32),

    #[error("invalid length field {0}")]
    InvalidLength(i64),

    #[error("payload of {size} bytes exceeds the limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },
}

/// Errors raised by a replicated log.
///
/// `Damaged` is the only variant that means the log can no longer be trusted;
/// everything else leaves the log usable.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("damaged log: {0}")]
    Damaged(String),

    #[error("log io error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot truncate at {index}: live range is ({prev_index}, {append_index}]")]
    InvalidTruncate {
        index: LogIndex,
        prev_index: LogIndex,
        append_index: LogIndex,
    },
}

impl LogError {
    pub fn damaged(message: impl Into<String>) -> Self {
        Self::Damaged(message.into())
    }

    pub fn is_damaged(&self) -> bool {
        matches!(self, Self::Damaged(_))
    }
}

/// Errors surfaced by [`crate::RaftNode::handle`]
#[derive(Debug, Error)]
pub enum RaftError {
    #[error(transparent)]
    Log(#[from] LogError),

    #[error("failed to persist term and vote: {0}")]
    StatePersistence(#[source] io::Error),

    #[error("consensus safety violation: {0}")]
    SafetyViolation(String),

    #[error("invalid raft configuration: {0}")]
    Config(String),
}

impl RaftError {
    /// True when the instance must stop participating in consensus
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Log(e) => e.is_damaged(),
            Self::StatePersistence(_) | Self::SafetyViolation(_) => true,
            Self::Config(_) => false,
        }
    }
}
