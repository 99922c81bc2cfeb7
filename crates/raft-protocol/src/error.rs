//! # error
//!
//! why: keep wire anomalies apart from failed negotiations; the first drops a
//! frame, the second drops the connection
//! relations: CodecError from codec.rs, modifier.rs, pipeline.rs;
//! NegotiationError from handshake/*
//! what: CodecError, NegotiationError

use raft_core::{MarshalError, MessageType};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Marshal(#[from] MarshalError),

    /// Timers and prune requests never leave the member
    #[error("{0:?} is not a network message")]
    NotNetwork(MessageType),

    #[error("entry of {size} bytes exceeds the limit of {limit} bytes")]
    EntryTooLarge { size: usize, limit: usize },

    #[error("frame of {size} bytes exceeds the limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("{modifier} failed: {reason}")]
    Modifier { modifier: String, reason: String },

    #[error("no pipeline for protocol {0}")]
    UnsupportedProtocol(String),

    #[error("{0} trailing bytes after message body")]
    TrailingBytes(usize),

    #[error("codec io error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Whether the connection can carry on after dropping the offending frame
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Io(_) | Self::FrameTooLarge { .. } | Self::UnsupportedProtocol(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("no common {category} version: local {local:?}, remote {remote:?}")]
    NoCommonApplicationProtocol {
        category: String,
        local: Vec<u32>,
        remote: Vec<u32>,
    },

    #[error("peer refused the {0} protocol")]
    Refused(String),

    #[error("peer refused to switch over")]
    SwitchOverRefused,

    #[error("unexpected handshake message: {0}")]
    Unexpected(String),

    #[error("bad magic value {0:?}")]
    BadMagic(String),

    #[error("connection closed during handshake")]
    Closed,

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error("handshake io error: {0}")]
    Io(#[from] io::Error),
}

impl From<CodecError> for NegotiationError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::Io(e) => Self::Io(e),
            CodecError::Marshal(e) => Self::Marshal(e),
            other => Self::Unexpected(other.to_string()),
        }
    }
}
