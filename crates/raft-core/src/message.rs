//! # message
//!
//! why: define all raft rpc message types for node communication
//! relations: used by node.rs for state transitions, encoded by raft-protocol
//! what: vote / pre-vote, append entries, heartbeat, compaction info, new
//! entry and the internal timer/prune events, as one closed enum

use crate::content::ReplicatedContent;
use crate::log::LogEntry;
use crate::types::{ClusterId, LogIndex, MemberId, Term};
use serde::{Deserialize, Serialize};

/// Request a vote (or pre-vote) during leader election
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub from: MemberId,
    pub term: Term,
    pub candidate: MemberId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

/// Response to a vote (or pre-vote) request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub from: MemberId,
    pub term: Term,
    pub vote_granted: bool,
}

/// Replicate log entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub from: MemberId,
    pub leader_term: Term,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: LogIndex,
}

/// Response to AppendEntries.
///
/// On failure `append_index` tells the leader where the follower's log ends
/// so it can retry from an earlier `prev_log_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub from: MemberId,
    pub term: Term,
    pub success: bool,
    pub match_index: LogIndex,
    pub append_index: LogIndex,
}

/// Leadership keep-alive carrying the leader's commit point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub from: MemberId,
    pub leader_term: Term,
    pub commit_index: LogIndex,
    pub commit_index_term: Term,
}

/// Tells a follower that the leader no longer holds entries up to `prev_index`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCompactionInfo {
    pub from: MemberId,
    pub leader_term: Term,
    pub prev_index: LogIndex,
}

/// A client command submitted for replication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntryRequest {
    pub from: MemberId,
    pub content: ReplicatedContent,
}

/// Wire ordinal of each message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    VoteRequest,
    VoteResponse,
    PreVoteRequest,
    PreVoteResponse,
    AppendEntriesRequest,
    AppendEntriesResponse,
    Heartbeat,
    HeartbeatResponse,
    LogCompactionInfo,
    NewEntryRequest,
    ElectionTimeout,
    HeartbeatTimeout,
    PruneRequest,
}

impl MessageType {
    const ALL: [MessageType; 13] = [
        MessageType::VoteRequest,
        MessageType::VoteResponse,
        MessageType::PreVoteRequest,
        MessageType::PreVoteResponse,
        MessageType::AppendEntriesRequest,
        MessageType::AppendEntriesResponse,
        MessageType::Heartbeat,
        MessageType::HeartbeatResponse,
        MessageType::LogCompactionInfo,
        MessageType::NewEntryRequest,
        MessageType::ElectionTimeout,
        MessageType::HeartbeatTimeout,
        MessageType::PruneRequest,
    ];

    pub fn ordinal(self) -> i32 {
        self as i32
    }

    /// `None` for ordinals this version does not know about
    pub fn from_ordinal(ordinal: i32) -> Option<Self> {
        usize::try_from(ordinal).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    /// Timers and prune requests never leave the member
    pub fn is_network(self) -> bool {
        !matches!(
            self,
            MessageType::ElectionTimeout | MessageType::HeartbeatTimeout | MessageType::PruneRequest
        )
    }
}

/// All possible Raft messages, network and internal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftMessage {
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    PreVoteRequest(VoteRequest),
    PreVoteResponse(VoteResponse),
    AppendEntriesRequest(AppendEntriesRequest),
    AppendEntriesResponse(AppendEntriesResponse),
    Heartbeat(Heartbeat),
    HeartbeatResponse { from: MemberId },
    LogCompactionInfo(LogCompactionInfo),
    NewEntryRequest(NewEntryRequest),
    ElectionTimeout { from: MemberId },
    HeartbeatTimeout { from: MemberId },
    /// Ask the member to prune its log below `prune_index`
    PruneRequest { from: MemberId, prune_index: LogIndex },
}

impl RaftMessage {
    pub fn from(&self) -> MemberId {
        match self {
            Self::VoteRequest(m) | Self::PreVoteRequest(m) => m.from,
            Self::VoteResponse(m) | Self::PreVoteResponse(m) => m.from,
            Self::AppendEntriesRequest(m) => m.from,
            Self::AppendEntriesResponse(m) => m.from,
            Self::Heartbeat(m) => m.from,
            Self::LogCompactionInfo(m) => m.from,
            Self::NewEntryRequest(m) => m.from,
            Self::HeartbeatResponse { from }
            | Self::ElectionTimeout { from }
            | Self::HeartbeatTimeout { from }
            | Self::PruneRequest { from, .. } => *from,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::VoteRequest(_) => MessageType::VoteRequest,
            Self::VoteResponse(_) => MessageType::VoteResponse,
            Self::PreVoteRequest(_) => MessageType::PreVoteRequest,
            Self::PreVoteResponse(_) => MessageType::PreVoteResponse,
            Self::AppendEntriesRequest(_) => MessageType::AppendEntriesRequest,
            Self::AppendEntriesResponse(_) => MessageType::AppendEntriesResponse,
            Self::Heartbeat(_) => MessageType::Heartbeat,
            Self::HeartbeatResponse { .. } => MessageType::HeartbeatResponse,
            Self::LogCompactionInfo(_) => MessageType::LogCompactionInfo,
            Self::NewEntryRequest(_) => MessageType::NewEntryRequest,
            Self::ElectionTimeout { .. } => MessageType::ElectionTimeout,
            Self::HeartbeatTimeout { .. } => MessageType::HeartbeatTimeout,
            Self::PruneRequest { .. } => MessageType::PruneRequest,
        }
    }

    /// Term the sender claims, for messages that carry one
    pub fn term(&self) -> Option<Term> {
        match self {
            Self::VoteRequest(m) | Self::PreVoteRequest(m) => Some(m.term),
            Self::VoteResponse(m) | Self::PreVoteResponse(m) => Some(m.term),
            Self::AppendEntriesRequest(m) => Some(m.leader_term),
            Self::AppendEntriesResponse(m) => Some(m.term),
            Self::Heartbeat(m) => Some(m.leader_term),
            Self::LogCompactionInfo(m) => Some(m.leader_term),
            _ => None,
        }
    }
}

/// A message stamped with the cluster it belongs to, as it travels the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterIdAwareMessage {
    pub cluster_id: ClusterId,
    pub message: RaftMessage,
}

impl ClusterIdAwareMessage {
    pub fn new(cluster_id: ClusterId, message: RaftMessage) -> Self {
        Self { cluster_id, message }
    }
}
