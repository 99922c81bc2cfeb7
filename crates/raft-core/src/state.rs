//! # state
//!
//! why: everything a member remembers between messages, split into the part
//! that must hit disk before we answer (term and vote) and the volatile rest
//! relations: read by the role handlers, rewritten by node.rs from each Outcome;
//! raft-storage provides the file-backed StateStorage
//! what: StateStorage trait, InMemoryStateStorage, FollowerState, RaftState

use crate::log::RaftLog;
use crate::node::NodeState;
use crate::types::{LogIndex, MemberId, Term, NO_INDEX};
use std::collections::{BTreeMap, BTreeSet};
use std::io;

/// Durable storage of the current term and the vote cast in it.
///
/// Both must be on disk before any message that depends on them is sent.
pub trait StateStorage: Send {
    /// persist the current term and voted_for
    fn save_term_and_vote(&mut self, term: Term, voted_for: Option<MemberId>) -> io::Result<()>;

    /// load the persisted term and voted_for
    fn load_term_and_vote(&self) -> io::Result<(Term, Option<MemberId>)>;
}

/// in-memory storage for testing
///
/// stores all state in memory, no persistence across restarts
#[derive(Debug, Default, Clone)]
pub struct InMemoryStateStorage {
    term: Term,
    voted_for: Option<MemberId>,
}

impl InMemoryStateStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// start from a given term, as if recovered from disk
    pub fn with_term(term: Term, voted_for: Option<MemberId>) -> Self {
        Self { term, voted_for }
    }
}

impl StateStorage for InMemoryStateStorage {
    fn save_term_and_vote(&mut self, term: Term, voted_for: Option<MemberId>) -> io::Result<()> {
        self.term = term;
        self.voted_for = voted_for;
        Ok(())
    }

    fn load_term_and_vote(&self) -> io::Result<(Term, Option<MemberId>)> {
        Ok((self.term, self.voted_for))
    }
}

/// Leader-private replication progress of one follower
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowerState {
    /// Highest index known to be replicated on the follower
    pub match_index: LogIndex,
    /// Next index the leader will send
    pub next_index: LogIndex,
}

impl FollowerState {
    pub fn new(next_index: LogIndex) -> Self {
        Self {
            match_index: NO_INDEX,
            next_index,
        }
    }
}

/// Volatile plus persisted consensus state of one member
#[derive(Debug, Clone)]
pub struct RaftState {
    pub myself: MemberId,
    pub members: BTreeSet<MemberId>,
    pub role: NodeState,
    pub term: Term,
    pub voted_for: Option<MemberId>,
    pub leader: Option<MemberId>,
    pub leader_commit: LogIndex,
    pub commit_index: LogIndex,
    pub votes_for_me: BTreeSet<MemberId>,
    pub pre_votes_for_me: BTreeSet<MemberId>,
    pub heartbeat_responses: BTreeSet<MemberId>,
    pub follower_states: BTreeMap<MemberId, FollowerState>,
    pub last_log_index_before_we_became_leader: LogIndex,
    pub supports_pre_voting: bool,
    pub catchup_batch_size: usize,
    /// marshalled bytes a catch-up batch stops growing at
    pub catchup_batch_bytes: usize,
}

impl RaftState {
    pub fn new(myself: MemberId, members: impl IntoIterator<Item = MemberId>) -> Self {
        let mut members: BTreeSet<MemberId> = members.into_iter().collect();
        members.insert(myself);
        Self {
            myself,
            members,
            role: NodeState::Follower,
            term: 0,
            voted_for: None,
            leader: None,
            leader_commit: NO_INDEX,
            commit_index: NO_INDEX,
            votes_for_me: BTreeSet::new(),
            pre_votes_for_me: BTreeSet::new(),
            heartbeat_responses: BTreeSet::new(),
            follower_states: BTreeMap::new(),
            last_log_index_before_we_became_leader: NO_INDEX,
            supports_pre_voting: true,
            catchup_batch_size: 64,
            catchup_batch_bytes: crate::config::DEFAULT_MAX_ENTRY_SIZE,
        }
    }

    /// Everyone but ourselves
    pub fn other_members(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.members.iter().copied().filter(move |m| *m != self.myself)
    }

    /// Strict majority of the voting members
    pub fn quorum_size(&self) -> usize {
        self.members.len() / 2 + 1
    }

    pub fn is_quorum(&self, count: usize) -> bool {
        count >= self.quorum_size()
    }
}

/// What a role handler sees: the state plus the log.
///
/// Handlers only read through it; every mutation goes back as a LogCommand.
pub struct ReadableRaftState<'a> {
    pub state: &'a RaftState,
    pub log: &'a dyn RaftLog,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_is_strict_majority() {
        assert_eq!(RaftState::new(MemberId(1), [MemberId(1)]).quorum_size(), 1);
        assert_eq!(RaftState::new(MemberId(1), (1..=3).map(MemberId)).quorum_size(), 2);
        assert_eq!(RaftState::new(MemberId(1), (1..=4).map(MemberId)).quorum_size(), 3);
        assert_eq!(RaftState::new(MemberId(1), (1..=5).map(MemberId)).quorum_size(), 3);
    }

    #[test]
    fn myself_is_always_a_member() {
        let state = RaftState::new(MemberId(9), [MemberId(1), MemberId(2)]);
        assert!(state.members.contains(&MemberId(9)));
        assert_eq!(state.other_members().count(), 2);
    }

    #[test]
    fn in_memory_storage_persists_term_and_vote() {
        let mut storage = InMemoryStateStorage::new();
        storage.save_term_and_vote(5, Some(MemberId(2))).unwrap();
        assert_eq!(storage.load_term_and_vote().unwrap(), (5, Some(MemberId(2))));
    }
}
