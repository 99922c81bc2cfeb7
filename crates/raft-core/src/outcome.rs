//! # outcome
//!
//! why: role handlers never touch state directly; they describe the result of
//! one message as a value that node.rs then persists, applies and publishes
//! relations: built by roles/*, consumed by node.rs and raft-runtime
//! what: Outcome, LogCommand, Directed

use crate::log::LogEntry;
use crate::message::RaftMessage;
use crate::node::NodeState;
use crate::state::{FollowerState, RaftState};
use crate::types::{LogIndex, MemberId, Term};
use std::collections::{BTreeMap, BTreeSet};

/// A mutation of the replicated log, applied in order after the handler returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogCommand {
    /// Append `entries`, the first of which lands at `first_index`
    Append {
        first_index: LogIndex,
        entries: Vec<LogEntry>,
    },
    /// Remove every entry from `from_index` on
    Truncate { from_index: LogIndex },
    /// Prune history below `up_to_exclusive`
    Prune { up_to_exclusive: LogIndex },
}

/// A message addressed to one member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directed {
    pub to: MemberId,
    pub message: RaftMessage,
}

impl Directed {
    pub fn new(to: MemberId, message: RaftMessage) -> Self {
        Self { to, message }
    }
}

/// Result of handling a single message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub role: NodeState,
    pub term: Term,
    pub leader: Option<MemberId>,
    pub leader_commit: LogIndex,
    pub voted_for: Option<MemberId>,
    pub votes_for_me: BTreeSet<MemberId>,
    pub pre_votes_for_me: BTreeSet<MemberId>,
    pub heartbeat_responses: BTreeSet<MemberId>,
    pub follower_states: BTreeMap<MemberId, FollowerState>,
    pub last_log_index_before_we_became_leader: LogIndex,
    pub commit_index: LogIndex,
    pub renew_election_timeout: bool,
    pub needs_fresh_snapshot: bool,
    /// Set when we were leader and lost the leadership in this step
    pub step_down_term: Option<Term>,
    pub log_commands: Vec<LogCommand>,
    pub outgoing: Vec<Directed>,
}

impl Outcome {
    /// Start from the current state; nothing changes unless a handler says so
    pub fn from_state(state: &RaftState) -> Self {
        Self {
            role: state.role,
            term: state.term,
            leader: state.leader,
            leader_commit: state.leader_commit,
            voted_for: state.voted_for,
            votes_for_me: state.votes_for_me.clone(),
            pre_votes_for_me: state.pre_votes_for_me.clone(),
            heartbeat_responses: state.heartbeat_responses.clone(),
            follower_states: state.follower_states.clone(),
            last_log_index_before_we_became_leader: state.last_log_index_before_we_became_leader,
            commit_index: state.commit_index,
            renew_election_timeout: false,
            needs_fresh_snapshot: false,
            step_down_term: None,
            log_commands: Vec::new(),
            outgoing: Vec::new(),
        }
    }

    /// Adopt a newer term. Resets the vote and the known leader; never moves
    /// the term backwards.
    pub(crate) fn set_next_term(&mut self, term: Term) {
        if term > self.term {
            self.term = term;
            self.voted_for = None;
            self.leader = None;
        }
    }

    pub(crate) fn set_role(&mut self, role: NodeState) {
        self.role = role;
    }

    pub(crate) fn send(&mut self, to: MemberId, message: RaftMessage) {
        self.outgoing.push(Directed::new(to, message));
    }

    pub(crate) fn add_log_command(&mut self, command: LogCommand) {
        self.log_commands.push(command);
    }

    /// Commit index moves forward only
    pub(crate) fn advance_commit_index(&mut self, index: LogIndex) {
        if index > self.commit_index {
            self.commit_index = index;
        }
    }

    /// Leave the leader role, remembering in which term it happened
    pub(crate) fn step_down(&mut self, current_term: Term) {
        self.step_down_term = Some(current_term);
        self.become_follower();
    }

    /// Drop all election and leader bookkeeping
    pub(crate) fn become_follower(&mut self) {
        self.role = NodeState::Follower;
        self.leader = None;
        self.votes_for_me.clear();
        self.pre_votes_for_me.clear();
        self.heartbeat_responses.clear();
        self.follower_states.clear();
    }

    /// Whether the known leader changed or we stepped down in this step
    pub fn is_leader_change(&self, state: &RaftState) -> bool {
        self.leader != state.leader || self.step_down_term.is_some()
    }

    /// Entries this step appends, if any
    pub fn appended_entries(&self) -> impl Iterator<Item = (LogIndex, &LogEntry)> + '_ {
        self.log_commands.iter().flat_map(|command| match command {
            LogCommand::Append { first_index, entries } => entries
                .iter()
                .enumerate()
                .map(|(offset, entry)| (*first_index + offset as LogIndex, entry))
                .collect::<Vec<_>>(),
            _ => Vec::new(),
        })
    }
}
