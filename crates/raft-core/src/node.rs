//! # node
//!
//! why: the one place where a handled message turns into durable effects:
//! term and vote first, then the log, then volatile state and listeners
//! relations: runs roles/* over state.rs, applies outcome.rs to log.rs and a
//! StateStorage, notifies listener.rs
//! what: NodeState enum, RaftNode

use crate::config::RaftConfig;
use crate::error::RaftError;
use crate::listener::LeaderListener;
use crate::log::{InMemoryRaftLog, RaftLog};
use crate::message::RaftMessage;
use crate::outcome::{LogCommand, Outcome};
use crate::roles;
use crate::state::{InMemoryStateStorage, RaftState, ReadableRaftState, StateStorage};
use crate::types::{LogIndex, MemberId, Term};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// The roles a member moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NodeState {
    /// Passive state - listens for the leader, votes when asked
    #[default]
    Follower,
    /// Asking for pre-votes without touching the term
    PreCandidate,
    /// Requesting votes for a new term
    Candidate,
    /// Replicates the log and sends heartbeats
    Leader,
}

/// A single Raft member: consensus state plus the log and durable term/vote
pub struct RaftNode {
    state: RaftState,
    config: RaftConfig,
    log: Arc<dyn RaftLog>,
    storage: Box<dyn StateStorage>,
    listeners: Vec<Arc<dyn LeaderListener>>,
}

impl std::fmt::Debug for RaftNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaftNode")
            .field("state", &self.state)
            .field("append_index", &self.log.append_index())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl RaftNode {
    /// In-memory member with default configuration
    pub fn new(myself: MemberId, members: impl IntoIterator<Item = MemberId>) -> Self {
        Self::with_config(myself, members, RaftConfig::default())
    }

    /// In-memory member with custom configuration
    pub fn with_config(
        myself: MemberId,
        members: impl IntoIterator<Item = MemberId>,
        config: RaftConfig,
    ) -> Self {
        let mut state = RaftState::new(myself, members);
        state.supports_pre_voting = config.pre_vote;
        state.catchup_batch_size = config.catchup_batch_size;
        state.catchup_batch_bytes = config.max_entry_size;
        Self {
            state,
            config,
            log: Arc::new(InMemoryRaftLog::new()),
            storage: Box::new(InMemoryStateStorage::new()),
            listeners: Vec::new(),
        }
    }

    /// Member over existing durable state; term and vote are recovered from `storage`
    pub fn open(
        myself: MemberId,
        members: impl IntoIterator<Item = MemberId>,
        config: RaftConfig,
        log: Arc<dyn RaftLog>,
        storage: Box<dyn StateStorage>,
    ) -> Result<Self, RaftError> {
        config.validate()?;
        let (term, voted_for) = storage
            .load_term_and_vote()
            .map_err(RaftError::StatePersistence)?;

        let mut state = RaftState::new(myself, members);
        state.term = term;
        state.voted_for = voted_for;
        state.supports_pre_voting = config.pre_vote;
        state.catchup_batch_size = config.catchup_batch_size;
        state.catchup_batch_bytes = config.max_entry_size;

        tracing::info!(
            member = %myself,
            term,
            append_index = log.append_index(),
            prev_index = log.prev_index(),
            "raft member opened"
        );

        Ok(Self {
            state,
            config,
            log,
            storage,
            listeners: Vec::new(),
        })
    }

    pub fn add_listener(&mut self, listener: Arc<dyn LeaderListener>) {
        self.listeners.push(listener);
    }

    /// Process one message: decide, persist term and vote, apply log
    /// commands, then publish. The returned outcome carries the messages to send.
    pub fn handle(&mut self, message: RaftMessage) -> Result<Outcome, RaftError> {
        let outcome = {
            let ctx = ReadableRaftState {
                state: &self.state,
                log: self.log.as_ref(),
            };
            roles::handle(&ctx, &message)?
        };

        if outcome.term != self.state.term || outcome.voted_for != self.state.voted_for {
            self.storage
                .save_term_and_vote(outcome.term, outcome.voted_for)
                .map_err(RaftError::StatePersistence)?;
        }

        self.apply_log_commands(&outcome)?;

        let leader_changed = outcome.is_leader_change(&self.state);
        self.update_state(&outcome);

        if leader_changed {
            tracing::info!(
                member = %self.state.myself,
                leader = ?outcome.leader,
                term = outcome.term,
                step_down_term = ?outcome.step_down_term,
                "leader changed"
            );
            for listener in &self.listeners {
                listener.on_leader_event(&outcome);
            }
        }

        Ok(outcome)
    }

    fn apply_log_commands(&self, outcome: &Outcome) -> Result<(), RaftError> {
        for command in &outcome.log_commands {
            match command {
                LogCommand::Append {
                    first_index,
                    entries,
                } => {
                    let expected = self.log.append_index() + 1;
                    if *first_index != expected {
                        return Err(RaftError::SafetyViolation(format!(
                            "append at {first_index} but the log expects {expected}"
                        )));
                    }
                    self.log.append(entries)?;
                }
                LogCommand::Truncate { from_index } => {
                    if *from_index <= self.state.commit_index {
                        return Err(RaftError::SafetyViolation(format!(
                            "truncate from {from_index} would remove committed entries (commit index {})",
                            self.state.commit_index
                        )));
                    }
                    tracing::warn!(from_index, "truncating conflicting log suffix");
                    self.log.truncate(*from_index)?;
                }
                LogCommand::Prune { up_to_exclusive } => {
                    let up_to_exclusive = (*up_to_exclusive).min(outcome.commit_index + 1);
                    let prev_index = self.log.prune(up_to_exclusive)?;
                    tracing::debug!(up_to_exclusive, prev_index, "pruned log");
                }
            }
        }
        Ok(())
    }

    fn update_state(&mut self, outcome: &Outcome) {
        let state = &mut self.state;
        state.role = outcome.role;
        state.term = outcome.term;
        state.voted_for = outcome.voted_for;
        state.leader = outcome.leader;
        state.leader_commit = outcome.leader_commit;
        state.commit_index = outcome.commit_index;
        state.votes_for_me = outcome.votes_for_me.clone();
        state.pre_votes_for_me = outcome.pre_votes_for_me.clone();
        state.heartbeat_responses = outcome.heartbeat_responses.clone();
        state.follower_states = outcome.follower_states.clone();
        state.last_log_index_before_we_became_leader =
            outcome.last_log_index_before_we_became_leader;
    }

    pub fn myself(&self) -> MemberId {
        self.state.myself
    }

    pub fn members(&self) -> &BTreeSet<MemberId> {
        &self.state.members
    }

    pub fn role(&self) -> NodeState {
        self.state.role
    }

    pub fn is_leader(&self) -> bool {
        self.state.role == NodeState::Leader
    }

    pub fn term(&self) -> Term {
        self.state.term
    }

    pub fn voted_for(&self) -> Option<MemberId> {
        self.state.voted_for
    }

    pub fn leader(&self) -> Option<MemberId> {
        self.state.leader
    }

    pub fn commit_index(&self) -> LogIndex {
        self.state.commit_index
    }

    /// Index of the last entry in the local log
    pub fn append_index(&self) -> LogIndex {
        self.log.append_index()
    }

    pub fn log(&self) -> &Arc<dyn RaftLog> {
        &self.log
    }

    pub fn state(&self) -> &RaftState {
        &self.state
    }

    pub fn config(&self) -> &RaftConfig {
        &self.config
    }
}
