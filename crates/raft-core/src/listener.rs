//! # listener
//!
//! why: other components (pending results, transport, runtime status) need
//! to know when leadership moves without poking at raft state
//! relations: registered on RaftNode, notified after each Outcome is applied
//! what: LeaderInfo, LeaderListener

use crate::outcome::Outcome;
use crate::types::{MemberId, Term};

/// Who leads, as far as this member knows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderInfo {
    pub leader: Option<MemberId>,
    pub term: Term,
}

impl LeaderInfo {
    pub fn new(leader: Option<MemberId>, term: Term) -> Self {
        Self { leader, term }
    }
}

/// Notified whenever the known leader changes or we stop being leader.
pub trait LeaderListener: Send + Sync {
    /// We were leader in `step_down_term` and no longer are
    fn on_leader_step_down(&self, _step_down_term: Term) {}

    fn on_leader_switch(&self, info: LeaderInfo);

    /// Step-down is always delivered before the switch it causes, so a
    /// listener never sees the new leader while still acting as the old one.
    fn on_leader_event(&self, outcome: &Outcome) {
        if let Some(term) = outcome.step_down_term {
            self.on_leader_step_down(term);
        }
        self.on_leader_switch(LeaderInfo::new(outcome.leader, outcome.term));
    }
}
