//! # pending
//!
//! why: a client that submitted an entry waits on its log index; leadership
//! loss must wake every waiter instead of leaving them to time out
//! relations: filled by server.rs when the leader appends, completed from the
//! dispatcher callback, registered on RaftNode as a LeaderListener
//! what: PendingResults

use crate::errors::ReplicationError;
use crate::machines::{CommandOutput, CommandResult};
use parking_lot::Mutex;
use raft_core::{LeaderInfo, LeaderListener, LogIndex, Term};
use std::collections::BTreeMap;
use tokio::sync::oneshot;

pub type ReplicationResult = Result<CommandOutput, ReplicationError>;

#[derive(Debug, Default)]
pub struct PendingResults {
    waiting: Mutex<BTreeMap<LogIndex, oneshot::Sender<ReplicationResult>>>,
}

impl PendingResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, index: LogIndex, reply: oneshot::Sender<ReplicationResult>) {
        if let Some(previous) = self.waiting.lock().insert(index, reply) {
            // the index was reused after a truncation; the old entry is gone
            let _ = previous.send(Err(ReplicationError::NotCommitted));
        }
    }

    /// Hand the applied result to whoever waits on `index`, if anyone
    pub fn complete(&self, index: LogIndex, result: CommandResult) {
        let Some(reply) = self.waiting.lock().remove(&index) else {
            return;
        };
        if reply.send(result.map_err(ReplicationError::from)).is_err() {
            tracing::debug!(index, "replication result dropped; caller went away");
        }
    }

    /// Fail every waiter with `error`
    pub fn cancel_all(&self, error: ReplicationError) {
        let waiting = std::mem::take(&mut *self.waiting.lock());
        if !waiting.is_empty() {
            tracing::info!(count = waiting.len(), %error, "cancelling pending results");
        }
        for (_, reply) in waiting {
            let _ = reply.send(Err(error.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.waiting.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.lock().is_empty()
    }
}

impl LeaderListener for PendingResults {
    fn on_leader_step_down(&self, step_down_term: Term) {
        tracing::debug!(step_down_term, "leader stepped down");
        self.cancel_all(ReplicationError::NotCommitted);
    }

    fn on_leader_switch(&self, _info: LeaderInfo) {}
}
