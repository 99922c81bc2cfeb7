//! # transaction
//!
//! why: transactions reach the storage engine exactly once even though the
//! log is replayed from its start after every restart
//! relations: the engine sits behind TransactionApplier; StateMachines routes
//! ReplicatedContent::Transaction here
//! what: TransactionApplier, InMemoryTransactionStore,
//! ReplicatedTransactionStateMachine

use super::{CommandOutput, CommandResult};
use crate::errors::StateMachineError;
use parking_lot::Mutex;
use raft_core::{LogIndex, NO_INDEX};
use std::sync::Arc;

/// Id of the transaction that exists before any was committed
pub const BASE_TX_ID: u64 = 1;

/// The storage engine side of transaction application
pub trait TransactionApplier: Send {
    /// Highest transaction id the engine has made durable
    fn last_committed_tx_id(&self) -> u64;

    /// Commit `transaction` as `tx_id`, returning the committed id
    fn apply_transaction(&mut self, transaction: &[u8], tx_id: u64) -> Result<u64, StateMachineError>;
}

#[derive(Debug)]
struct StoreInner {
    last_committed: u64,
    committed: Vec<(u64, Vec<u8>)>,
}

/// Engine stand-in that keeps committed transactions in memory.
///
/// Clones share the same store, so it outlives a restarted state machine.
#[derive(Debug, Clone)]
pub struct InMemoryTransactionStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl Default for InMemoryTransactionStore {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                last_committed: BASE_TX_ID,
                committed: Vec::new(),
            })),
        }
    }
}

impl InMemoryTransactionStore {
    pub fn committed(&self) -> Vec<(u64, Vec<u8>)> {
        self.inner.lock().committed.clone()
    }
}

impl TransactionApplier for InMemoryTransactionStore {
    fn last_committed_tx_id(&self) -> u64 {
        self.inner.lock().last_committed
    }

    fn apply_transaction(&mut self, transaction: &[u8], tx_id: u64) -> Result<u64, StateMachineError> {
        let mut inner = self.inner.lock();
        if tx_id != inner.last_committed + 1 {
            return Err(StateMachineError::TransactionFailed(format!(
                "transaction {tx_id} does not follow {}",
                inner.last_committed
            )));
        }
        inner.last_committed = tx_id;
        inner.committed.push((tx_id, transaction.to_vec()));
        Ok(tx_id)
    }
}

/// Numbers committed transactions in log order and hands the engine only
/// those it has not seen yet.
pub struct ReplicatedTransactionStateMachine {
    applier: Box<dyn TransactionApplier>,
    last_local_tx_id: u64,
    last_applied: LogIndex,
}

impl ReplicatedTransactionStateMachine {
    pub fn new(applier: Box<dyn TransactionApplier>) -> Self {
        Self {
            applier,
            last_local_tx_id: BASE_TX_ID,
            last_applied: NO_INDEX,
        }
    }

    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    pub fn last_local_tx_id(&self) -> u64 {
        self.last_local_tx_id
    }

    pub fn apply(&mut self, transaction: &[u8], index: LogIndex) -> CommandResult {
        if index <= self.last_applied {
            return Ok(CommandOutput::AlreadyApplied);
        }
        self.last_applied = index;
        self.last_local_tx_id += 1;
        let tx_id = self.last_local_tx_id;

        let last_committed = self.applier.last_committed_tx_id();
        if tx_id <= last_committed {
            tracing::debug!(index, tx_id, last_committed, "transaction already in the store");
            return Ok(CommandOutput::AlreadyApplied);
        }

        match self.applier.apply_transaction(transaction, tx_id) {
            Ok(committed) => Ok(CommandOutput::TransactionCommitted { tx_id: committed }),
            Err(e) => {
                tracing::warn!(index, tx_id, error = %e, "transaction application failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transactions_commit_in_order() {
        let store = InMemoryTransactionStore::default();
        let mut machine = ReplicatedTransactionStateMachine::new(Box::new(store.clone()));
        assert_eq!(
            machine.apply(b"a", 0),
            Ok(CommandOutput::TransactionCommitted { tx_id: 2 })
        );
        assert_eq!(
            machine.apply(b"b", 3),
            Ok(CommandOutput::TransactionCommitted { tx_id: 3 })
        );
        assert_eq!(store.committed().len(), 2);
    }

    #[test]
    fn replay_after_restart_does_not_double_count() {
        let store = InMemoryTransactionStore::default();
        {
            let mut machine = ReplicatedTransactionStateMachine::new(Box::new(store.clone()));
            machine.apply(b"a", 0).unwrap();
            machine.apply(b"b", 1).unwrap();
        }

        let mut replayed = ReplicatedTransactionStateMachine::new(Box::new(store.clone()));
        assert_eq!(replayed.apply(b"a", 0), Ok(CommandOutput::AlreadyApplied));
        assert_eq!(replayed.apply(b"b", 1), Ok(CommandOutput::AlreadyApplied));
        assert_eq!(
            replayed.apply(b"c", 2),
            Ok(CommandOutput::TransactionCommitted { tx_id: 4 })
        );
        let ids: Vec<u64> = store.committed().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn same_index_twice_is_ignored() {
        let store = InMemoryTransactionStore::default();
        let mut machine = ReplicatedTransactionStateMachine::new(Box::new(store.clone()));
        machine.apply(b"a", 5).unwrap();
        assert_eq!(machine.apply(b"a", 5), Ok(CommandOutput::AlreadyApplied));
        assert_eq!(machine.last_local_tx_id(), 2);
    }

    #[test]
    fn engine_failure_surfaces_but_index_is_consumed() {
        struct Failing;
        impl TransactionApplier for Failing {
            fn last_committed_tx_id(&self) -> u64 {
                BASE_TX_ID
            }
            fn apply_transaction(&mut self, _: &[u8], _: u64) -> Result<u64, StateMachineError> {
                Err(StateMachineError::TransactionFailed("disk full".into()))
            }
        }

        let mut machine = ReplicatedTransactionStateMachine::new(Box::new(Failing));
        assert!(matches!(
            machine.apply(b"a", 0),
            Err(StateMachineError::TransactionFailed(_))
        ));
        assert_eq!(machine.last_applied(), 0);
    }
}
