//! # machines
//!
//! why: committed log entries only matter once something applies them
//! relations: driven by dispatch.rs in commit order; results flow back to
//! pending.rs
//! what: CommandOutput, the StateMachines bundle and one state machine per
//! content kind

pub mod id_allocation;
pub mod membership;
pub mod transaction;

pub use id_allocation::IdAllocationStateMachine;
pub use membership::MembershipStateMachine;
pub use transaction::{InMemoryTransactionStore, ReplicatedTransactionStateMachine, TransactionApplier};

use crate::errors::StateMachineError;
use raft_core::{IdType, LogIndex, MemberId, ReplicatedContent};

/// What applying one command produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutput {
    /// Barrier and benchmark entries carry no effect
    Noop,
    IdAllocation {
        id_type: IdType,
        accepted: bool,
    },
    TransactionCommitted {
        tx_id: u64,
    },
    MembershipChanged {
        members: Vec<MemberId>,
    },
    /// The index was already reflected in the state machine
    AlreadyApplied,
}

pub type CommandResult = Result<CommandOutput, StateMachineError>;

/// One state machine per content kind
pub struct StateMachines {
    pub id_allocation: IdAllocationStateMachine,
    pub transactions: ReplicatedTransactionStateMachine,
    pub membership: MembershipStateMachine,
}

impl std::fmt::Debug for StateMachines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachines")
            .field("id_allocation", &self.id_allocation)
            .field("transactions_last_applied", &self.transactions.last_applied())
            .field("membership", &self.membership)
            .finish()
    }
}

impl StateMachines {
    pub fn new(applier: Box<dyn TransactionApplier>) -> Self {
        Self {
            id_allocation: IdAllocationStateMachine::default(),
            transactions: ReplicatedTransactionStateMachine::new(applier),
            membership: MembershipStateMachine::default(),
        }
    }

    /// In-memory transaction store; for tests and the benchmark
    pub fn in_memory() -> Self {
        Self::new(Box::new(InMemoryTransactionStore::default()))
    }

    pub fn apply(&mut self, content: &ReplicatedContent, index: LogIndex) -> CommandResult {
        match content {
            ReplicatedContent::Transaction(bytes) => self.transactions.apply(bytes, index),
            ReplicatedContent::IdAllocation(request) => Ok(self.id_allocation.apply(request, index)),
            ReplicatedContent::MemberSet(members) => Ok(self.membership.apply(members, index)),
            ReplicatedContent::NewLeaderBarrier | ReplicatedContent::Dummy(_) => Ok(CommandOutput::Noop),
        }
    }
}
