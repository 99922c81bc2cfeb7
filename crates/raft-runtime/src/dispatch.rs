//! # dispatch
//!
//! why: committed entries must reach their state machine once each and in
//! commit order, and whoever is waiting on an entry must hear about it
//! relations: owned by the server actor; routes to machines/*, results go to
//! pending.rs through the callback
//! what: CommandDispatcher

use crate::errors::StateMachineError;
use crate::machines::{CommandResult, StateMachines};
use raft_core::{LogIndex, ReplicatedContent, NO_INDEX};

#[derive(Debug)]
pub struct CommandDispatcher {
    machines: StateMachines,
    last_dispatched: LogIndex,
}

impl CommandDispatcher {
    pub fn new(machines: StateMachines) -> Self {
        Self::starting_after(machines, NO_INDEX)
    }

    /// Dispatcher that expects the first command above `index`
    pub fn starting_after(machines: StateMachines, index: LogIndex) -> Self {
        Self {
            machines,
            last_dispatched: index,
        }
    }

    pub fn last_dispatched(&self) -> LogIndex {
        self.last_dispatched
    }

    pub fn machines(&self) -> &StateMachines {
        &self.machines
    }

    /// Apply the command committed at `index` and hand its result to
    /// `on_result`, which runs exactly once. An index at or below the last
    /// dispatched one is refused without touching any state machine.
    pub fn dispatch<F>(
        &mut self,
        content: &ReplicatedContent,
        index: LogIndex,
        on_result: F,
    ) -> Result<(), StateMachineError>
    where
        F: FnOnce(CommandResult),
    {
        if index <= self.last_dispatched {
            let error = StateMachineError::OutOfOrder {
                index,
                last_dispatched: self.last_dispatched,
            };
            tracing::error!(index, last_dispatched = self.last_dispatched, "command dispatched out of order");
            on_result(Err(error.clone()));
            return Err(error);
        }

        self.last_dispatched = index;
        let result = self.machines.apply(content, index);
        tracing::trace!(index, kind = content.kind(), ?result, "command applied");
        on_result(result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machines::CommandOutput;
    use raft_core::{IdAllocationRequest, IdType, MemberId};
    use std::cell::RefCell;

    #[test]
    fn routes_by_content_kind() {
        let mut dispatcher = CommandDispatcher::new(StateMachines::in_memory());
        let results = RefCell::new(Vec::new());

        let contents = [
            ReplicatedContent::NewLeaderBarrier,
            ReplicatedContent::Transaction(b"tx".to_vec()),
            ReplicatedContent::IdAllocation(IdAllocationRequest {
                owner: MemberId(1),
                id_type: IdType::LabelToken,
                range_start: 0,
                range_length: 16,
            }),
            ReplicatedContent::MemberSet(vec![MemberId(1), MemberId(2)]),
            ReplicatedContent::Dummy(vec![0; 8]),
        ];
        for (index, content) in contents.iter().enumerate() {
            dispatcher
                .dispatch(content, index as LogIndex, |r| results.borrow_mut().push(r))
                .unwrap();
        }

        assert_eq!(
            results.into_inner(),
            vec![
                Ok(CommandOutput::Noop),
                Ok(CommandOutput::TransactionCommitted { tx_id: 2 }),
                Ok(CommandOutput::IdAllocation {
                    id_type: IdType::LabelToken,
                    accepted: true
                }),
                Ok(CommandOutput::MembershipChanged {
                    members: vec![MemberId(1), MemberId(2)]
                }),
                Ok(CommandOutput::Noop),
            ]
        );
        assert_eq!(
            dispatcher
                .machines()
                .id_allocation
                .first_unallocated(IdType::LabelToken),
            16
        );
    }

    #[test]
    fn out_of_order_is_refused_and_still_reported() {
        let mut dispatcher = CommandDispatcher::new(StateMachines::in_memory());
        dispatcher
            .dispatch(&ReplicatedContent::Transaction(b"a".to_vec()), 3, |_| {})
            .unwrap();

        let mut calls = 0;
        let err = dispatcher
            .dispatch(&ReplicatedContent::Transaction(b"b".to_vec()), 2, |r| {
                calls += 1;
                assert!(r.is_err());
            })
            .unwrap_err();
        assert_eq!(calls, 1);
        assert_eq!(
            err,
            StateMachineError::OutOfOrder {
                index: 2,
                last_dispatched: 3
            }
        );
        assert_eq!(dispatcher.machines().transactions.last_local_tx_id(), 2);
    }

    #[test]
    fn gaps_are_allowed() {
        let mut dispatcher = CommandDispatcher::starting_after(StateMachines::in_memory(), 9);
        assert!(dispatcher.dispatch(&ReplicatedContent::NewLeaderBarrier, 9, |_| {}).is_err());
        assert!(dispatcher.dispatch(&ReplicatedContent::NewLeaderBarrier, 12, |_| {}).is_ok());
        assert_eq!(dispatcher.last_dispatched(), 12);
    }
}
