//! Replicated id ranges: a request wins only if it starts exactly where the
//! last accepted range ended.

use super::CommandOutput;
use raft_core::{IdAllocationRequest, IdType, LogIndex, NO_INDEX};
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct IdAllocationStateMachine {
    first_unallocated: BTreeMap<IdType, i64>,
    last_applied: LogIndex,
}

impl Default for IdAllocationStateMachine {
    fn default() -> Self {
        Self {
            first_unallocated: BTreeMap::new(),
            last_applied: NO_INDEX,
        }
    }
}

impl IdAllocationStateMachine {
    pub fn first_unallocated(&self, id_type: IdType) -> i64 {
        self.first_unallocated.get(&id_type).copied().unwrap_or(0)
    }

    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    pub fn apply(&mut self, request: &IdAllocationRequest, index: LogIndex) -> CommandOutput {
        if index <= self.last_applied {
            return CommandOutput::AlreadyApplied;
        }
        self.last_applied = index;

        let next = self.first_unallocated(request.id_type);
        let accepted = request.range_start == next && request.range_length > 0;
        if accepted {
            self.first_unallocated
                .insert(request.id_type, next + i64::from(request.range_length));
        } else {
            tracing::debug!(
                owner = %request.owner,
                id_type = ?request.id_type,
                range_start = request.range_start,
                first_unallocated = next,
                "id range request lost the race"
            );
        }
        CommandOutput::IdAllocation {
            id_type: request.id_type,
            accepted,
        }
    }
}
