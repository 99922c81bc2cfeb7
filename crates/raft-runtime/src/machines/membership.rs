//! Last committed member set.

use super::CommandOutput;
use raft_core::{LogIndex, MemberId, NO_INDEX};
use std::collections::BTreeSet;

#[derive(Debug)]
pub struct MembershipStateMachine {
    members: Option<BTreeSet<MemberId>>,
    last_applied: LogIndex,
}

impl Default for MembershipStateMachine {
    fn default() -> Self {
        Self {
            members: None,
            last_applied: NO_INDEX,
        }
    }
}

impl MembershipStateMachine {
    /// `None` until a member set has committed
    pub fn members(&self) -> Option<&BTreeSet<MemberId>> {
        self.members.as_ref()
    }

    pub fn apply(&mut self, members: &[MemberId], index: LogIndex) -> CommandOutput {
        if index <= self.last_applied {
            return CommandOutput::AlreadyApplied;
        }
        self.last_applied = index;
        let set: BTreeSet<MemberId> = members.iter().copied().collect();
        tracing::info!(index, members = ?set, "member set committed");
        self.members = Some(set);
        CommandOutput::MembershipChanged {
            members: members.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_set_wins() {
        let mut machine = MembershipStateMachine::default();
        assert!(machine.members().is_none());
        machine.apply(&[MemberId(1), MemberId(2)], 3);
        machine.apply(&[MemberId(2), MemberId(3)], 7);
        let members: Vec<_> = machine.members().unwrap().iter().copied().collect();
        assert_eq!(members, vec![MemberId(2), MemberId(3)]);
        assert_eq!(machine.apply(&[MemberId(9)], 7), CommandOutput::AlreadyApplied);
    }
}
