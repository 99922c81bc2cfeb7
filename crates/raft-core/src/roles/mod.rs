//! # roles
//!
//! why: each role reacts to the same closed message set differently; keeping
//! the reactions as pure functions over (state, log) makes them testable
//! without disks or sockets
//! relations: called from node.rs, fills in outcome.rs
//! what: term adoption, per-role dispatch, prune clamping

mod appending;
mod candidate;
mod election;
mod follower;
pub(crate) mod leader;
mod voting;

use crate::error::RaftError;
use crate::message::RaftMessage;
use crate::node::NodeState;
use crate::outcome::{LogCommand, Outcome};
use crate::state::ReadableRaftState;
use crate::types::LogIndex;

/// Work out what `message` does to the member described by `ctx`
pub(crate) fn handle(
    ctx: &ReadableRaftState<'_>,
    message: &RaftMessage,
) -> Result<Outcome, RaftError> {
    let mut outcome = Outcome::from_state(ctx.state);

    tracing::trace!(
        role = ?ctx.state.role,
        term = ctx.state.term,
        from = %message.from(),
        kind = ?message.message_type(),
        "handling message"
    );

    // a pre-vote asks about term + 1 without claiming it
    let adopts_term = !matches!(message, RaftMessage::PreVoteRequest(_));
    match message.term() {
        Some(term) if adopts_term && term > outcome.term => {
            tracing::debug!(
                current = outcome.term,
                observed = term,
                from = %message.from(),
                "observed newer term"
            );
            if ctx.state.role == NodeState::Leader {
                outcome.step_down(ctx.state.term);
            } else {
                outcome.become_follower();
            }
            outcome.set_next_term(term);
            follower::handle(ctx, &mut outcome, message)?;
        }
        _ => match ctx.state.role {
            NodeState::Follower | NodeState::PreCandidate => {
                follower::handle(ctx, &mut outcome, message)?
            }
            NodeState::Candidate => candidate::handle(ctx, &mut outcome, message)?,
            NodeState::Leader => leader::handle(ctx, &mut outcome, message)?,
        },
    }

    Ok(outcome)
}

/// Prune below `prune_index`, never past what is committed
pub(crate) fn prune(outcome: &mut Outcome, prune_index: LogIndex) {
    let up_to_exclusive = prune_index.min(outcome.commit_index + 1);
    if up_to_exclusive > 0 {
        outcome.add_log_command(LogCommand::Prune { up_to_exclusive });
    }
}
