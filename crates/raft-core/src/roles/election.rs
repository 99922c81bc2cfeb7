//! Role transitions into pre-candidate, candidate and leader.

use crate::content::ReplicatedContent;
use crate::error::RaftError;
use crate::log::LogEntry;
use crate::message::{AppendEntriesRequest, RaftMessage, VoteRequest};
use crate::node::NodeState;
use crate::outcome::{LogCommand, Outcome};
use crate::roles::leader;
use crate::state::{FollowerState, ReadableRaftState};

fn vote_request(ctx: &ReadableRaftState<'_>, term: u64) -> Result<VoteRequest, RaftError> {
    let last_log_index = ctx.log.append_index();
    Ok(VoteRequest {
        from: ctx.state.myself,
        term,
        candidate: ctx.state.myself,
        last_log_index,
        last_log_term: ctx.log.read_entry_term(last_log_index)?.unwrap_or_default(),
    })
}

pub(crate) fn start_election(
    ctx: &ReadableRaftState<'_>,
    outcome: &mut Outcome,
) -> Result<(), RaftError> {
    if ctx.state.supports_pre_voting {
        start_pre_election(ctx, outcome)
    } else {
        start_real_election(ctx, outcome)
    }
}

/// Ask for non-binding votes for `term + 1` without touching our term
pub(crate) fn start_pre_election(
    ctx: &ReadableRaftState<'_>,
    outcome: &mut Outcome,
) -> Result<(), RaftError> {
    outcome.become_follower();
    outcome.set_role(NodeState::PreCandidate);
    outcome.pre_votes_for_me.insert(ctx.state.myself);
    outcome.renew_election_timeout = true;

    if ctx.state.is_quorum(outcome.pre_votes_for_me.len()) {
        return start_real_election(ctx, outcome);
    }

    let request = vote_request(ctx, outcome.term + 1)?;
    tracing::info!(term = request.term, "starting pre-election");
    for member in ctx.state.other_members() {
        outcome.send(member, RaftMessage::PreVoteRequest(request.clone()));
    }
    Ok(())
}

pub(crate) fn start_real_election(
    ctx: &ReadableRaftState<'_>,
    outcome: &mut Outcome,
) -> Result<(), RaftError> {
    outcome.become_follower();
    outcome.set_next_term(outcome.term + 1);
    outcome.set_role(NodeState::Candidate);
    outcome.voted_for = Some(ctx.state.myself);
    outcome.votes_for_me.insert(ctx.state.myself);
    outcome.renew_election_timeout = true;

    if ctx.state.is_quorum(outcome.votes_for_me.len()) {
        return become_leader(ctx, outcome);
    }

    let request = vote_request(ctx, outcome.term)?;
    tracing::info!(term = request.term, "starting election");
    for member in ctx.state.other_members() {
        outcome.send(member, RaftMessage::VoteRequest(request.clone()));
    }
    Ok(())
}

/// Take over: reset follower progress and append a barrier in our own term so
/// that entries from earlier terms can be committed.
pub(crate) fn become_leader(
    ctx: &ReadableRaftState<'_>,
    outcome: &mut Outcome,
) -> Result<(), RaftError> {
    let append_index = ctx.log.append_index();
    let append_term = ctx.log.read_entry_term(append_index)?.unwrap_or_default();
    let barrier_index = append_index + 1;
    let barrier = LogEntry::new(outcome.term, ReplicatedContent::NewLeaderBarrier);

    outcome.set_role(NodeState::Leader);
    outcome.leader = Some(ctx.state.myself);
    outcome.votes_for_me.clear();
    outcome.pre_votes_for_me.clear();
    outcome.heartbeat_responses.clear();
    outcome.last_log_index_before_we_became_leader = append_index;
    outcome.follower_states = ctx
        .state
        .other_members()
        .map(|member| (member, FollowerState::new(barrier_index + 1)))
        .collect();
    outcome.add_log_command(LogCommand::Append {
        first_index: barrier_index,
        entries: vec![barrier.clone()],
    });

    tracing::info!(term = outcome.term, barrier_index, "became leader");

    for member in ctx.state.other_members() {
        outcome.send(
            member,
            RaftMessage::AppendEntriesRequest(AppendEntriesRequest {
                from: ctx.state.myself,
                leader_term: outcome.term,
                prev_log_index: append_index,
                prev_log_term: append_term,
                entries: vec![barrier.clone()],
                leader_commit: outcome.commit_index,
            }),
        );
    }

    leader::advance_commit_index(ctx, outcome, barrier_index)
}
