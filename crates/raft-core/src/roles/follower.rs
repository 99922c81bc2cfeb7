//! Follower and pre-candidate: obey the leader, vote, and start elections on timeout.

use crate::error::RaftError;
use crate::message::RaftMessage;
use crate::node::NodeState;
use crate::outcome::Outcome;
use crate::roles::{appending, election, prune, voting};
use crate::state::ReadableRaftState;

pub(crate) fn handle(
    ctx: &ReadableRaftState<'_>,
    outcome: &mut Outcome,
    message: &RaftMessage,
) -> Result<(), RaftError> {
    match message {
        RaftMessage::AppendEntriesRequest(request) => {
            appending::handle_append_entries_request(ctx, outcome, request)?
        }
        RaftMessage::Heartbeat(heartbeat) => appending::handle_heartbeat(ctx, outcome, heartbeat)?,
        RaftMessage::LogCompactionInfo(info) => {
            appending::handle_log_compaction_info(ctx, outcome, info)
        }
        RaftMessage::VoteRequest(request) => voting::handle_vote_request(ctx, outcome, request)?,
        RaftMessage::PreVoteRequest(request) => {
            // while a leader is alive we do not help anyone replace it
            let willing = outcome.leader.is_none() || outcome.role == NodeState::PreCandidate;
            voting::handle_pre_vote_request(ctx, outcome, request, willing)?
        }
        RaftMessage::PreVoteResponse(response) => {
            // a response from an earlier pre-election no longer counts
            if outcome.role != NodeState::PreCandidate
                || !response.vote_granted
                || response.term != outcome.term
            {
                return Ok(());
            }
            outcome.pre_votes_for_me.insert(response.from);
            if ctx.state.is_quorum(outcome.pre_votes_for_me.len()) {
                tracing::debug!(votes = outcome.pre_votes_for_me.len(), "won pre-election");
                election::start_real_election(ctx, outcome)?;
            }
        }
        RaftMessage::ElectionTimeout { .. } => {
            tracing::info!(term = outcome.term, leader = ?outcome.leader, "election timeout");
            election::start_election(ctx, outcome)?;
        }
        RaftMessage::PruneRequest { prune_index, .. } => prune(outcome, *prune_index),
        RaftMessage::NewEntryRequest(request) => {
            tracing::debug!(
                from = %request.from,
                kind = request.content.kind(),
                leader = ?outcome.leader,
                "not the leader, dropping new entry"
            );
        }
        RaftMessage::VoteResponse(_)
        | RaftMessage::AppendEntriesResponse(_)
        | RaftMessage::HeartbeatResponse { .. }
        | RaftMessage::HeartbeatTimeout { .. } => {}
    }
    Ok(())
}
