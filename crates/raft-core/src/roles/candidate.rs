//! Candidate: count votes for our term, yield to any leader of it.

use crate::error::RaftError;
use crate::message::RaftMessage;
use crate::outcome::Outcome;
use crate::roles::{appending, election, prune, voting};
use crate::state::ReadableRaftState;

pub(crate) fn handle(
    ctx: &ReadableRaftState<'_>,
    outcome: &mut Outcome,
    message: &RaftMessage,
) -> Result<(), RaftError> {
    match message {
        RaftMessage::VoteResponse(response) => {
            if response.term != outcome.term || !response.vote_granted {
                return Ok(());
            }
            outcome.votes_for_me.insert(response.from);
            if ctx.state.is_quorum(outcome.votes_for_me.len()) {
                election::become_leader(ctx, outcome)?;
            }
        }
        RaftMessage::AppendEntriesRequest(request) => {
            appending::handle_append_entries_request(ctx, outcome, request)?
        }
        RaftMessage::Heartbeat(heartbeat) => appending::handle_heartbeat(ctx, outcome, heartbeat)?,
        RaftMessage::LogCompactionInfo(info) => {
            appending::handle_log_compaction_info(ctx, outcome, info)
        }
        RaftMessage::VoteRequest(request) => voting::handle_vote_request(ctx, outcome, request)?,
        RaftMessage::PreVoteRequest(request) => {
            voting::handle_pre_vote_request(ctx, outcome, request, false)?
        }
        RaftMessage::ElectionTimeout { .. } => {
            tracing::info!(term = outcome.term, "election timed out, retrying");
            election::start_election(ctx, outcome)?;
        }
        RaftMessage::PruneRequest { prune_index, .. } => prune(outcome, *prune_index),
        RaftMessage::PreVoteResponse(_)
        | RaftMessage::AppendEntriesResponse(_)
        | RaftMessage::HeartbeatResponse { .. }
        | RaftMessage::HeartbeatTimeout { .. }
        | RaftMessage::NewEntryRequest(_) => {}
    }
    Ok(())
}
