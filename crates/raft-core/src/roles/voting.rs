//! Vote and pre-vote decisions shared by every role.

use crate::error::RaftError;
use crate::message::{RaftMessage, VoteRequest, VoteResponse};
use crate::outcome::Outcome;
use crate::state::ReadableRaftState;
use crate::types::{LogIndex, Term};

/// Candidate's `(last_log_term, last_log_index)` compared lexicographically with ours
pub(crate) fn candidate_log_is_up_to_date(
    ctx: &ReadableRaftState<'_>,
    last_log_term: Term,
    last_log_index: LogIndex,
) -> Result<bool, RaftError> {
    let my_index = ctx.log.append_index();
    let my_term = ctx.log.read_entry_term(my_index)?.unwrap_or_default();
    Ok((last_log_term, last_log_index) >= (my_term, my_index))
}

/// The outcome's term has already been raised to the request's if it was higher.
pub(crate) fn handle_vote_request(
    ctx: &ReadableRaftState<'_>,
    outcome: &mut Outcome,
    request: &VoteRequest,
) -> Result<(), RaftError> {
    let grant = request.term == outcome.term
        && outcome.voted_for.map_or(true, |v| v == request.candidate)
        && candidate_log_is_up_to_date(ctx, request.last_log_term, request.last_log_index)?;

    if grant {
        outcome.voted_for = Some(request.candidate);
        outcome.renew_election_timeout = true;
    }

    tracing::debug!(
        candidate = %request.candidate,
        term = request.term,
        granted = grant,
        "vote request"
    );

    outcome.send(
        request.from,
        RaftMessage::VoteResponse(VoteResponse {
            from: ctx.state.myself,
            term: outcome.term,
            vote_granted: grant,
        }),
    );
    Ok(())
}

/// Pre-votes never change our term or vote. `willing` is false while we still
/// believe in a live leader.
pub(crate) fn handle_pre_vote_request(
    ctx: &ReadableRaftState<'_>,
    outcome: &mut Outcome,
    request: &VoteRequest,
    willing: bool,
) -> Result<(), RaftError> {
    let grant = willing
        && request.term > outcome.term
        && candidate_log_is_up_to_date(ctx, request.last_log_term, request.last_log_index)?;

    outcome.send(
        request.from,
        RaftMessage::PreVoteResponse(VoteResponse {
            from: ctx.state.myself,
            term: outcome.term,
            vote_granted: grant,
        }),
    );
    Ok(())
}
