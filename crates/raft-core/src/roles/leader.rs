//! Leader role: accepts new entries, ships them, counts acknowledgements.

use crate::error::RaftError;
use crate::log::LogEntry;
use crate::message::{
    AppendEntriesRequest, AppendEntriesResponse, Heartbeat, LogCompactionInfo, NewEntryRequest,
    RaftMessage,
};
use crate::outcome::{LogCommand, Outcome};
use crate::roles::{prune, voting};
use crate::state::ReadableRaftState;
use crate::types::{LogIndex, MemberId, Term};

pub(crate) fn handle(
    ctx: &ReadableRaftState<'_>,
    outcome: &mut Outcome,
    message: &RaftMessage,
) -> Result<(), RaftError> {
    match message {
        RaftMessage::HeartbeatTimeout { .. } => send_heartbeats(ctx, outcome)?,
        RaftMessage::HeartbeatResponse { from } => {
            outcome.heartbeat_responses.insert(*from);
        }
        RaftMessage::ElectionTimeout { .. } => {
            // leader stickiness: a leader cut off from the majority gives up
            if !ctx.state.is_quorum(outcome.heartbeat_responses.len() + 1) {
                tracing::warn!(
                    term = outcome.term,
                    responses = outcome.heartbeat_responses.len(),
                    "no heartbeat responses from a majority, stepping down"
                );
                outcome.step_down(ctx.state.term);
            } else {
                outcome.heartbeat_responses.clear();
            }
            outcome.renew_election_timeout = true;
        }
        RaftMessage::NewEntryRequest(request) => append_new_entry(ctx, outcome, request)?,
        RaftMessage::AppendEntriesResponse(response) => {
            handle_append_entries_response(ctx, outcome, response)?
        }
        RaftMessage::VoteRequest(request) => voting::handle_vote_request(ctx, outcome, request)?,
        RaftMessage::PreVoteRequest(request) => {
            voting::handle_pre_vote_request(ctx, outcome, request, false)?
        }
        RaftMessage::AppendEntriesRequest(AppendEntriesRequest { from, leader_term, .. })
        | RaftMessage::Heartbeat(Heartbeat { from, leader_term, .. })
            if *leader_term == outcome.term =>
        {
            tracing::warn!(other = %from, term = leader_term, "another leader claims our term, ignoring");
        }
        RaftMessage::AppendEntriesRequest(request) => {
            outcome.send(
                request.from,
                RaftMessage::AppendEntriesResponse(AppendEntriesResponse {
                    from: ctx.state.myself,
                    term: outcome.term,
                    success: false,
                    match_index: crate::NO_INDEX,
                    append_index: ctx.log.append_index(),
                }),
            );
        }
        RaftMessage::PruneRequest { prune_index, .. } => prune(outcome, *prune_index),
        RaftMessage::Heartbeat(_)
        | RaftMessage::LogCompactionInfo(_)
        | RaftMessage::VoteResponse(_)
        | RaftMessage::PreVoteResponse(_) => {}
    }
    Ok(())
}

/// Term at `index`, looking at entries appended in this step before the log
fn term_at(
    ctx: &ReadableRaftState<'_>,
    outcome: &Outcome,
    index: LogIndex,
) -> Result<Option<Term>, RaftError> {
    if let Some((_, entry)) = outcome.appended_entries().find(|(i, _)| *i == index) {
        return Ok(Some(entry.term));
    }
    Ok(ctx.log.read_entry_term(index)?)
}

/// Highest index held by a strict majority, committed only if it is from our term
pub(crate) fn advance_commit_index(
    ctx: &ReadableRaftState<'_>,
    outcome: &mut Outcome,
    leader_append_index: LogIndex,
) -> Result<(), RaftError> {
    let mut match_indices: Vec<LogIndex> = outcome
        .follower_states
        .values()
        .map(|follower| follower.match_index)
        .collect();
    match_indices.push(leader_append_index);
    match_indices.sort_unstable_by(|a, b| b.cmp(a));

    let quorum = ctx.state.quorum_size();
    let Some(&majority_index) = match_indices.get(quorum - 1) else {
        return Ok(());
    };

    if majority_index > outcome.commit_index
        && term_at(ctx, outcome, majority_index)? == Some(outcome.term)
    {
        tracing::trace!(commit_index = majority_index, "commit index advanced");
        outcome.advance_commit_index(majority_index);
        outcome.leader_commit = outcome.commit_index;
    }
    Ok(())
}

fn send_heartbeats(ctx: &ReadableRaftState<'_>, outcome: &mut Outcome) -> Result<(), RaftError> {
    let commit_index_term = ctx.log.read_entry_term(outcome.commit_index)?.unwrap_or_default();
    let append_index = ctx.log.append_index();
    let followers: Vec<MemberId> = outcome.follower_states.keys().copied().collect();

    for member in followers {
        outcome.send(
            member,
            RaftMessage::Heartbeat(Heartbeat {
                from: ctx.state.myself,
                leader_term: outcome.term,
                commit_index: outcome.commit_index,
                commit_index_term,
            }),
        );

        // resend anything not yet acknowledged, the originals may have been lost
        let Some(follower) = outcome.follower_states.get_mut(&member) else {
            continue;
        };
        if follower.match_index < append_index {
            follower.next_index = if follower.match_index >= 0 {
                follower.match_index + 1
            } else {
                outcome.last_log_index_before_we_became_leader + 1
            };
            ship_from(ctx, outcome, member)?;
        }
    }
    Ok(())
}

fn append_new_entry(
    ctx: &ReadableRaftState<'_>,
    outcome: &mut Outcome,
    request: &NewEntryRequest,
) -> Result<(), RaftError> {
    let prev_index = ctx.log.append_index()
        + outcome.appended_entries().count() as LogIndex;
    let prev_term = term_at(ctx, outcome, prev_index)?.unwrap_or_default();
    let new_index = prev_index + 1;
    let entry = LogEntry::new(outcome.term, request.content.clone());

    outcome.add_log_command(LogCommand::Append {
        first_index: new_index,
        entries: vec![entry.clone()],
    });

    let followers: Vec<MemberId> = outcome.follower_states.keys().copied().collect();
    for member in followers {
        let Some(follower) = outcome.follower_states.get_mut(&member) else {
            continue;
        };
        // only followers that are in step get the entry right away
        if follower.next_index != new_index {
            continue;
        }
        follower.next_index = new_index + 1;
        outcome.send(
            member,
            RaftMessage::AppendEntriesRequest(AppendEntriesRequest {
                from: ctx.state.myself,
                leader_term: outcome.term,
                prev_log_index: prev_index,
                prev_log_term: prev_term,
                entries: vec![entry.clone()],
                leader_commit: outcome.commit_index,
            }),
        );
    }

    advance_commit_index(ctx, outcome, new_index)
}

fn handle_append_entries_response(
    ctx: &ReadableRaftState<'_>,
    outcome: &mut Outcome,
    response: &AppendEntriesResponse,
) -> Result<(), RaftError> {
    if response.term < outcome.term {
        return Ok(());
    }
    let append_index = ctx.log.append_index();
    let Some(follower) = outcome.follower_states.get_mut(&response.from) else {
        return Ok(());
    };

    if response.success {
        if response.match_index > follower.match_index {
            follower.match_index = response.match_index.min(append_index);
        }
        follower.next_index = follower.next_index.max(follower.match_index + 1);
        let lagging = follower.next_index <= append_index;

        advance_commit_index(ctx, outcome, append_index)?;
        if lagging {
            ship_from(ctx, outcome, response.from)?;
        }
    } else {
        let retry_from = (response.append_index + 1)
            .min(follower.next_index - 1)
            .max(0);
        follower.next_index = retry_from;
        ship_from(ctx, outcome, response.from)?;
    }
    Ok(())
}

/// How many leading entries fit in `limit` marshalled bytes; never fewer than one
fn batch_len(entries: &[LogEntry], limit: usize) -> usize {
    let mut total = 0usize;
    entries
        .iter()
        .position(|entry| {
            total = total.saturating_add(8 + entry.content.marshalled_size());
            total > limit
        })
        .map_or(entries.len(), |over| over.max(1))
}

/// Send the follower a batch starting at its `next_index`, or tell it that
/// those entries are gone
fn ship_from(
    ctx: &ReadableRaftState<'_>,
    outcome: &mut Outcome,
    member: MemberId,
) -> Result<(), RaftError> {
    let Some(follower) = outcome.follower_states.get(&member).copied() else {
        return Ok(());
    };
    let prev_log_index = follower.next_index - 1;

    let prev_log_term = match ctx.log.read_entry_term(prev_log_index)? {
        Some(term) if prev_log_index >= ctx.log.prev_index() => term,
        _ => {
            outcome.send(
                member,
                RaftMessage::LogCompactionInfo(LogCompactionInfo {
                    from: ctx.state.myself,
                    leader_term: outcome.term,
                    prev_index: ctx.log.prev_index(),
                }),
            );
            return Ok(());
        }
    };

    let mut entries = ctx.log.entries(follower.next_index, ctx.state.catchup_batch_size)?;
    entries.truncate(batch_len(&entries, ctx.state.catchup_batch_bytes));
    let sent = entries.len() as LogIndex;
    outcome.send(
        member,
        RaftMessage::AppendEntriesRequest(AppendEntriesRequest {
            from: ctx.state.myself,
            leader_term: outcome.term,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: outcome.commit_index,
        }),
    );
    if let Some(follower) = outcome.follower_states.get_mut(&member) {
        follower.next_index += sent;
    }
    Ok(())
}
