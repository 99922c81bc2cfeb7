//! Follower side of replication: AppendEntries, heartbeats, compaction info.

use crate::error::RaftError;
use crate::message::{
    AppendEntriesRequest, AppendEntriesResponse, Heartbeat, LogCompactionInfo, RaftMessage,
};
use crate::node::NodeState;
use crate::outcome::{LogCommand, Outcome};
use crate::state::ReadableRaftState;
use crate::types::{LogIndex, Term, NO_INDEX};

fn log_has_entry(
    ctx: &ReadableRaftState<'_>,
    index: LogIndex,
    term: Term,
) -> Result<bool, RaftError> {
    Ok(ctx.log.read_entry_term(index)? == Some(term))
}

/// Contact from the legitimate leader of `term`
fn accept_leader(outcome: &mut Outcome, leader_term: Term, from: crate::MemberId) {
    outcome.set_next_term(leader_term);
    outcome.set_role(NodeState::Follower);
    outcome.votes_for_me.clear();
    outcome.pre_votes_for_me.clear();
    outcome.leader = Some(from);
    outcome.renew_election_timeout = true;
}

fn respond(
    ctx: &ReadableRaftState<'_>,
    outcome: &mut Outcome,
    to: crate::MemberId,
    success: bool,
    match_index: LogIndex,
    append_index: LogIndex,
) {
    outcome.send(
        to,
        RaftMessage::AppendEntriesResponse(AppendEntriesResponse {
            from: ctx.state.myself,
            term: outcome.term,
            success,
            match_index,
            append_index,
        }),
    );
}

pub(crate) fn handle_append_entries_request(
    ctx: &ReadableRaftState<'_>,
    outcome: &mut Outcome,
    request: &AppendEntriesRequest,
) -> Result<(), RaftError> {
    let append_index = ctx.log.append_index();

    if request.leader_term < outcome.term {
        respond(ctx, outcome, request.from, false, NO_INDEX, append_index);
        return Ok(());
    }

    accept_leader(outcome, request.leader_term, request.from);
    outcome.leader_commit = request.leader_commit;

    if !log_has_entry(ctx, request.prev_log_index, request.prev_log_term)? {
        tracing::debug!(
            prev_log_index = request.prev_log_index,
            prev_log_term = request.prev_log_term,
            append_index,
            "append entries does not match local log"
        );
        respond(ctx, outcome, request.from, false, NO_INDEX, append_index);
        return Ok(());
    }

    // skip entries we already hold, truncate at the first conflict
    let mut offset = 0;
    while offset < request.entries.len() {
        let index = request.prev_log_index + 1 + offset as LogIndex;
        if index > append_index {
            break;
        }
        if ctx.log.read_entry_term(index)? == Some(request.entries[offset].term) {
            offset += 1;
            continue;
        }
        if index <= outcome.commit_index {
            return Err(RaftError::SafetyViolation(format!(
                "leader {} asked to overwrite committed index {index} (commit index {})",
                request.from, outcome.commit_index
            )));
        }
        outcome.add_log_command(LogCommand::Truncate { from_index: index });
        break;
    }

    let end_match_index = request.prev_log_index + request.entries.len() as LogIndex;
    let new_append_index = if offset < request.entries.len() {
        outcome.add_log_command(LogCommand::Append {
            first_index: request.prev_log_index + 1 + offset as LogIndex,
            entries: request.entries[offset..].to_vec(),
        });
        end_match_index
    } else {
        append_index
    };

    outcome.advance_commit_index(request.leader_commit.min(end_match_index));
    respond(ctx, outcome, request.from, true, end_match_index, new_append_index);
    Ok(())
}

pub(crate) fn handle_heartbeat(
    ctx: &ReadableRaftState<'_>,
    outcome: &mut Outcome,
    heartbeat: &Heartbeat,
) -> Result<(), RaftError> {
    if heartbeat.leader_term < outcome.term {
        return Ok(());
    }

    accept_leader(outcome, heartbeat.leader_term, heartbeat.from);
    outcome.leader_commit = heartbeat.commit_index;

    // our log matches the leader's up to its commit index only if the terms agree there
    if log_has_entry(ctx, heartbeat.commit_index, heartbeat.commit_index_term)? {
        outcome.advance_commit_index(heartbeat.commit_index);
    }

    outcome.send(
        heartbeat.from,
        RaftMessage::HeartbeatResponse {
            from: ctx.state.myself,
        },
    );
    Ok(())
}

pub(crate) fn handle_log_compaction_info(
    ctx: &ReadableRaftState<'_>,
    outcome: &mut Outcome,
    info: &LogCompactionInfo,
) {
    if info.leader_term < outcome.term {
        return;
    }
    accept_leader(outcome, info.leader_term, info.from);
    if info.prev_index > ctx.log.append_index() {
        tracing::warn!(
            leader = %info.from,
            leader_prev_index = info.prev_index,
            append_index = ctx.log.append_index(),
            "leader has pruned entries we still need, a fresh snapshot is required"
        );
        outcome.needs_fresh_snapshot = true;
    }
}
