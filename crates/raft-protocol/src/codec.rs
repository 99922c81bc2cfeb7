//! # codec
//!
//! why: put raft messages on the wire in a fixed binary layout that every
//! member version can read
//! relations: wraps raft_core::ReplicatedContent marshalling; pipeline.rs adds
//! modifiers and framing around the payload produced here
//! what: RaftMessageEncoder, RaftMessageDecoder, DecodedMessage
//!
//! payload layout (frame length is added later):
//!
//! ```text
//! cluster id   u128
//! ordinal      i32
//! from         u64
//! body         depends on ordinal
//! ```

use crate::error::CodecError;
use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use raft_core::config::DEFAULT_MAX_ENTRY_SIZE;
use raft_core::marshal::{self, get_bool, get_i32, get_i64, get_member, get_u64, put_bool, put_member};
use raft_core::message::{
    AppendEntriesRequest, AppendEntriesResponse, Heartbeat, LogCompactionInfo, NewEntryRequest,
    VoteRequest, VoteResponse,
};
use raft_core::{
    ClusterId, ClusterIdAwareMessage, LogEntry, MemberId, MessageType, RaftMessage,
    ReplicatedContent,
};

/// cluster id + ordinal + sender
pub const HEADER_SIZE: usize = 16 + 4 + 8;

/// Result of decoding one payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedMessage {
    Message(ClusterIdAwareMessage),
    /// A message kind this version does not know; callers drop it
    Unknown {
        cluster_id: ClusterId,
        ordinal: i32,
        from: MemberId,
    },
}

/// Encodes messages for one connection.
///
/// Calls are serialized so frames from concurrent senders never interleave.
#[derive(Debug)]
pub struct RaftMessageEncoder {
    max_entry_size: usize,
    scratch: Mutex<BytesMut>,
}

impl Default for RaftMessageEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRY_SIZE)
    }
}

impl RaftMessageEncoder {
    pub fn new(max_entry_size: usize) -> Self {
        Self {
            max_entry_size,
            scratch: Mutex::new(BytesMut::with_capacity(1024)),
        }
    }

    pub fn max_entry_size(&self) -> usize {
        self.max_entry_size
    }

    /// Append the payload for `message` to `out`. On error `out` is untouched.
    pub fn encode(&self, message: &ClusterIdAwareMessage, out: &mut BytesMut) -> Result<(), CodecError> {
        let inner = &message.message;
        let kind = inner.message_type();
        if !kind.is_network() {
            return Err(CodecError::NotNetwork(kind));
        }
        if let RaftMessage::NewEntryRequest(request) = inner {
            let size = request.content.marshalled_size();
            if size > self.max_entry_size {
                return Err(CodecError::EntryTooLarge {
                    size,
                    limit: self.max_entry_size,
                });
            }
        }

        let mut scratch = self.scratch.lock();
        scratch.clear();
        scratch.put_u128(message.cluster_id.0);
        scratch.put_i32(kind.ordinal());
        put_member(&mut *scratch, inner.from());
        encode_body(inner, &mut scratch);

        out.extend_from_slice(&scratch);
        Ok(())
    }
}

fn encode_body(message: &RaftMessage, buf: &mut BytesMut) {
    match message {
        RaftMessage::VoteRequest(request) | RaftMessage::PreVoteRequest(request) => {
            put_member(buf, request.candidate);
            buf.put_u64(request.term);
            buf.put_i64(request.last_log_index);
            buf.put_u64(request.last_log_term);
        }
        RaftMessage::VoteResponse(response) | RaftMessage::PreVoteResponse(response) => {
            buf.put_u64(response.term);
            put_bool(buf, response.vote_granted);
        }
        RaftMessage::AppendEntriesRequest(request) => {
            buf.put_u64(request.leader_term);
            buf.put_i64(request.prev_log_index);
            buf.put_u64(request.prev_log_term);
            buf.put_i64(request.leader_commit);
            buf.put_i64(request.entries.len() as i64);
            for entry in &request.entries {
                buf.put_u64(entry.term);
                entry.content.marshal(buf);
            }
        }
        RaftMessage::AppendEntriesResponse(response) => {
            buf.put_u64(response.term);
            put_bool(buf, response.success);
            buf.put_i64(response.match_index);
            buf.put_i64(response.append_index);
        }
        RaftMessage::NewEntryRequest(request) => request.content.marshal(buf),
        RaftMessage::Heartbeat(heartbeat) => {
            buf.put_u64(heartbeat.leader_term);
            buf.put_u64(heartbeat.commit_index_term);
            buf.put_i64(heartbeat.commit_index);
        }
        RaftMessage::HeartbeatResponse { .. } => {}
        RaftMessage::LogCompactionInfo(info) => {
            buf.put_u64(info.leader_term);
            buf.put_i64(info.prev_index);
        }
        // refused in encode()
        RaftMessage::ElectionTimeout { .. }
        | RaftMessage::HeartbeatTimeout { .. }
        | RaftMessage::PruneRequest { .. } => {}
    }
}

/// Stateless; one instance can serve any number of connections
#[derive(Debug, Clone, Copy, Default)]
pub struct RaftMessageDecoder;

impl RaftMessageDecoder {
    pub fn decode(&self, payload: &[u8]) -> Result<DecodedMessage, CodecError> {
        let mut buf = payload;
        marshal::ensure_remaining(&buf, HEADER_SIZE)?;
        let cluster_id = ClusterId(buf.get_u128());
        let ordinal = get_i32(&mut buf)?;
        let from = get_member(&mut buf)?;

        let Some(kind) = MessageType::from_ordinal(ordinal) else {
            return Ok(DecodedMessage::Unknown {
                cluster_id,
                ordinal,
                from,
            });
        };
        let message = decode_body(kind, from, &mut buf)?;
        if buf.has_remaining() {
            return Err(CodecError::TrailingBytes(buf.remaining()));
        }
        Ok(DecodedMessage::Message(ClusterIdAwareMessage::new(cluster_id, message)))
    }
}

fn decode_vote_request(from: MemberId, buf: &mut &[u8]) -> Result<VoteRequest, CodecError> {
    Ok(VoteRequest {
        from,
        candidate: get_member(buf)?,
        term: get_u64(buf)?,
        last_log_index: get_i64(buf)?,
        last_log_term: get_u64(buf)?,
    })
}

fn decode_vote_response(from: MemberId, buf: &mut &[u8]) -> Result<VoteResponse, CodecError> {
    Ok(VoteResponse {
        from,
        term: get_u64(buf)?,
        vote_granted: get_bool(buf)?,
    })
}

fn decode_body(kind: MessageType, from: MemberId, buf: &mut &[u8]) -> Result<RaftMessage, CodecError> {
    let message = match kind {
        MessageType::VoteRequest => RaftMessage::VoteRequest(decode_vote_request(from, buf)?),
        MessageType::PreVoteRequest => RaftMessage::PreVoteRequest(decode_vote_request(from, buf)?),
        MessageType::VoteResponse => RaftMessage::VoteResponse(decode_vote_response(from, buf)?),
        MessageType::PreVoteResponse => RaftMessage::PreVoteResponse(decode_vote_response(from, buf)?),
        MessageType::AppendEntriesRequest => {
            let leader_term = get_u64(buf)?;
            let prev_log_index = get_i64(buf)?;
            let prev_log_term = get_u64(buf)?;
            let leader_commit = get_i64(buf)?;
            let count = get_i64(buf)?;
            if count < 0 {
                return Err(raft_core::MarshalError::InvalidLength(count).into());
            }
            // each entry is at least a term and a content tag
            marshal::ensure_remaining(&*buf, (count as usize).saturating_mul(9))?;
            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let term = get_u64(buf)?;
                let content = ReplicatedContent::unmarshal(buf)?;
                entries.push(LogEntry::new(term, content));
            }
            RaftMessage::AppendEntriesRequest(AppendEntriesRequest {
                from,
                leader_term,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            })
        }
        MessageType::AppendEntriesResponse => RaftMessage::AppendEntriesResponse(AppendEntriesResponse {
            from,
            term: get_u64(buf)?,
            success: get_bool(buf)?,
            match_index: get_i64(buf)?,
            append_index: get_i64(buf)?,
        }),
        MessageType::NewEntryRequest => RaftMessage::NewEntryRequest(NewEntryRequest {
            from,
            content: ReplicatedContent::unmarshal(buf)?,
        }),
        MessageType::Heartbeat => RaftMessage::Heartbeat(Heartbeat {
            from,
            leader_term: get_u64(buf)?,
            commit_index_term: get_u64(buf)?,
            commit_index: get_i64(buf)?,
        }),
        MessageType::HeartbeatResponse => RaftMessage::HeartbeatResponse { from },
        MessageType::LogCompactionInfo => RaftMessage::LogCompactionInfo(LogCompactionInfo {
            from,
            leader_term: get_u64(buf)?,
            prev_index: get_i64(buf)?,
        }),
        MessageType::ElectionTimeout | MessageType::HeartbeatTimeout | MessageType::PruneRequest => {
            return Err(CodecError::NotNetwork(kind))
        }
    };
    Ok(message)
}
