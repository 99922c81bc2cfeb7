//! # content
//!
//! why: the commands that travel through the log are a closed set, so they are
//! one enum that the log store, the codec and the dispatcher all match on
//! relations: stored in log.rs entries, encoded by raft-protocol, applied by
//! raft-runtime's dispatcher
//! what: ReplicatedContent, IdAllocationRequest, IdType, binary marshal

use crate::error::MarshalError;
use crate::marshal::{self, get_i32, get_i64, get_member, get_u8, put_member};
use crate::types::MemberId;
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

const TAG_TRANSACTION: u8 = 0;
const TAG_ID_ALLOCATION: u8 = 1;
const TAG_NEW_LEADER_BARRIER: u8 = 2;
const TAG_MEMBER_SET: u8 = 3;
const TAG_DUMMY: u8 = 4;

/// Kinds of store id that are handed out in replicated ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IdType {
    Node,
    Relationship,
    Property,
    StringBlock,
    ArrayBlock,
    PropertyKeyToken,
    LabelToken,
    RelationshipTypeToken,
    Schema,
}

impl IdType {
    pub const ALL: [IdType; 9] = [
        IdType::Node,
        IdType::Relationship,
        IdType::Property,
        IdType::StringBlock,
        IdType::ArrayBlock,
        IdType::PropertyKeyToken,
        IdType::LabelToken,
        IdType::RelationshipTypeToken,
        IdType::Schema,
    ];

    pub fn ordinal(self) -> i32 {
        Self::ALL.iter().position(|t| *t == self).unwrap_or_default() as i32
    }

    pub fn from_ordinal(ordinal: i32) -> Result<Self, MarshalError> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(MarshalError::UnknownIdType(ordinal))
    }
}

/// Request to claim `[range_start, range_start + range_length)` for `owner`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdAllocationRequest {
    pub owner: MemberId,
    pub id_type: IdType,
    pub range_start: i64,
    pub range_length: i32,
}

/// Payload of a log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicatedContent {
    /// Serialized transaction for the storage engine
    Transaction(Vec<u8>),
    IdAllocation(IdAllocationRequest),
    /// Appended by a new leader in its own term
    NewLeaderBarrier,
    MemberSet(Vec<MemberId>),
    /// Opaque payload used to measure replication throughput
    Dummy(Vec<u8>),
}

impl ReplicatedContent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transaction(_) => "transaction",
            Self::IdAllocation(_) => "id-allocation",
            Self::NewLeaderBarrier => "new-leader-barrier",
            Self::MemberSet(_) => "member-set",
            Self::Dummy(_) => "dummy",
        }
    }

    /// Exact number of bytes [`marshal`](Self::marshal) will write
    pub fn marshalled_size(&self) -> usize {
        1 + match self {
            Self::Transaction(bytes) | Self::Dummy(bytes) => 4 + bytes.len(),
            Self::IdAllocation(_) => 8 + 4 + 8 + 4,
            Self::NewLeaderBarrier => 0,
            Self::MemberSet(members) => 4 + 8 * members.len(),
        }
    }

    pub fn marshal(&self, buf: &mut impl BufMut) {
        match self {
            Self::Transaction(bytes) => {
                buf.put_u8(TAG_TRANSACTION);
                marshal::put_bytes(buf, bytes);
            }
            Self::IdAllocation(request) => {
                buf.put_u8(TAG_ID_ALLOCATION);
                put_member(buf, request.owner);
                buf.put_i32(request.id_type.ordinal());
                buf.put_i64(request.range_start);
                buf.put_i32(request.range_length);
            }
            Self::NewLeaderBarrier => buf.put_u8(TAG_NEW_LEADER_BARRIER),
            Self::MemberSet(members) => {
                buf.put_u8(TAG_MEMBER_SET);
                buf.put_i32(members.len() as i32);
                for member in members {
                    put_member(buf, *member);
                }
            }
            Self::Dummy(bytes) => {
                buf.put_u8(TAG_DUMMY);
                marshal::put_bytes(buf, bytes);
            }
        }
    }

    pub fn unmarshal(buf: &mut impl Buf) -> Result<Self, MarshalError> {
        match get_u8(buf)? {
            TAG_TRANSACTION => Ok(Self::Transaction(marshal::get_bytes(buf)?)),
            TAG_ID_ALLOCATION => {
                let owner = get_member(buf)?;
                let id_type = IdType::from_ordinal(get_i32(buf)?)?;
                let range_start = get_i64(buf)?;
                let range_length = get_i32(buf)?;
                Ok(Self::IdAllocation(IdAllocationRequest {
                    owner,
                    id_type,
                    range_start,
                    range_length,
                }))
            }
            TAG_NEW_LEADER_BARRIER => Ok(Self::NewLeaderBarrier),
            TAG_MEMBER_SET => {
                let count = get_i32(buf)?;
                if count < 0 {
                    return Err(MarshalError::InvalidLength(count as i64));
                }
                marshal::ensure_remaining(buf, count as usize * 8)?;
                let members = (0..count)
                    .map(|_| get_member(buf))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::MemberSet(members))
            }
            TAG_DUMMY => Ok(Self::Dummy(marshal::get_bytes(buf)?)),
            other => Err(MarshalError::UnknownContentType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(content: ReplicatedContent) {
        let mut out = Vec::new();
        content.marshal(&mut out);
        assert_eq!(out.len(), content.marshalled_size(), "size of {}", content.kind());
        let mut buf = &out[..];
        assert_eq!(ReplicatedContent::unmarshal(&mut buf).unwrap(), content);
        assert!(buf.is_empty());
    }

    #[test]
    fn every_kind_survives_marshalling() {
        roundtrip(ReplicatedContent::Transaction(b"CREATE (n)".to_vec()));
        roundtrip(ReplicatedContent::IdAllocation(IdAllocationRequest {
            owner: MemberId(7),
            id_type: IdType::Relationship,
            range_start: 1024,
            range_length: 512,
        }));
        roundtrip(ReplicatedContent::NewLeaderBarrier);
        roundtrip(ReplicatedContent::MemberSet(vec![MemberId(1), MemberId(2)]));
        roundtrip(ReplicatedContent::Dummy(vec![0; 64]));
    }

    #[test]
    fn unknown_tag_is_reported() {
        let mut buf: &[u8] = &[99];
        assert!(matches!(
            ReplicatedContent::unmarshal(&mut buf),
            Err(MarshalError::UnknownContentType(99))
        ));
    }

    #[test]
    fn truncated_transaction_is_reported() {
        let mut out = Vec::new();
        ReplicatedContent::Transaction(vec![1, 2, 3, 4]).marshal(&mut out);
        out.truncate(out.len() - 1);
        let mut buf = &out[..];
        assert!(matches!(
            ReplicatedContent::unmarshal(&mut buf),
            Err(MarshalError::EndOfBuffer { .. })
        ));
    }

    #[test]
    fn id_type_ordinals_are_stable() {
        for id_type in IdType::ALL {
            assert_eq!(IdType::from_ordinal(id_type.ordinal()).unwrap(), id_type);
        }
        assert!(IdType::from_ordinal(-1).is_err());
        assert!(IdType::from_ordinal(9).is_err());
    }
}
