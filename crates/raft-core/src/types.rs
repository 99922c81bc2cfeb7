//! # types
//!
//! why: give the primitive consensus quantities names the compiler can check
//! relations: used by every other module and by the storage/protocol crates
//! what: Term, LogIndex, MemberId, ClusterId

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical election epoch. Never decreases for a given member.
pub type Term = u64;

/// Position in the replicated log. The first entry has index 0.
pub type LogIndex = i64;

/// Sentinel for "no index", e.g. the append index of an empty log.
pub const NO_INDEX: LogIndex = -1;

/// Stable identity of a cluster member
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(pub u64);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "member-{}", self.0)
    }
}

impl From<u64> for MemberId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Identity of the cluster a message belongs to.
///
/// Messages stamped with a foreign cluster id are dropped by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ClusterId(pub u128);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_ids_order_by_value() {
        let mut ids = vec![MemberId(3), MemberId(1), MemberId(2)];
        ids.sort();
        assert_eq!(ids, vec![MemberId(1), MemberId(2), MemberId(3)]);
    }

    #[test]
    fn cluster_id_displays_as_fixed_width_hex() {
        assert_eq!(ClusterId(0xab).to_string().len(), 32);
        assert!(ClusterId(0xab).to_string().ends_with("ab"));
    }
}
