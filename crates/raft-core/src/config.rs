//! # config
//!
//! why: timing and sizing knobs the consensus core consumes
//! relations: embedded in raft-runtime's ClusterConfig, read by node.rs and the
//! runtime's timers
//! what: RaftConfig with defaults and validation

use crate::error::RaftError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 1 GiB, the largest entry a client may submit
pub const DEFAULT_MAX_ENTRY_SIZE: usize = 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// Lower bound of the randomized election timeout, in milliseconds
    pub election_timeout_min: u64,
    /// Upper bound of the randomized election timeout, in milliseconds
    pub election_timeout_max: u64,
    /// Fixed leader heartbeat interval, in milliseconds
    pub heartbeat_interval: u64,
    /// Run a pre-vote round before incrementing the term
    pub pre_vote: bool,
    /// Maximum entries shipped in one AppendEntries to a lagging follower
    pub catchup_batch_size: usize,
    /// Maximum marshalled size of a client-submitted entry
    pub max_entry_size: usize,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
            pre_vote: true,
            catchup_batch_size: 64,
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
        }
    }
}

impl RaftConfig {
    pub fn validate(&self) -> Result<(), RaftError> {
        if self.election_timeout_min > self.election_timeout_max {
            return Err(RaftError::Config(format!(
                "election_timeout_min ({}) is greater than election_timeout_max ({})",
                self.election_timeout_min, self.election_timeout_max
            )));
        }
        if self.heartbeat_interval == 0 || self.heartbeat_interval >= self.election_timeout_min {
            return Err(RaftError::Config(format!(
                "heartbeat_interval ({}) must be positive and below election_timeout_min ({})",
                self.heartbeat_interval, self.election_timeout_min
            )));
        }
        if self.catchup_batch_size == 0 {
            return Err(RaftError::Config("catchup_batch_size must be positive".into()));
        }
        Ok(())
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    pub fn election_timeout_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.election_timeout_min),
            Duration::from_millis(self.election_timeout_max),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RaftConfig::default();
        assert_eq!(config.election_timeout_min, 150);
        assert_eq!(config.election_timeout_max, 300);
        assert_eq!(config.heartbeat_interval, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn heartbeat_must_be_below_election_timeout() {
        let config = RaftConfig {
            heartbeat_interval: 150,
            ..RaftConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_timeout_range_is_rejected() {
        let config = RaftConfig {
            election_timeout_min: 400,
            election_timeout_max: 200,
            ..RaftConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: RaftConfig = serde_json::from_str(r#"{"pre_vote": false}"#).unwrap();
        assert!(!config.pre_vote);
        assert_eq!(config.heartbeat_interval, 50);
    }
}
