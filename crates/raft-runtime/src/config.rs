//! # config
//!
//! why: one json file per member describes the cluster, the log store and
//! the consensus timings
//! relations: embeds raft_core::RaftConfig, raft_storage::LogConfig and
//! raft_protocol::SupportedProtocols; read by main.rs
//! what: ClusterConfig, MemberAddress, ConfigError

use raft_core::{ClusterId, MemberId, RaftConfig};
use raft_protocol::SupportedProtocols;
use raft_storage::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberAddress {
    pub id: MemberId,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub cluster_id: ClusterId,
    pub member_id: MemberId,
    /// Every voting member, this one included
    pub members: Vec<MemberAddress>,
    pub listen_address: String,
    #[serde(default)]
    pub raft: RaftConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub protocols: SupportedProtocols,
    /// How long a replicate call waits for its result, in milliseconds
    #[serde(default = "default_replicate_timeout")]
    pub replicate_timeout: u64,
    /// tracing filter directive; RUST_LOG wins when set
    #[serde(default)]
    pub log_filter: Option<String>,
}

fn default_replicate_timeout() -> u64 {
    10_000
}

impl ClusterConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.raft
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.members.is_empty() {
            return Err(ConfigError::Invalid("members must not be empty".into()));
        }
        if !self.members.iter().any(|m| m.id == self.member_id) {
            return Err(ConfigError::Invalid(format!(
                "member_id {} is not listed in members",
                self.member_id
            )));
        }
        let mut ids: Vec<MemberId> = self.members.iter().map(|m| m.id).collect();
        ids.sort();
        ids.dedup();
        if ids.len() != self.members.len() {
            return Err(ConfigError::Invalid("members contains a duplicate id".into()));
        }

        self.log
            .strategy()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.protocols.application.versions.is_empty() {
            return Err(ConfigError::Invalid("no application protocol versions".into()));
        }
        Ok(())
    }

    pub fn member_ids(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.members.iter().map(|m| m.id)
    }

    /// Everyone but this member
    pub fn peers(&self) -> impl Iterator<Item = &MemberAddress> + '_ {
        self.members.iter().filter(move |m| m.id != self.member_id)
    }

    pub fn replicate_timeout(&self) -> Duration {
        Duration::from_millis(self.replicate_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "cluster_id": 42,
        "member_id": 1,
        "members": [
            {"id": 1, "address": "127.0.0.1:7001"},
            {"id": 2, "address": "127.0.0.1:7002"},
            {"id": 3, "address": "127.0.0.1:7003"}
        ],
        "listen_address": "127.0.0.1:7001",
        "log": {"directory": "/tmp/raft-1", "pruning_strategy": "5 files"}
    }"#;

    #[test]
    fn minimal_file_takes_defaults() {
        let config: ClusterConfig = serde_json::from_str(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.cluster_id, ClusterId(42));
        assert_eq!(config.raft, RaftConfig::default());
        assert_eq!(config.replicate_timeout(), Duration::from_secs(10));
        assert_eq!(config.peers().count(), 2);
        assert_eq!(config.log.rotation_size, LogConfig::default().rotation_size);
    }

    #[test]
    fn member_must_be_listed() {
        let mut config: ClusterConfig = serde_json::from_str(MINIMAL).unwrap();
        config.member_id = MemberId(9);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn heartbeat_must_undercut_election_timeout() {
        let mut config: ClusterConfig = serde_json::from_str(MINIMAL).unwrap();
        config.raft.heartbeat_interval = config.raft.election_timeout_min;
        assert!(config.validate().is_err());
    }

    #[test]
    fn pruning_strategy_must_parse() {
        let mut config: ClusterConfig = serde_json::from_str(MINIMAL).unwrap();
        config.log.pruning_strategy = "lots".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = ClusterConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }
}
