//! Protocol identities, what a member supports, and the negotiated stack.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const RAFT_CATEGORY: &str = "raft";
pub const COMPRESSION_CATEGORY: &str = "compression";

/// Raft wire versions this build can speak
pub const RAFT_VERSIONS: [u32; 1] = [1];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationProtocol {
    pub category: String,
    pub version: u32,
}

impl ApplicationProtocol {
    pub fn new(category: impl Into<String>, version: u32) -> Self {
        Self {
            category: category.into(),
            version,
        }
    }

    pub fn raft(version: u32) -> Self {
        Self::new(RAFT_CATEGORY, version)
    }
}

/// An optional transform layered under the application protocol
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModifierProtocol {
    pub category: String,
    pub implementation: String,
}

impl ModifierProtocol {
    pub fn new(category: impl Into<String>, implementation: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            implementation: implementation.into(),
        }
    }
}

/// Outcome of a handshake. Modifier order is the order they are applied outbound.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolStack {
    pub application: ApplicationProtocol,
    pub modifiers: Vec<ModifierProtocol>,
}

impl ProtocolStack {
    pub fn new(application: ApplicationProtocol, modifiers: Vec<ModifierProtocol>) -> Self {
        Self {
            application,
            modifiers,
        }
    }
}

impl fmt::Display for ProtocolStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} version:{}", self.application.category, self.application.version)?;
        if !self.modifiers.is_empty() {
            let names: Vec<&str> = self.modifiers.iter().map(|m| m.implementation.as_str()).collect();
            write!(f, " ({})", names.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedApplicationProtocol {
    pub category: String,
    pub versions: Vec<u32>,
}

/// Implementations of one modifier category, most preferred first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedModifierProtocol {
    pub category: String,
    pub implementations: Vec<String>,
}

/// Everything one end is willing to speak
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedProtocols {
    pub application: SupportedApplicationProtocol,
    #[serde(default)]
    pub modifiers: Vec<SupportedModifierProtocol>,
}

impl Default for SupportedProtocols {
    /// raft at every known version, snappy then lz4 compression
    fn default() -> Self {
        Self {
            application: SupportedApplicationProtocol {
                category: RAFT_CATEGORY.to_string(),
                versions: RAFT_VERSIONS.to_vec(),
            },
            modifiers: vec![SupportedModifierProtocol {
                category: COMPRESSION_CATEGORY.to_string(),
                implementations: vec!["Snappy".to_string(), "LZ4".to_string()],
            }],
        }
    }
}

impl SupportedProtocols {
    pub fn modifier_category(&self, category: &str) -> Option<&SupportedModifierProtocol> {
        self.modifiers.iter().find(|m| m.category == category)
    }

    /// Same application versions, no modifiers
    pub fn without_modifiers(&self) -> Self {
        Self {
            application: self.application.clone(),
            modifiers: Vec::new(),
        }
    }
}
