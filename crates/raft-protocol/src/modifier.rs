//! Compression transforms a handshake may layer under the raft codec.

use crate::error::CodecError;
use crate::handshake::protocols::{ModifierProtocol, COMPRESSION_CATEGORY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Snappy,
    Lz4,
}

impl Modifier {
    pub const ALL: [Modifier; 2] = [Modifier::Snappy, Modifier::Lz4];

    pub fn implementation(self) -> &'static str {
        match self {
            Self::Snappy => "Snappy",
            Self::Lz4 => "LZ4",
        }
    }

    pub fn category(self) -> &'static str {
        COMPRESSION_CATEGORY
    }

    pub fn protocol(self) -> ModifierProtocol {
        ModifierProtocol::new(self.category(), self.implementation())
    }

    pub fn from_protocol(protocol: &ModifierProtocol) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.category() == protocol.category && m.implementation() == protocol.implementation)
    }

    pub fn encode(self, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::Snappy => snap::raw::Encoder::new()
                .compress_vec(payload)
                .map_err(|e| self.failure(e)),
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(payload)),
        }
    }

    pub fn decode(self, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::Snappy => snap::raw::Decoder::new()
                .decompress_vec(payload)
                .map_err(|e| self.failure(e)),
            Self::Lz4 => lz4_flex::decompress_size_prepended(payload).map_err(|e| self.failure(e)),
        }
    }

    fn failure(self, error: impl std::fmt::Display) -> CodecError {
        CodecError::Modifier {
            modifier: self.implementation().to_string(),
            reason: error.to_string(),
        }
    }
}
