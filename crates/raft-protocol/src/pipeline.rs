//! # pipeline
//!
//! why: once a handshake settles the stack, every frame passes the same
//! stages in a fixed order: codec, modifiers, length frame on the way out
//! and the reverse on the way in
//! relations: built from a handshake::ProtocolStack by raft-runtime's transport
//! what: Pipeline

use crate::codec::{DecodedMessage, RaftMessageDecoder, RaftMessageEncoder};
use crate::error::CodecError;
use crate::framing::{self, DEFAULT_MAX_FRAME};
use crate::handshake::protocols::{ProtocolStack, RAFT_CATEGORY, RAFT_VERSIONS};
use crate::modifier::Modifier;
use bytes::BytesMut;
use raft_core::ClusterIdAwareMessage;

#[derive(Debug)]
pub struct Pipeline {
    stack: ProtocolStack,
    modifiers: Vec<Modifier>,
    encoder: RaftMessageEncoder,
    decoder: RaftMessageDecoder,
    max_frame: usize,
}

impl Pipeline {
    pub fn new(stack: ProtocolStack, max_entry_size: usize) -> Result<Self, CodecError> {
        let application = &stack.application;
        if application.category != RAFT_CATEGORY || !RAFT_VERSIONS.contains(&application.version) {
            return Err(CodecError::UnsupportedProtocol(stack.to_string()));
        }
        let modifiers = stack
            .modifiers
            .iter()
            .map(|protocol| {
                Modifier::from_protocol(protocol)
                    .ok_or_else(|| CodecError::UnsupportedProtocol(protocol.implementation.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            stack,
            modifiers,
            encoder: RaftMessageEncoder::new(max_entry_size),
            decoder: RaftMessageDecoder,
            max_frame: DEFAULT_MAX_FRAME,
        })
    }

    pub fn stack(&self) -> &ProtocolStack {
        &self.stack
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    /// Append one complete frame for `message` to `out`. On error `out` is untouched.
    pub fn outbound(&self, message: &ClusterIdAwareMessage, out: &mut BytesMut) -> Result<(), CodecError> {
        let mut payload = BytesMut::new();
        self.encoder.encode(message, &mut payload)?;

        let mut payload = payload.to_vec();
        for modifier in &self.modifiers {
            payload = modifier.encode(&payload)?;
        }
        if payload.len() > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                size: payload.len(),
                limit: self.max_frame,
            });
        }
        framing::put_frame(out, &payload);
        Ok(())
    }

    /// Decode the payload of one frame (length already stripped)
    pub fn inbound(&self, payload: &[u8]) -> Result<DecodedMessage, CodecError> {
        let mut payload = payload.to_vec();
        for modifier in self.modifiers.iter().rev() {
            payload = modifier.decode(&payload)?;
        }
        self.decoder.decode(&payload)
    }
}
