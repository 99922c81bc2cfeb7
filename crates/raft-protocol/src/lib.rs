//! # raft-protocol
//!
//! why: members on different machines and versions need a stable binary
//! format and a way to agree on optional transforms before talking raft
//! relations: encodes raft-core messages; raft-runtime runs the handshake and
//! pipelines over tcp
//! what: length framing, message codec, compression modifiers, per-connection
//! pipeline, handshake negotiation

pub mod codec;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod modifier;
pub mod pipeline;

pub use codec::{DecodedMessage, RaftMessageDecoder, RaftMessageEncoder};
pub use error::{CodecError, NegotiationError};
pub use handshake::{ProtocolStack, SupportedProtocols};
pub use modifier::Modifier;
pub use pipeline::Pipeline;
