//! # handshake
//!
//! why: two members must agree on how to talk before any raft message flows
//! relations: run by raft-runtime's transport on every new connection; the
//! resulting ProtocolStack builds a pipeline::Pipeline
//! what: protocol identities, pure negotiation rules, wire messages, client
//! and server drivers

pub mod client;
pub mod messages;
pub mod negotiation;
pub mod protocols;
pub mod server;

pub use client::initiate;
pub use negotiation::negotiate;
pub use protocols::{
    ApplicationProtocol, ModifierProtocol, ProtocolStack, SupportedApplicationProtocol,
    SupportedModifierProtocol, SupportedProtocols,
};
pub use server::{accept, HandshakeServer};
