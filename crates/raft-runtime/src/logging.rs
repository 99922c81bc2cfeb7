//! Process-wide tracing setup and the raft message logger seam.

use raft_core::{MemberId, RaftMessage};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber. `RUST_LOG` wins over `configured`.
/// A second call is a no-op so tests and embedders can call it freely.
pub fn init(configured: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured.unwrap_or(DEFAULT_FILTER)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let layer = fmt::layer().with_target(true).with_thread_names(true);
    let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();
}

/// Sees every raft message that crosses the member boundary
pub trait MessageLogger: Send + Sync {
    fn log_outbound(&self, me: MemberId, message: &RaftMessage, remote: MemberId);
    fn log_inbound(&self, remote: MemberId, message: &RaftMessage, me: MemberId);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullMessageLogger;

impl MessageLogger for NullMessageLogger {
    fn log_outbound(&self, _me: MemberId, _message: &RaftMessage, _remote: MemberId) {}

    fn log_inbound(&self, _remote: MemberId, _message: &RaftMessage, _me: MemberId) {}
}

/// Logs each message at trace level under the `raft_messages` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMessageLogger;

impl MessageLogger for TracingMessageLogger {
    fn log_outbound(&self, me: MemberId, message: &RaftMessage, remote: MemberId) {
        tracing::trace!(target: "raft_messages", from = %me, to = %remote, kind = ?message.message_type(), ?message, "outbound");
    }

    fn log_inbound(&self, remote: MemberId, message: &RaftMessage, me: MemberId) {
        tracing::trace!(target: "raft_messages", from = %remote, to = %me, kind = ?message.message_type(), ?message, "inbound");
    }
}
