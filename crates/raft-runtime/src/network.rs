//! # network
//!
//! why: members talk raft over tcp, one negotiated connection per direction
//! per peer, without the actor ever waiting on a socket
//! relations: implements server::Outbound; feeds inbound messages to a
//! RaftHandle; runs raft_protocol's handshake and Pipeline on every stream
//! what: TransportSettings, TcpTransport (outbound side), listen (inbound side)
//!
//! Each peer gets a task owning a bounded queue. The actor only ever does a
//! non-blocking push onto that queue; a full queue drops the message, which
//! raft tolerates.

use crate::config::{ClusterConfig, MemberAddress};
use crate::errors::{SendError, TransportError};
use crate::logging::MessageLogger;
use crate::server::{Outbound, RaftHandle};
use bytes::BytesMut;
use parking_lot::Mutex;
use raft_core::{ClusterId, ClusterIdAwareMessage, MemberId, RaftMessage};
use raft_protocol::framing::read_frame;
use raft_protocol::handshake::{accept, initiate};
use raft_protocol::{DecodedMessage, Pipeline, SupportedProtocols};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{JoinHandle, JoinSet};

pub const PEER_QUEUE_CAPACITY: usize = 256;
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// What both sides of the transport need to know about this member
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub myself: MemberId,
    pub cluster_id: ClusterId,
    pub protocols: SupportedProtocols,
    pub max_entry_size: usize,
}

impl TransportSettings {
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            myself: config.member_id,
            cluster_id: config.cluster_id,
            protocols: config.protocols.clone(),
            max_entry_size: config.raft.max_entry_size,
        }
    }
}

pub struct TcpTransport {
    settings: TransportSettings,
    queues: HashMap<MemberId, mpsc::Sender<RaftMessage>>,
    logger: Arc<dyn MessageLogger>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("myself", &self.settings.myself)
            .field("peers", &self.queues.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TcpTransport {
    /// Spawn one connection task per peer. Must run inside a tokio runtime.
    pub fn start(
        settings: TransportSettings,
        peers: impl IntoIterator<Item = MemberAddress>,
        logger: Arc<dyn MessageLogger>,
    ) -> Self {
        let mut queues = HashMap::new();
        let mut tasks = Vec::new();
        for peer in peers {
            if peer.id == settings.myself {
                continue;
            }
            let (tx, rx) = mpsc::channel(PEER_QUEUE_CAPACITY);
            queues.insert(peer.id, tx);
            tasks.push(tokio::spawn(run_peer(settings.clone(), peer, rx)));
        }
        Self {
            settings,
            queues,
            logger,
            tasks: Mutex::new(tasks),
        }
    }

    /// Stop every connection task; later sends fail with `Closed`
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Outbound for TcpTransport {
    fn send(&self, to: MemberId, message: RaftMessage) -> Result<(), SendError> {
        let queue = self.queues.get(&to).ok_or(SendError::UnknownMember(to))?;
        self.logger.log_outbound(self.settings.myself, &message, to);
        queue.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull(to),
            TrySendError::Closed(_) => SendError::Closed(to),
        })
    }
}

async fn connect(settings: &TransportSettings, address: &str) -> Result<(TcpStream, Pipeline), TransportError> {
    let mut stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;
    let stack = initiate(&settings.protocols, &mut stream).await?;
    let pipeline = Pipeline::new(stack, settings.max_entry_size)?;
    Ok((stream, pipeline))
}

async fn run_peer(settings: TransportSettings, peer: MemberAddress, mut queue: mpsc::Receiver<RaftMessage>) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let (mut stream, pipeline) = match connect(&settings, &peer.address).await {
            Ok(connected) => connected,
            Err(e) => {
                tracing::debug!(peer = %peer.id, address = %peer.address, error = %e, ?backoff, "connect failed");
                // whatever queued up meanwhile is stale
                loop {
                    match queue.try_recv() {
                        Ok(_) => continue,
                        Err(mpsc::error::TryRecvError::Empty) => break,
                        Err(mpsc::error::TryRecvError::Disconnected) => return,
                    }
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };
        backoff = INITIAL_BACKOFF;
        tracing::info!(peer = %peer.id, address = %peer.address, stack = %pipeline.stack(), "connected");

        let mut frame = BytesMut::new();
        loop {
            let Some(message) = queue.recv().await else {
                return;
            };
            frame.clear();
            let message = ClusterIdAwareMessage::new(settings.cluster_id, message);
            if let Err(e) = pipeline.outbound(&message, &mut frame) {
                tracing::warn!(peer = %peer.id, error = %e, kind = ?message.message.message_type(), "dropping unencodable message");
                if e.is_recoverable() {
                    continue;
                }
                break;
            }
            if let Err(e) = stream.write_all(&frame).await {
                tracing::warn!(peer = %peer.id, error = %e, "connection lost");
                break;
            }
        }
    }
}

/// Accept peer connections on `listener` until the task is aborted or the
/// listener fails. Connection tasks belong to this future: they are aborted
/// together with it.
pub async fn listen(
    listener: TcpListener,
    settings: TransportSettings,
    handle: RaftHandle,
    logger: Arc<dyn MessageLogger>,
) -> std::io::Result<()> {
    tracing::info!(member = %settings.myself, address = ?listener.local_addr().ok(), "listening for peers");
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote) = accepted?;
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(%remote, error = %e, "could not disable nagle");
                }
                connections.spawn(serve_inbound(
                    stream,
                    remote,
                    settings.clone(),
                    handle.clone(),
                    logger.clone(),
                ));
            }
            Some(finished) = connections.join_next() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        tracing::error!(error = %e, "inbound connection task panicked");
                    }
                }
            }
        }
    }
}

async fn serve_inbound(
    mut stream: TcpStream,
    remote: SocketAddr,
    settings: TransportSettings,
    handle: RaftHandle,
    logger: Arc<dyn MessageLogger>,
) {
    let pipeline = match accept(settings.protocols.clone(), &mut stream).await {
        Ok(stack) => match Pipeline::new(stack, settings.max_entry_size) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                tracing::warn!(%remote, error = %e, "negotiated stack is unusable");
                return;
            }
        },
        Err(e) => {
            tracing::warn!(%remote, error = %e, "handshake failed");
            return;
        }
    };
    tracing::debug!(%remote, stack = %pipeline.stack(), "inbound connection ready");

    loop {
        let payload = match read_frame(&mut stream, pipeline.max_frame()).await {
            Ok(Some(payload)) => payload,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(%remote, error = %e, "closing inbound connection");
                break;
            }
        };

        match pipeline.inbound(&payload) {
            Ok(DecodedMessage::Message(message)) => {
                if message.cluster_id != settings.cluster_id {
                    tracing::warn!(%remote, cluster_id = %message.cluster_id, "dropping message for another cluster");
                    continue;
                }
                logger.log_inbound(message.message.from(), &message.message, settings.myself);
                if handle.deliver(message.message).await.is_err() {
                    break;
                }
            }
            Ok(DecodedMessage::Unknown { ordinal, from, .. }) => {
                tracing::warn!(%remote, %from, ordinal, "dropping message of unknown type");
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!(%remote, error = %e, "dropping malformed message");
            }
            Err(e) => {
                tracing::warn!(%remote, error = %e, "closing inbound connection");
                break;
            }
        }
    }
    tracing::debug!(%remote, "inbound connection closed");
}
