//! # member
//!
//! why: a cluster member is several cooperating tasks (actor, listener,
//! peer connections) over durable storage; they start and stop together
//! relations: assembles raft-storage, raft-core, server.rs and network.rs from
//! a ClusterConfig; used by main.rs and the integration tests
//! what: ClusterMember

use crate::config::ClusterConfig;
use crate::errors::{CompositeError, ErrorCollector, RuntimeError};
use crate::logging::MessageLogger;
use crate::machines::StateMachines;
use crate::network::{self, TcpTransport, TransportSettings};
use crate::pending::ReplicationResult;
use crate::server::{RaftHandle, RaftServer};
use raft_core::{RaftNode, ReplicatedContent};
use raft_storage::{FileStateStorage, SegmentedRaftLog};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct ClusterMember {
    handle: RaftHandle,
    local_addr: SocketAddr,
    replicate_timeout: Duration,
    transport: Arc<TcpTransport>,
    server: JoinHandle<Result<(), RuntimeError>>,
    listener: JoinHandle<std::io::Result<()>>,
}

impl ClusterMember {
    /// Open the log and term/vote state under `config.log.directory`, bind
    /// the listen address and start every task.
    pub async fn start(
        config: &ClusterConfig,
        machines: StateMachines,
        logger: Arc<dyn MessageLogger>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let listener = TcpListener::bind(&config.listen_address).await?;
        Self::start_on(config, listener, machines, logger)
    }

    /// Like `start`, over a listener the caller already bound
    pub fn start_on(
        config: &ClusterConfig,
        listener: TcpListener,
        machines: StateMachines,
        logger: Arc<dyn MessageLogger>,
    ) -> Result<Self, RuntimeError> {
        let log = SegmentedRaftLog::open(&config.log)?;
        let storage = FileStateStorage::new(&config.log.directory)?;
        let node = RaftNode::open(
            config.member_id,
            config.member_ids(),
            config.raft.clone(),
            Arc::new(log),
            Box::new(storage),
        )?;

        let local_addr = listener.local_addr()?;
        let settings = TransportSettings::from_config(config);
        let transport = Arc::new(TcpTransport::start(
            settings.clone(),
            config.peers().cloned(),
            logger.clone(),
        ));
        let (handle, server) = RaftServer::spawn(node, machines, transport.clone());
        let listener = tokio::spawn(network::listen(listener, settings, handle.clone(), logger));

        tracing::info!(
            member = %config.member_id,
            cluster = %config.cluster_id,
            %local_addr,
            "cluster member started"
        );
        Ok(Self {
            handle,
            local_addr,
            replicate_timeout: config.replicate_timeout(),
            transport,
            server,
            listener,
        })
    }

    pub fn handle(&self) -> &RaftHandle {
        &self.handle
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Replicate `content` through this member, waiting at most the
    /// configured `replicate_timeout` for it to be applied
    pub async fn replicate(&self, content: ReplicatedContent) -> ReplicationResult {
        self.handle.replicate(content, self.replicate_timeout).await
    }

    /// Whether the actor has stopped, e.g. after a fatal log error
    pub fn is_stopped(&self) -> bool {
        self.server.is_finished()
    }

    /// Stop the actor, then the network tasks. Failures of either are
    /// reported together.
    pub async fn shutdown(self) -> Result<(), CompositeError> {
        self.handle.shutdown().await;
        let server = self.server.await;
        self.listener.abort();
        let listener = self.listener.await;
        self.transport.shutdown();

        let mut collector = ErrorCollector::new("shutting down cluster member");
        collector.execute(|| match server {
            Ok(result) => result,
            Err(join) => Err(RuntimeError::Io(std::io::Error::other(join))),
        });
        collector.execute(|| match listener {
            Ok(result) => result,
            Err(join) if join.is_cancelled() => Ok(()),
            Err(join) => Err(std::io::Error::other(join)),
        });
        collector.finish()
    }
}
