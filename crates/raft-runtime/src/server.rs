//! # server
//!
//! why: raft state must change one message at a time even though messages
//! arrive from many connections and from two timers
//! relations: owns a raft_core::RaftNode, the CommandDispatcher and the
//! PendingResults; network.rs feeds it through RaftHandle and implements
//! Outbound for what it sends
//! what: Outbound, RaftHandle, RaftStatus, RaftServer actor loop
//!
//! Every input (peer message, timer firing, client request) becomes an Event
//! on one mpsc channel. A single task consumes that channel, so the node
//! never needs a lock.

use crate::dispatch::CommandDispatcher;
use crate::errors::{ErrorCollector, ReplicationError, RuntimeError, SendError};
use crate::machines::StateMachines;
use crate::pending::{PendingResults, ReplicationResult};
use rand::Rng;
use raft_core::message::NewEntryRequest;
use raft_core::{
    LogIndex, MemberId, NodeState, Outcome, RaftConfig, RaftMessage, RaftNode, ReadableRaftLog,
    ReplicatedContent, Term, NO_INDEX,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};

pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Where the server hands messages for other members
pub trait Outbound: Send + Sync {
    fn send(&self, to: MemberId, message: RaftMessage) -> Result<(), SendError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RaftStatus {
    pub member: MemberId,
    pub role: NodeState,
    pub term: Term,
    pub leader: Option<MemberId>,
    pub commit_index: LogIndex,
    pub append_index: LogIndex,
    pub prev_index: LogIndex,
    pub last_applied: LogIndex,
}

#[derive(Debug)]
enum Event {
    Message(RaftMessage),
    Replicate {
        content: ReplicatedContent,
        reply: oneshot::Sender<ReplicationResult>,
    },
    Prune {
        index: LogIndex,
        reply: oneshot::Sender<LogIndex>,
    },
    Status(oneshot::Sender<RaftStatus>),
    Shutdown(oneshot::Sender<()>),
}

/// Cheap, cloneable front door to a running RaftServer
#[derive(Debug, Clone)]
pub struct RaftHandle {
    myself: MemberId,
    max_entry_size: usize,
    events: mpsc::Sender<Event>,
}

impl RaftHandle {
    pub fn member(&self) -> MemberId {
        self.myself
    }

    /// Queue a message from a peer
    pub async fn deliver(&self, message: RaftMessage) -> Result<(), ReplicationError> {
        self.events
            .send(Event::Message(message))
            .await
            .map_err(|_| ReplicationError::Shutdown)
    }

    /// Queue a message without waiting; for callers that cannot await
    pub fn try_deliver(&self, message: RaftMessage) -> Result<(), SendError> {
        self.events.try_send(Event::Message(message)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull(self.myself),
            mpsc::error::TrySendError::Closed(_) => SendError::Closed(self.myself),
        })
    }

    /// Append `content` through this member and wait until it has been
    /// committed and applied, or until `wait` runs out.
    pub async fn replicate(&self, content: ReplicatedContent, wait: Duration) -> ReplicationResult {
        let size = content.marshalled_size();
        if size > self.max_entry_size {
            return Err(ReplicationError::EntryTooLarge {
                size,
                limit: self.max_entry_size,
            });
        }

        let (reply, result) = oneshot::channel();
        self.events
            .send(Event::Replicate { content, reply })
            .await
            .map_err(|_| ReplicationError::Shutdown)?;

        match tokio::time::timeout(wait, result).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ReplicationError::Shutdown),
            Err(_) => Err(ReplicationError::Timeout(wait)),
        }
    }

    pub async fn status(&self) -> Result<RaftStatus, ReplicationError> {
        let (reply, status) = oneshot::channel();
        self.events
            .send(Event::Status(reply))
            .await
            .map_err(|_| ReplicationError::Shutdown)?;
        status.await.map_err(|_| ReplicationError::Shutdown)
    }

    /// Ask the log to drop history below `index`; never past the commit
    /// index. Returns the log's prev index afterwards.
    pub async fn prune(&self, index: LogIndex) -> Result<LogIndex, ReplicationError> {
        let (reply, prev_index) = oneshot::channel();
        self.events
            .send(Event::Prune { index, reply })
            .await
            .map_err(|_| ReplicationError::Shutdown)?;
        prev_index.await.map_err(|_| ReplicationError::Shutdown)
    }

    /// Stop the server; waiting clients get `Shutdown`. Idempotent.
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        if self.events.send(Event::Shutdown(reply)).await.is_ok() {
            let _ = done.await;
        }
    }
}

pub struct RaftServer {
    node: RaftNode,
    dispatcher: CommandDispatcher,
    pending: Arc<PendingResults>,
    outbound: Arc<dyn Outbound>,
    events: mpsc::Receiver<Event>,
    election_deadline: Instant,
}

impl RaftServer {
    /// Start the actor task for `node`. The returned task ends with an error
    /// only when the member can no longer take part in consensus.
    pub fn spawn(
        mut node: RaftNode,
        machines: StateMachines,
        outbound: Arc<dyn Outbound>,
    ) -> (RaftHandle, JoinHandle<Result<(), RuntimeError>>) {
        let pending = Arc::new(PendingResults::new());
        node.add_listener(pending.clone());

        let prev_index = node.log().prev_index();
        if prev_index > NO_INDEX {
            tracing::warn!(
                prev_index,
                "log history was pruned; state machines resume above prev_index"
            );
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let handle = RaftHandle {
            myself: node.myself(),
            max_entry_size: node.config().max_entry_size,
            events: events_tx,
        };
        let election_deadline = Instant::now() + election_timeout(node.config());
        let server = Self {
            dispatcher: CommandDispatcher::starting_after(machines, prev_index.max(NO_INDEX)),
            node,
            pending,
            outbound,
            events: events_rx,
            election_deadline,
        };
        (handle, tokio::spawn(server.run()))
    }

    async fn run(mut self) -> Result<(), RuntimeError> {
        let myself = self.node.myself();
        let mut heartbeat = tokio::time::interval(self.node.config().heartbeat());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(member = %myself, term = self.node.term(), "raft server started");

        loop {
            let step = tokio::select! {
                event = self.events.recv() => match event {
                    Some(Event::Shutdown(reply)) => {
                        self.pending.cancel_all(ReplicationError::Shutdown);
                        let _ = reply.send(());
                        break;
                    }
                    Some(event) => self.on_event(event),
                    None => break,
                },
                _ = sleep_until(self.election_deadline) => {
                    self.reset_election_timer();
                    self.step(RaftMessage::ElectionTimeout { from: myself })
                        .map(|_| ())
                }
                _ = heartbeat.tick(), if self.node.is_leader() => {
                    self.step(RaftMessage::HeartbeatTimeout { from: myself })
                        .map(|_| ())
                }
            };

            if let Err(e) = step {
                if e.is_fatal() {
                    tracing::error!(member = %myself, error = %e, "raft server stopping on fatal error");
                    self.pending.cancel_all(ReplicationError::Shutdown);
                    return Err(e);
                }
                tracing::warn!(member = %myself, error = %e, "event handling failed");
            }
        }

        tracing::info!(member = %myself, "raft server stopped");
        Ok(())
    }

    fn on_event(&mut self, event: Event) -> Result<(), RuntimeError> {
        match event {
            Event::Message(message) => self.step(message).map(|_| ()),
            Event::Replicate { content, reply } => self.replicate(content, reply),
            Event::Prune { index, reply } => {
                let result = self.step(RaftMessage::PruneRequest {
                    from: self.node.myself(),
                    prune_index: index,
                });
                let _ = reply.send(self.node.log().prev_index());
                result.map(|_| ())
            }
            Event::Status(reply) => {
                let _ = reply.send(self.status());
                Ok(())
            }
            // handled by the loop itself
            Event::Shutdown(reply) => {
                let _ = reply.send(());
                Ok(())
            }
        }
    }

    fn replicate(
        &mut self,
        content: ReplicatedContent,
        reply: oneshot::Sender<ReplicationResult>,
    ) -> Result<(), RuntimeError> {
        if !self.node.is_leader() {
            let _ = reply.send(Err(ReplicationError::NotLeader {
                leader: self.node.leader(),
            }));
            return Ok(());
        }

        let request = RaftMessage::NewEntryRequest(NewEntryRequest {
            from: self.node.myself(),
            content,
        });
        let outcome = self.node.handle(request)?;
        match outcome.appended_entries().last() {
            Some((index, _)) => self.pending.register(index, reply),
            None => {
                let _ = reply.send(Err(ReplicationError::NotLeader {
                    leader: outcome.leader,
                }));
            }
        }
        self.publish(outcome)
    }

    /// Feed one message to the node and carry out what it decided
    fn step(&mut self, message: RaftMessage) -> Result<Outcome, RuntimeError> {
        let outcome = self.node.handle(message)?;
        self.publish(outcome.clone())?;
        Ok(outcome)
    }

    fn publish(&mut self, outcome: Outcome) -> Result<(), RuntimeError> {
        if outcome.renew_election_timeout {
            self.reset_election_timer();
        }
        if outcome.needs_fresh_snapshot {
            tracing::warn!(
                member = %self.node.myself(),
                leader = ?outcome.leader,
                "leader no longer has the entries we need; a store copy is required"
            );
        }

        let mut sends = ErrorCollector::new("sending raft messages");
        for directed in outcome.outgoing {
            let outbound = &self.outbound;
            sends.execute(|| outbound.send(directed.to, directed.message));
        }
        if let Err(e) = sends.finish() {
            tracing::warn!(member = %self.node.myself(), error = %e, "some raft messages were not sent");
        }

        self.apply_committed()
    }

    fn apply_committed(&mut self) -> Result<(), RuntimeError> {
        let commit_index = self.node.commit_index();
        let log = Arc::clone(self.node.log());
        while self.dispatcher.last_dispatched() < commit_index {
            let mut index = self.dispatcher.last_dispatched() + 1;
            let prev_index = log.prev_index();
            if index <= prev_index {
                tracing::warn!(index, prev_index, "committed entries were pruned before they were applied");
                index = prev_index + 1;
                if index > commit_index {
                    break;
                }
            }

            let Some(entry) = log.entry(index)? else {
                tracing::warn!(index, commit_index, "committed entry missing from the log");
                break;
            };
            let pending = &self.pending;
            self.dispatcher
                .dispatch(&entry.content, index, |result| pending.complete(index, result))?;
        }
        Ok(())
    }

    fn reset_election_timer(&mut self) {
        self.election_deadline = Instant::now() + election_timeout(self.node.config());
    }

    fn status(&self) -> RaftStatus {
        RaftStatus {
            member: self.node.myself(),
            role: self.node.role(),
            term: self.node.term(),
            leader: self.node.leader(),
            commit_index: self.node.commit_index(),
            append_index: self.node.append_index(),
            prev_index: self.node.log().prev_index(),
            last_applied: self.dispatcher.last_dispatched(),
        }
    }
}

/// A fresh random pick from the configured election timeout range
pub fn election_timeout(config: &RaftConfig) -> Duration {
    let millis = rand::rng().random_range(config.election_timeout_min..=config.election_timeout_max);
    Duration::from_millis(millis)
}
