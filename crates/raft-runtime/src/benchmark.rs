//! Replication throughput benchmark: workers push dummy payloads through
//! the leader until stopped.

use crate::server::RaftHandle;
use raft_core::ReplicatedContent;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BenchmarkResult {
    pub total_requests: u64,
    pub total_bytes: u64,
    pub run_time: Duration,
}

#[derive(Debug, Default, Clone, Copy)]
struct WorkerTotals {
    requests: u64,
    bytes: u64,
}

#[derive(Debug)]
pub struct ReplicationBenchmark {
    started: Instant,
    stopped: Arc<AtomicBool>,
    workers: Vec<JoinHandle<WorkerTotals>>,
}

impl ReplicationBenchmark {
    /// Start `workers` tasks, each replicating `block_size` byte entries one
    /// at a time. A worker gives up at its first failed request.
    pub fn start(handle: RaftHandle, workers: usize, block_size: usize, request_timeout: Duration) -> Self {
        tracing::info!(workers, block_size, "starting replication benchmark");
        let stopped = Arc::new(AtomicBool::new(false));
        let workers = (0..workers)
            .map(|worker| {
                let handle = handle.clone();
                let stopped = stopped.clone();
                tokio::spawn(async move {
                    let mut totals = WorkerTotals::default();
                    while !stopped.load(Ordering::Relaxed) {
                        let content = ReplicatedContent::Dummy(vec![0; block_size]);
                        match handle.replicate(content, request_timeout).await {
                            Ok(_) => {
                                totals.requests += 1;
                                totals.bytes += block_size as u64;
                            }
                            Err(e) => {
                                tracing::error!(worker, error = %e, "benchmark worker failed");
                                break;
                            }
                        }
                    }
                    totals
                })
            })
            .collect();

        Self {
            started: Instant::now(),
            stopped,
            workers,
        }
    }

    pub async fn stop(self) -> BenchmarkResult {
        tracing::info!("stopping replication benchmark");
        self.stopped.store(true, Ordering::Relaxed);

        let mut result = BenchmarkResult {
            total_requests: 0,
            total_bytes: 0,
            run_time: Duration::ZERO,
        };
        for worker in self.workers {
            match worker.await {
                Ok(totals) => {
                    result.total_requests += totals.requests;
                    result.total_bytes += totals.bytes;
                }
                Err(e) => tracing::error!(error = %e, "benchmark worker panicked"),
            }
        }
        result.run_time = self.started.elapsed();
        result
    }
}
