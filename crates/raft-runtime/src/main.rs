//! raft-member: runs one cluster member from a json config file until ctrl-c.

use clap::Parser;
use raft_runtime::logging::{self, MessageLogger, NullMessageLogger, TracingMessageLogger};
use raft_runtime::{ClusterConfig, ClusterMember, RuntimeError, StateMachines};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run one member of a raft cluster")]
struct Args {
    /// Path to the member's json config file
    #[arg(long, short)]
    config: PathBuf,

    /// Log every raft message at trace level under the raft_messages target
    #[arg(long)]
    trace_messages: bool,

    /// Log the member's status every this many seconds; 0 disables it
    #[arg(long, default_value_t = 0)]
    status_interval: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config = match ClusterConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            logging::init(None);
            tracing::error!(path = %args.config.display(), error = %e, "cannot load config");
            return ExitCode::FAILURE;
        }
    };
    logging::init(config.log_filter.as_deref());

    match run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, fatal = e.is_fatal(), "raft member failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, config: ClusterConfig) -> Result<(), RuntimeError> {
    let logger: Arc<dyn MessageLogger> = if args.trace_messages {
        Arc::new(TracingMessageLogger)
    } else {
        Arc::new(NullMessageLogger)
    };

    let member = ClusterMember::start(&config, StateMachines::in_memory(), logger).await?;
    let handle = member.handle().clone();

    let status_task = (args.status_interval > 0).then(|| {
        let handle = handle.clone();
        let period = Duration::from_secs(args.status_interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match handle.status().await {
                    Ok(status) => tracing::info!(?status, "status"),
                    Err(_) => break,
                }
            }
        })
    });

    let mut watch = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "cannot listen for ctrl-c");
                }
                tracing::info!("shutting down");
                break;
            }
            _ = watch.tick() => {
                if member.is_stopped() {
                    tracing::error!("raft server stopped unexpectedly");
                    break;
                }
            }
        }
    }

    if let Some(task) = status_task {
        task.abort();
    }
    member.shutdown().await?;
    Ok(())
}
