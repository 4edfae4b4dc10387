use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use raftq::cluster::Cluster;
use raftq::config::{parse_node_speeds, ClusterConfig, NodeSpeed};

#[derive(Parser, Debug)]
#[command(name = "raftq")]
#[command(about = "A fault-tolerant distributed job scheduler built on Raft consensus")]
struct Args {
    /// Number of scheduler replicas in the cohort
    #[arg(long, default_value = "3")]
    scheduler_nodes: u64,

    /// Number of worker nodes
    #[arg(long, default_value = "2")]
    worker_nodes: u64,

    /// Number of concurrent client nodes
    #[arg(long, default_value = "1")]
    client_nodes: u64,

    /// Lower bound of the random election timeout, in milliseconds
    #[arg(long, default_value = "150")]
    min_election_timeout_ms: u64,

    /// Upper bound of the random election timeout, in milliseconds
    #[arg(long, default_value = "300")]
    max_election_timeout_ms: u64,

    /// Leader heartbeat period, in milliseconds
    #[arg(long, default_value = "50")]
    heartbeat_interval_ms: u64,

    /// Capacity of each per-kind mailbox
    #[arg(long, default_value = "64")]
    channel_buffer_size: usize,

    /// Per-replica speeds, comma-separated (low, medium or high);
    /// the list is padded with its last value
    #[arg(long, default_value = "medium")]
    node_speeds: String,

    /// Directory for per-replica debug state dumps (disabled when unset)
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let node_speeds = parse_node_speeds(&args.node_speeds)?;
    let config = ClusterConfig {
        scheduler_node_count: args.scheduler_nodes,
        worker_node_count: args.worker_nodes,
        client_node_count: args.client_nodes,
        min_election_timeout: Duration::from_millis(args.min_election_timeout_ms),
        max_election_timeout: Duration::from_millis(args.max_election_timeout_ms),
        heartbeat_interval: Duration::from_millis(args.heartbeat_interval_ms),
        channel_buffer_size: args.channel_buffer_size,
        node_speed_list: if node_speeds.is_empty() {
            vec![NodeSpeed::Medium]
        } else {
            node_speeds
        },
        state_dir: args.state_dir,
    };

    tracing::info!(
        schedulers = config.scheduler_node_count,
        workers = config.worker_node_count,
        clients = config.client_node_count,
        "Starting raftq"
    );

    let cluster = Cluster::spawn(config)?;
    raftq::repl::run(&cluster).await?;
    cluster.shutdown().await;

    Ok(())
}
