//! Harbor CLI - Main entry point.

use clap::{Parser, Subcommand};
use harbor::config::HarborConfig;
use harbor::placement::{RendezvousDecider, Sharder};
use harbor::NodeId;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "harbor", version, about = "Decentralized content-storage node")]
struct Cli {
    /// Log level used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a storage node.
    Server {
        /// Path to a JSON config file; defaults to the development config.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the shard ownership table for a given cluster.
    Placement {
        /// Network namespace.
        #[arg(long, default_value = "harbor")]
        namespace: String,
        /// Comma-separated node identities.
        #[arg(long, value_delimiter = ',', required = true)]
        peers: Vec<String>,
        /// Replicas per shard.
        #[arg(long, default_value_t = 3)]
        replication_factor: usize,
        /// Content-id suffix length defining the shard space.
        #[arg(long, default_value_t = 1)]
        suffix_len: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => {
            let mut config = match config {
                Some(path) => HarborConfig::from_file(&path)?,
                None => HarborConfig::development(),
            };
            config.observability.log_level = cli.log_level;
            harbor::run(config).await?;
        }

        Commands::Placement {
            namespace,
            peers,
            replication_factor,
            suffix_len,
        } => {
            let nodes: Vec<NodeId> = peers.iter().map(|p| NodeId::new(p.clone())).collect();
            let decider = RendezvousDecider::new(
                namespace,
                replication_factor,
                nodes[0].clone(),
                nodes,
                Sharder::new(suffix_len),
            );

            let table = decider.ownership_table();
            let mut shards: Vec<_> = table.keys().cloned().collect();
            shards.sort();
            for shard in shards {
                let replicas: Vec<String> =
                    table[&shard].iter().map(|n| n.to_string()).collect();
                println!("{}  {}", shard, replicas.join(", "));
            }
        }
    }

    Ok(())
}
