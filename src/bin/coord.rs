//! Coordinator binary

use clap::{Parser, Subcommand};
use shardcache::{Coordinator, CoordinatorConfig, ReplicationMode};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardcache-coord")]
#[command(about = "shardcache coordinator: consistent-hash routing with automatic failover")]
#[command(version)]
struct Cli {
    /// Config file (JSON). CLI endpoint flags take priority.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Primary endpoints (comma-separated host:port)
    #[arg(long, global = true)]
    primaries: Option<String>,

    /// Replica endpoints (comma-separated host:port, same order as primaries)
    #[arg(long, global = true)]
    replicas: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator with health monitoring until interrupted
    Serve {
        /// Virtual nodes per shard
        #[arg(long, default_value = "150")]
        virtual_nodes: usize,

        /// Default replication mode (async or sync)
        #[arg(long, default_value = "async")]
        mode: ReplicationMode,

        /// Health-check interval (ms)
        #[arg(long, default_value = "5000")]
        check_interval: u64,

        /// Per-probe deadline (ms)
        #[arg(long, default_value = "3000")]
        probe_timeout: u64,

        /// Consecutive probe failures before failover
        #[arg(long, default_value = "3")]
        failure_threshold: u32,

        /// Seconds between health-summary log lines
        #[arg(long, default_value = "30")]
        summary_interval: u64,
    },

    /// Print the ring layout: per-shard arc ownership
    Ring,

    /// Write a value
    Set {
        key: String,

        /// Value; parsed as JSON when possible, stored raw otherwise
        value: String,

        /// TTL in seconds
        #[arg(long)]
        ttl: Option<u64>,

        /// Replication mode override for this write
        #[arg(long)]
        mode: Option<ReplicationMode>,
    },

    /// Read a value
    Get { key: String },

    /// Delete a key
    Del { key: String },

    /// Keyspace, hit-rate and replication-lag report
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Serve {
            virtual_nodes,
            mode,
            check_interval,
            probe_timeout,
            failure_threshold,
            summary_interval,
        } => {
            let mut config = config;
            config.virtual_nodes = virtual_nodes;
            config.default_mode = mode;
            config.check_interval_ms = check_interval;
            config.probe_timeout_ms = probe_timeout;
            config.failure_threshold = failure_threshold;
            config.validate()?;

            let coordinator = Coordinator::new(config)?;
            coordinator.start();

            let mut summary_ticker =
                tokio::time::interval(std::time::Duration::from_secs(summary_interval));
            let shutdown = tokio::signal::ctrl_c();
            tokio::pin!(shutdown);

            loop {
                tokio::select! {
                    _ = summary_ticker.tick() => {
                        for shard in coordinator.health_summary() {
                            tracing::info!(
                                shard = shard.shard,
                                name = %shard.name,
                                status = ?shard.health.status,
                                failures = shard.health.consecutive_failures,
                                failover = ?shard.failover.status,
                                primary = %shard.primary_addr,
                                "shard health"
                            );
                        }
                    }
                    res = &mut shutdown => {
                        res?;
                        tracing::info!("interrupt received, shutting down");
                        break;
                    }
                }
            }
            coordinator.shutdown().await;
        }

        Commands::Ring => {
            let coordinator = Coordinator::new(config)?;
            for arc in coordinator.describe_ring() {
                println!(
                    "{:<16} vnodes={:<5} share={:>6.2}%",
                    arc.name, arc.virtual_nodes, arc.percent
                );
            }
        }

        Commands::Set {
            key,
            value,
            ttl,
            mode,
        } => {
            let coordinator = Coordinator::new(config)?;
            let value = serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
            let outcome = coordinator.set(&key, &value, ttl, mode).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }

        Commands::Get { key } => {
            let coordinator = Coordinator::new(config)?;
            let outcome = coordinator.get(&key).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }

        Commands::Del { key } => {
            let coordinator = Coordinator::new(config)?;
            let outcome = coordinator.delete(&key).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }

        Commands::Stats => {
            let coordinator = Coordinator::new(config)?;
            let stats = coordinator.all_stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            let lag = coordinator.replication_lag().await;
            println!("{}", serde_json::to_string_pretty(&lag)?);
        }
    }

    Ok(())
}

/// File config first, endpoint flags on top.
fn load_config(cli: &Cli) -> anyhow::Result<CoordinatorConfig> {
    match (&cli.config, &cli.primaries, &cli.replicas) {
        (Some(path), None, None) => Ok(CoordinatorConfig::from_file(path)?),
        (None, Some(primaries), Some(replicas)) => {
            Ok(CoordinatorConfig::from_endpoint_lists(primaries, replicas)?)
        }
        (Some(path), primaries, replicas) => {
            let mut config = CoordinatorConfig::from_file(path)?;
            if let Some(primaries) = primaries {
                config.primaries = shardcache::common::split_endpoints(primaries);
            }
            if let Some(replicas) = replicas {
                config.replicas = shardcache::common::split_endpoints(replicas);
            }
            config.validate()?;
            Ok(config)
        }
        _ => anyhow::bail!("provide --config or both --primaries and --replicas"),
    }
}
