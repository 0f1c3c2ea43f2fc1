//! Multicast Sync Peer
//!
//! Joins the multicast group and replicates a shared log with every other
//! peer on the local network. Each line typed on stdin becomes a new log
//! entry; every entry received from the group is printed to stdout.

use anyhow::Result;
use clap::Parser;
use mcast_node::{NodeBuilder, VersionedMessage};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::PeerConfig;

/// Coordinator-free log replication over IP multicast
#[derive(Parser, Debug)]
#[command(name = "mcast-sync")]
#[command(about = "Replicate a shared log with peers over IP multicast", long_about = None)]
struct Args {
    /// JSON config file (flags below override its values)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Multicast group address
    #[arg(long)]
    group: Option<Ipv4Addr>,

    /// Multicast UDP port
    #[arg(long)]
    port: Option<u16>,

    /// Delay between outgoing datagrams in milliseconds
    #[arg(long)]
    send_interval_ms: Option<u64>,

    /// Delay between gap-repair passes in milliseconds
    #[arg(long)]
    repair_interval_ms: Option<u64>,

    /// Seconds between stats log lines (0 = never)
    #[arg(long)]
    stats_interval_secs: Option<u64>,

    /// Enable verbose logging (per-datagram trace)
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn resolve_config(&self) -> Result<PeerConfig> {
        let mut config = match &self.config {
            Some(path) => PeerConfig::load(path)?,
            None => PeerConfig::default(),
        };

        if let Some(group) = self.group {
            config.node.group = group;
        }
        if let Some(port) = self.port {
            config.node.port = port;
        }
        if let Some(ms) = self.send_interval_ms {
            config.node.send_interval_ms = ms;
        }
        if let Some(ms) = self.repair_interval_ms {
            config.node.repair_interval_ms = ms;
        }
        if let Some(secs) = self.stats_interval_secs {
            config.stats_interval_secs = secs;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { "trace" } else { args.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = args.resolve_config()?;

    tracing::info!("Starting multicast sync peer");
    tracing::info!("  Group: {}", config.node.group_addr());
    tracing::info!("  Send interval: {}ms", config.node.send_interval_ms);
    tracing::info!("  Repair interval: {}ms", config.node.repair_interval_ms);

    // Deliveries are handed to a printer task so the receive loop never
    // waits on stdout
    let (delivered_tx, mut delivered_rx) = mpsc::unbounded_channel::<VersionedMessage>();

    let node = Arc::new(
        NodeBuilder::new()
            .config(config.node.clone())
            .on_versioned(move |msg| {
                let _ = delivered_tx.send(msg);
            })
            .bind()
            .await?,
    );

    let handle = node.start()?;

    let printer = tokio::spawn(async move {
        while let Some(msg) = delivered_rx.recv().await {
            println!("[v{}] {}", msg.version, String::from_utf8_lossy(&msg.payload));
        }
    });

    let input_node = node.clone();
    let input = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let msg = input_node.originate(line.as_bytes().to_vec());
                    tracing::debug!("Queued local entry as version {}", msg.version);
                }
                Ok(None) => {
                    tracing::info!("Stdin closed, still replicating. Press Ctrl+C to stop.");
                    break;
                }
                Err(e) => {
                    tracing::error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });

    let stats_node = node.clone();
    let stats_interval = config.stats_interval_secs;
    let stats_logger = tokio::spawn(async move {
        if stats_interval == 0 {
            return;
        }
        let mut interval = tokio::time::interval(Duration::from_secs(stats_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            let stats = stats_node.stats();
            tracing::info!(
                "hwm {} | {} versions stored, {} missing | {} sent, {} received, {} queued",
                stats.high_water_mark,
                stats.stored_versions,
                stats.missing_versions,
                stats.datagrams_sent,
                stats.datagrams_received,
                stats.queued
            );
        }
    });

    tracing::info!("Peer running. Type a line to publish it. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");

    handle.abort();
    input.abort();
    stats_logger.abort();
    printer.abort();

    let stats = node.stats();
    tracing::info!(
        "Peer stopped at version {} ({} delivered, {} duplicates ignored, {} malformed dropped)",
        stats.high_water_mark,
        stats.messages_delivered,
        stats.duplicates_ignored,
        stats.malformed_dropped
    );

    Ok(())
}
