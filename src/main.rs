use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chain::{ChainConfig, MemoryChain};
use clap::Parser;
use containers::Block;
use metrics::server::{run_metrics_server, MetricsServerConfig};
use metrics::Metrics;
use networking::sync::{ChannelNetwork, OutboundSyncRequest, PeerSync, SyncConfig};
use networking::{PeerId, PeerRegistry, PeerTable};
use tokio::{sync::mpsc, task};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
struct Args {
    /// Sync configuration file (YAML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    metrics: bool,

    #[arg(long, default_value = "127.0.0.1")]
    metrics_address: IpAddr,

    #[arg(long, default_value_t = 5054)]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };

    let chain = Arc::new(MemoryChain::new(Block::new(vec![], 0), ChainConfig::default()));

    let (disconnect_sender, mut disconnect_receiver) = mpsc::unbounded_channel::<PeerId>();
    let peers = Arc::new(PeerTable::with_disconnect_sink(disconnect_sender));

    let (outbound_sender, mut outbound_receiver) =
        mpsc::unbounded_channel::<OutboundSyncRequest>();
    let network = Arc::new(ChannelNetwork::new(
        outbound_sender,
        config.graph_state_timeout(),
    ));

    let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);

    let peer_sync = Arc::new(
        PeerSync::new(config, chain.clone(), chain, peers.clone(), network)
            .with_metrics(metrics.clone()),
    );

    let shutdown = CancellationToken::new();

    let metrics_handle = args.metrics.then(|| {
        let server_config = MetricsServerConfig {
            metrics_address: args.metrics_address,
            metrics_port: args.metrics_port,
        };
        let shutdown = shutdown.clone();
        task::spawn(async move {
            if let Err(err) = run_metrics_server(server_config, metrics, shutdown).await {
                warn!(%err, "Metrics server exited with error");
            }
        })
    });

    // Outbound requests end here until a wire transport is attached.
    let outbound_handle = task::spawn(async move {
        while let Some(request) = outbound_receiver.recv().await {
            debug!(%request, "Outbound sync request");
        }
    });

    let disconnect_handle = {
        let peers = peers.clone();
        let peer_sync = peer_sync.clone();
        task::spawn(async move {
            while let Some(peer) = disconnect_receiver.recv().await {
                if peers.remove_peer(&peer).is_some() {
                    peer_sync.on_peer_disconnected(peer);
                }
            }
        })
    };

    peer_sync.start();
    info!("Node running, press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("Shutting down");
    peer_sync.stop().await;
    shutdown.cancel();

    if let Some(handle) = metrics_handle {
        if let Err(err) = handle.await {
            debug!(%err, "Metrics server task ended abnormally");
        }
    }
    disconnect_handle.abort();
    outbound_handle.abort();

    info!(connected = peers.connected_peers().len(), "Main async task exiting");
    Ok(())
}
