use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use tela_bridge::config::{BridgeConfig, Cli};
use tela_bridge::daemon::{DaemonClient, RPC_TIMEOUT};
use tela_bridge::engine::{ChainQuery, ContentHost, GnomonFactory, HeightStore, IndexerFactory};
use tela_bridge::state::BridgeState;
use tela_bridge::sync::SyncConfig;
use tela_bridge::{dispatch, proxy, telemetry};

/// Depth of the outbound reply/event channel.
const OUTBOUND_CHANNEL_DEPTH: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(&cli.log_config()).context("failed to initialise logging")?;
    run(BridgeConfig::from(&cli)).await
}

async fn run(config: BridgeConfig) -> Result<()> {
    info!(
        tela_port = config.tela_port,
        gnomon_port = config.gnomon_port,
        "tela-bridge starting"
    );

    let store =
        Arc::new(gnomon_index::Store::open(&config.data_dir).context("failed to open index store")?);

    // Both listeners come up before the first command can reference them.
    let api_addr = SocketAddr::from(([127, 0, 0, 1], config.gnomon_port));
    let api_listener = TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("failed to bind indexing api on {api_addr}"))?;
    let api_router = gnomon_index::api::router(Arc::clone(&store));
    tokio::spawn(async move {
        if let Err(err) = axum::serve(api_listener, api_router.into_make_service()).await {
            warn!(error = %err, "indexing api listener stopped");
        }
    });
    info!(%api_addr, "gnomon api listening");

    let content = Arc::new(tela_serve::ContentServer::new().context("failed to start content server")?);
    content.set_allow_updates(true);

    let daemon = DaemonClient::new(RPC_TIMEOUT).context("failed to build daemon client")?;
    let factory: Arc<dyn IndexerFactory> = Arc::new(GnomonFactory::new(Arc::clone(&store)));
    let height_store: Arc<dyn HeightStore> = store;
    let chain: Arc<dyn ChainQuery> = Arc::new(daemon);
    let content_host: Arc<dyn ContentHost> = content;

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_DEPTH);
    let state = BridgeState::new(
        config.clone(),
        SyncConfig::default(),
        factory,
        height_store,
        chain,
        content_host,
        outbound_tx,
    );

    let proxy_addr = SocketAddr::from(([127, 0, 0, 1], config.tela_port));
    let proxy_listener = TcpListener::bind(proxy_addr)
        .await
        .with_context(|| format!("failed to bind tela proxy on {proxy_addr}"))?;
    let proxy_router = proxy::router(state.clone());
    tokio::spawn(async move {
        if let Err(err) = axum::serve(proxy_listener, proxy_router.into_make_service()).await {
            warn!(error = %err, "tela proxy listener stopped");
        }
    });
    info!(%proxy_addr, "tela proxy listening");

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    tokio::select! {
        _ = dispatch::run(stdin, stdout, state.clone(), outbound_rx) => {
            info!("command stream closed, shutting down");
        }
        _ = shutdown_signal() => {
            info!("signal received, shutting down");
            state.shutdown().await;
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    {
        let mut terminate =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(err) => {
                    warn!(error = %err, "failed to listen for SIGTERM");
                    ctrl_c.await;
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}
