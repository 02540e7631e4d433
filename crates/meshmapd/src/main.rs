//! meshmapd — peer-replicated network-topology collector daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use meshmap_api::{ApiState, Notifier};
use meshmap_core::config::MeshmapConfig;
use meshmap_services::{
    history, peers, rpc, store, ContentStore, HistoryStore, Node, PeerLinkManager, RpcService,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = MeshmapConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = MeshmapConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MeshmapConfig::default()
    });

    tracing::info!(
        peers = config.network.peers.len(),
        http = %config.network.http_listen,
        rpc = %config.network.rpc_listen,
        "meshmapd starting"
    );

    // Stores
    let records = ContentStore::new(
        config.cache.limit,
        Duration::from_secs(config.cache.flush_secs),
    );
    // Exceptions carry no TTL; sweep stays disabled.
    let exceptions = ContentStore::new(config.cache.exception_limit, Duration::ZERO);

    // Peer links
    let peer_manager = PeerLinkManager::new(
        &config.network.peers,
        Duration::from_secs(config.network.dial_timeout_secs),
    );

    // Node core
    let node = Node::new(
        records.clone(),
        exceptions.clone(),
        Arc::clone(&peer_manager),
        Duration::from_secs(config.network.rpc_timeout_secs),
    );

    // History
    let history_store =
        HistoryStore::open(&config.history.path).context("failed to open history store")?;
    tracing::info!(path = %config.history.path.display(), "history store ready");

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let rpc_task = {
        let listener = TcpListener::bind(&config.network.rpc_listen)
            .await
            .with_context(|| {
                format!(
                    "failed to bind rpc listener on {}",
                    config.network.rpc_listen
                )
            })?;
        tracing::info!(listen = %config.network.rpc_listen, "rpc listening");
        let service: Arc<dyn RpcService> = Arc::new(node.clone());
        tokio::spawn(rpc::serve(listener, service, shutdown_tx.subscribe()))
    };

    let reconcile_task = tokio::spawn(peers::reconcile_loop(
        Arc::clone(&peer_manager),
        Duration::from_secs(config.network.reconcile_interval_secs),
    ));

    let sweep_task = tokio::spawn(store::sweep_loop(
        records.clone(),
        Duration::from_secs(config.cache.sweep_interval_secs),
    ));

    let _persist_task = if config.history.persist_interval_secs > 0 {
        Some(tokio::spawn(history::persist_loop(
            records.clone(),
            history_store.clone(),
            Duration::from_secs(config.history.persist_interval_secs),
        )))
    } else {
        None
    };

    let api_task = {
        let state = ApiState {
            node: node.clone(),
            history: history_store.clone(),
            notifier: Notifier::new(config.notifier.urls.clone(), &config.notifier.path),
        };
        let listen = config.network.http_listen.clone();
        tokio::spawn(async move {
            if let Err(e) = meshmap_api::serve(state, &listen).await {
                tracing::error!(error = %e, "http api failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = rpc_task           => tracing::error!("rpc server exited: {:?}", r),
        r = reconcile_task     => tracing::error!("reconcile loop exited: {:?}", r),
        r = sweep_task         => tracing::error!("sweep loop exited: {:?}", r),
        r = api_task           => tracing::error!("http api exited: {:?}", r),
    }

    Ok(())
}
