//! hlstats-daemon - Real-time stats daemon for Half-Life-family dedicated
//! game servers.
//!
//! Listens on UDP for Source-engine log lines, resolves identities, and
//! drives per-server stat/ranking/match handlers, persisting through a
//! pluggable storage backend (§1, §2).

mod config;
mod engine;
mod handlers;
mod identity;
mod metrics;
mod net;
mod parse;
mod publish;
mod store;
mod util;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::engine::worker::ServerWorkerRegistry;
use crate::engine::ProcessingEngine;
use crate::metrics::{HealthProbe, Metrics};
use crate::net::listener::UdpListener;
use crate::publish::BroadcastPublisher;
use crate::store::rest::RestStore;
use crate::store::ServerService;
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(&config.log_level);
    init_server_time();

    info!("starting hlstats-daemon");

    if let Err(e) = run(config).await {
        error!(error = %e, "fatal startup error");
        std::process::exit(1);
    }

    info!("shutdown complete");
}

async fn run(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(RestStore::new(config.storage_url.clone(), config.storage_api_key.clone()));

    // Preflight: storage reachability (§3 Supplemented features). A lookup
    // that fails to round-trip at all (network/auth error) is fatal; a
    // clean "not found" is a successful probe.
    store
        .find_server_by_address("preflight", 0)
        .await
        .map_err(|e| anyhow::anyhow!("storage preflight failed: {e}"))?;

    let publisher = Arc::new(BroadcastPublisher::default());
    let metrics = Metrics::new();
    let health_probe = Arc::new(HealthProbe::new(Arc::clone(&store), Arc::clone(&metrics)));
    tokio::spawn(Arc::clone(&health_probe).run(1));

    let listener = UdpListener::bind(
        config.udp_bind_addr,
        config.udp_port,
        config.rate_limit_per_minute,
        config.rate_limit_burst,
        config.skip_auth,
        config.max_packet_size,
    )
    .await
    .map_err(|e| anyhow::anyhow!("failed to bind UDP socket: {e}"))?;

    info!(port = config.udp_port, bind = %config.udp_bind_addr, "udp listener bound");

    let sweep_handle = listener.spawn_rate_limiter_sweep();

    let engine = Arc::new(ProcessingEngine::with_log_bots(
        Arc::clone(&store),
        Arc::clone(&publisher),
        config.log_bots,
    ));
    let workers = Arc::new(ServerWorkerRegistry::new(Arc::clone(&engine)));

    let (tx, mut rx) = mpsc::channel(4096);
    let router_workers = Arc::clone(&workers);
    let router_handle = tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            router_workers.route(packet).await;
        }
    });

    // Keeps the queue_depth gauge live for the health probe (§2.5, §6): the
    // registry only knows its own depth, so something has to carry it over.
    let gauge_workers = Arc::clone(&workers);
    let gauge_metrics = Arc::clone(&metrics);
    let gauge_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(15));
        loop {
            interval.tick().await;
            gauge_metrics.set_queue_depth(gauge_workers.total_queue_depth());
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener_store = Arc::clone(&store);
    let listener_handle = tokio::spawn(async move {
        listener.run(listener_store, tx, shutdown_rx).await;
    });

    shutdown_signal().await;
    info!("shutdown signal received, draining");

    let _ = shutdown_tx.send(true);
    sweep_handle.abort();
    gauge_handle.abort();

    let deadline = Duration::from_secs(config.shutdown_deadline_secs);
    if tokio::time::timeout(deadline, listener_handle).await.is_err() {
        error!("listener did not stop within the shutdown deadline");
    }
    drop(router_handle);
    workers.shutdown(deadline).await;

    Ok(())
}

fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("received terminate signal, starting graceful shutdown");
        }
    }
}
