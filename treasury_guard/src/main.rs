use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    app_state::AppState,
    cfg::Cfg,
    clock::system_clock,
    eth_client::{EthClient, GuardClient},
    metrics::GuardMetrics,
    policy::Policy,
    watcher::{Watcher, WatcherSettings},
};

mod app_state;
mod batch;
mod cfg;
mod clock;
mod contract;
mod errors;
mod eth_client;
mod http_server;
mod metrics;
mod policy;
mod rpc;
mod subscriber;
mod tracker;
mod tx_sender;
mod watcher;

const HTTP_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Entries in .env never override variables already set.
    let _ = dotenvy::dotenv();
    let cfg = Cfg::parse();

    // RUST_LOG, when set, wins over LOG_LEVEL.
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&cfg.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    cfg.validate()?;
    info!(
        chain_id = cfg.chain_id,
        contract = %cfg.contract_address,
        guardian = %cfg.guardian_key.address(),
        executor = %cfg.executor_key.address(),
        "starting treasury guardian"
    );

    let metrics = Arc::new(GuardMetrics::new(&cfg.metrics_namespace)?);
    let clock = system_clock();
    let policy = Policy::from_cfg(&cfg, clock.clone())?;
    let settings = WatcherSettings::from_cfg(&cfg)?;

    let cancel = CancellationToken::new();

    let listener = TcpListener::bind(cfg.http_listen_addr)
        .await
        .with_context(|| format!("bind ops http on {}", cfg.http_listen_addr))?;
    let http = tokio::spawn(http_server::serve(listener, AppState { metrics: metrics.clone() }, cancel.clone()));

    let client: Arc<dyn GuardClient> = Arc::new(EthClient::new(&cfg).await.context("build chain client")?);
    let watcher = Watcher::new(settings, policy, clock, metrics);
    let mut watcher_task = tokio::spawn(watcher.run(client, cancel.clone()));

    let finished = tokio::select! {
        _ = shutdown_signal() => None,
        joined = &mut watcher_task => Some(joined),
    };
    cancel.cancel();
    let joined = match finished {
        Some(joined) => joined,
        None => watcher_task.await,
    };
    let outcome = join_watcher(joined);

    match tokio::time::timeout(HTTP_SHUTDOWN_GRACE, http).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!(error = %e, "ops http server error"),
        Ok(Err(e)) => warn!(error = %e, "ops http task failed"),
        Err(_) => warn!("ops http server did not stop within {:?}", HTTP_SHUTDOWN_GRACE),
    }

    if let Err(e) = &outcome {
        error!(error = %e, "guardian exited with error");
    }
    info!("shutdown complete");
    outcome
}

fn join_watcher(joined: Result<Result<(), errors::GuardError>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result.context("watcher"),
        Err(e) => Err(anyhow!("watcher task failed: {e}")),
    }
}

// Graceful shutdown on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
