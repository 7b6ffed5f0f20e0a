use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;

use duel_bot::api::{self, AppState};
use duel_bot::config::Config;
use duel_bot::dispatch::Dispatcher;
use duel_bot::duel::DuelEngine;
use duel_bot::maintenance::spawn_maintenance;
use duel_bot::metrics;
use duel_bot::platform::BroadcastSink;
use duel_bot::registry::InteractionDedup;
use duel_bot::stats::StatsStore;

/// Outbound events buffered per bridge client before it starts lagging.
const EVENT_BUFFER: usize = 256;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Configuration error: {e}");
            std::process::exit(1);
        }
    };
    tracing::debug!("Loaded configuration: {config:?}");

    metrics::register_metrics();

    let stats = Arc::new(StatsStore::load(config.stats.clone()));
    let sink = BroadcastSink::new(EVENT_BUFFER);
    let engine = DuelEngine::new(config.duel.clone(), stats.clone(), Arc::new(sink.clone()));
    let dedup = InteractionDedup::new(config.dedup_retention);
    let dispatcher = Arc::new(Dispatcher::new(
        engine.clone(),
        dedup.clone(),
        config.admin_ids.clone(),
    ));

    let maintenance = spawn_maintenance(
        stats.clone(),
        dedup,
        config.backup_interval,
        Duration::from_secs(60).min(config.dedup_retention.max(Duration::from_secs(1))),
        engine.shutdown_signal(),
    );

    let state = AppState::new(
        dispatcher,
        sink,
        &config.token,
        config.client_id,
        config.guild_id,
    );
    let app = api::router(state).layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind to {addr}: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Duel bot listening on port {} (guild {}, {} users tracked)",
        config.port,
        config.guild_id,
        stats.summary().users
    );
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {e}");
    }

    engine.shutdown();
    if let Err(e) = maintenance.await {
        tracing::warn!("Maintenance worker ended abnormally: {e}");
    }
    match tokio::task::spawn_blocking(move || stats.commit()).await {
        Ok(Ok(())) => tracing::info!("Statistics flushed, goodbye"),
        Ok(Err(e)) => tracing::error!("Final statistics flush failed: {e}"),
        Err(e) => tracing::error!("Final statistics flush did not finish: {e}"),
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}
