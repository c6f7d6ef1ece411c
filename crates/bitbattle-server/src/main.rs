mod api;
mod auth;
mod config;
mod error;
mod matchmaking;
mod pipeline;
mod problems;
mod rate_limit;
mod room;
mod scoring;
mod spectate;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bitbattle_sandbox::{SandboxLimits, SandboxRunner};
use bitbattle_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::matchmaking::Matchmaker;
use crate::pipeline::Pipeline;
use crate::problems::ProblemRepository;
use crate::rate_limit::RateLimiters;
use crate::room::{RoomRegistry, RoomServices};
use crate::scoring::Scoring;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,bitbattle_server=debug")),
        )
        .init();

    info!("Starting BitBattle server v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(ServerConfig::from_env().context("invalid configuration")?);
    info!(
        port = config.port,
        sandbox_image = %config.sandbox_image,
        sandbox_concurrency = config.sandbox_concurrency,
        db = %config.db_path.display(),
        "configuration loaded"
    );

    let db_path = config.db_path.clone();
    let database = tokio::task::spawn_blocking(move || Database::open(&db_path))
        .await
        .context("store startup task failed")?
        .context("failed to open database")?;
    let store = Arc::new(Mutex::new(database));

    let sandbox = Arc::new(
        SandboxRunner::new(
            config.sandbox_image.clone(),
            config.sandbox_concurrency,
            SandboxLimits::default(),
        )
        .context("failed to initialize sandbox runner")?,
    );

    let problems = Arc::new(ProblemRepository::new());
    let scoring = Scoring::new(store.clone());
    let rooms = RoomRegistry::new(Arc::new(RoomServices {
        problems: problems.clone(),
        scoring,
        countdown: config.countdown,
        grace: config.room_grace,
    }));
    let matchmaker = Arc::new(Matchmaker::new());
    let pipeline = Arc::new(Pipeline::new(sandbox));

    let state = AppState {
        config: config.clone(),
        store: store.clone(),
        rooms,
        problems,
        pipeline,
        matchmaker,
    };

    // Matchmaker tick: pair waiting players and create their rooms.
    let matcher_state = state.clone();
    let matcher_tick = config.matcher_tick;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(matcher_tick);
        loop {
            interval.tick().await;
            api::drive_matchmaking(&matcher_state).await;
        }
    });

    // Rate limiter cleanup every 5 min, evict buckets idle >10 min.
    let limiters = RateLimiters::new();
    let purge_limiters = limiters.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            purge_limiters.purge_stale(600.0).await;
        }
    });

    // Expired refresh tokens are swept hourly.
    let prune_store = store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            let result =
                api::with_store(&prune_store, |db| db.prune_expired_refresh_tokens(chrono::Utc::now()))
                    .await;
            match result {
                Ok(pruned) if pruned > 0 => info!(pruned, "expired refresh tokens removed"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "refresh token sweep failed"),
            }
        }
    });

    let app = api::build_router(state, &limiters);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    info!("server shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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

    info!("shutdown signal received, draining");
}
