use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;

use super::handlers::{get_target, health_check, list_targets, mute, report_liveness, AppState};
use crate::alerts::TargetsFile;
use crate::auth::{AccessToken, MuteTokens};
use crate::config::Config;

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Liveness reports
        .route("/webhook/:id", post(report_liveness))
        // Mute links are opened from email clients, so GET
        .route("/mute/:id/:token", get(mute))
        // Inspection
        .route("/targets", get(list_targets))
        .route("/targets/:id", get(get_target))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server and the scheduler until a shutdown signal arrives.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let targets = Arc::new(TargetsFile::load(&config.targets_path)?);
    tracing::info!("Found {} targets", targets.targets.len());

    let store = config.open_store()?;
    for id in store.ids()? {
        if targets.get(&id).is_none() {
            tracing::warn!(target_id = %id, "Stored state for a target that is no longer configured");
        }
    }
    let scheduler = Arc::new(config.build_scheduler(Arc::clone(&targets), Arc::clone(&store))?);

    let state = Arc::new(AppState {
        targets,
        store,
        access_token: AccessToken::new(&config.access_token),
        mute_tokens: MuteTokens::new(&config.mute_secret),
        scheduler: Some(Arc::clone(&scheduler)),
    });

    // Start background scheduler
    let scheduler_handle = Arc::clone(&scheduler).start(config.check_interval);

    // Build router
    let app = build_router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting sifa server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
    });

    tokio::select! {
        _ = shutdown_signal() => {}
        result = &mut server => {
            // The server ended on its own; still stop the scheduler cleanly.
            scheduler_handle.shutdown().await;
            result??;
            return Ok(());
        }
    }

    tracing::info!("Shutdown signal received, draining requests and scheduler...");
    let _ = stop_tx.send(());

    let drain = async {
        let (server_result, ()) = tokio::join!(&mut server, scheduler_handle.shutdown());
        server_result
    };

    let drained = tokio::time::timeout(config.shutdown_timeout, drain).await;
    match drained {
        Ok(result) => result??,
        Err(_) => {
            tracing::warn!(
                "Shutdown did not complete within {:?}, forcing stop",
                config.shutdown_timeout
            );
            server.abort();
        }
    }

    tracing::info!("sifa server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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
}
