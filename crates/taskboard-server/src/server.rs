use anyhow::Context;
use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use taskboard_core::AppConfig;
use taskboard_store::{MemoryStore, SeedData};
use taskboard_sync::{AuthChain, LogNotificationService, SyncState};

use crate::cli::ServeArgs;

pub fn app(state: SyncState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(taskboard_sync::router())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub async fn run(mut config: AppConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }

    let store = Arc::new(MemoryStore::new());
    if let Some(path) = &args.seed {
        let seed = SeedData::load(path)
            .await
            .with_context(|| format!("failed to read seed file {}", path.display()))?;
        let summary = seed.apply(store.as_ref()).await?;
        tracing::info!(
            users = summary.users.len(),
            boards = summary.boards.len(),
            tasks = summary.tasks,
            "seed loaded"
        );
    }

    let state = SyncState::new(
        &config,
        store,
        Arc::new(AuthChain::from_config(&config.auth)),
        Arc::new(LogNotificationService),
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "taskboard server listening");

    let shutdown_state = state.clone();
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!(%error, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down");
            shutdown_state.shutdown();
        })
        .await?;

    Ok(())
}
