//! HTTP server bootstrap: builds the axum router over `AppState`
//! and serves it, the thin transport shell around the conversation
//! orchestrator this core exists to drive. Grounded in the teacher's
//! `thread_server::run_thread_server`/`build_compatible_router` shape,
//! trimmed of the local model-runtime bring-up this system has no
//! counterpart for.

#![cfg(feature = "cli")]

use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api;
use crate::app_state::AppState;
use crate::config::Config;

pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing();
    crate::metrics::init_metrics();
    cfg.print_config();

    let state = AppState::new(cfg.clone())?;

    let eviction_sessions = state.sessions.clone();
    let idle_timeout = cfg.session_idle_timeout;
    tokio::spawn(async move {
        eviction_sessions.run_eviction_loop(Duration::from_secs(60), idle_timeout).await;
    });

    let app = build_router(state);

    let addr = cfg.api_addr()?;
    info!("starting HTTP server on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(api::chat_api::chat))
        .route("/sessions", get(api::sessions_api::list_sessions))
        .route("/sessions/:id/history", get(api::sessions_api::history))
        .route("/sessions/:id", delete(api::sessions_api::delete_session))
        .route("/memory", get(api::memory_api::get_memory))
        .route("/healthz", get(api::admin_api::health))
        .route("/metrics", get(crate::metrics::get_metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(600)))
        .with_state(state)
}
