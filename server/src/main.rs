//! VectorSync server: HTTP and WebSocket endpoints for cross-device sync.
//!
//! Wires the durable Postgres layer, the in-process
//! [`vectorsync_engine::SyncOrchestrator`], and the session registry
//! together behind `axum`.

mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod registry;
mod routes;
mod schema;
mod websocket;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::{SharedSecretVerifier, TokenVerifier};
use crate::config::Config;
use crate::db::Pool;
use crate::registry::EngineRuntime;
use crate::websocket::SessionRegistry;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub config: Arc<Config>,
    pub engine: Arc<EngineRuntime>,
    pub sessions: Arc<SessionRegistry>,
    pub verifier: Arc<dyn TokenVerifier>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vectorsync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("starting vectorsync server on {}:{}", config.host, config.port);

    let pool = db::create_pool(&config.database_url).await?;

    tracing::info!("running database migrations");
    db::run_migrations(&pool).await?;

    tracing::info!("restoring version store from durable storage");
    let store = db::load_store(&pool, schema::default_schema()).await?;
    let engine = Arc::new(EngineRuntime::from_store(store));

    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        engine,
        sessions: SessionRegistry::new_shared(),
        verifier: Arc::new(SharedSecretVerifier::new(config.auth_secret.clone())),
    };

    tokio::spawn(run_tombstone_reaper(state.pool.clone(), state.config.clone()));
    tokio::spawn(run_session_reaper(state.sessions.clone(), state.config.clone()));
    tokio::spawn(run_owner_teardown(state.sessions.clone(), state.engine.clone(), state.config.clone()));

    let app = Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Permanently drops tombstoned records once they've sat past their grace
/// window. Runs against durable storage only: the in-memory store already
/// excludes tombstones from `active_records`, so there is nothing live
/// depending on the row surviving past this point.
async fn run_tombstone_reaper(pool: Pool, config: Arc<Config>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(3600));
    loop {
        ticker.tick().await;
        match db::expired_tombstones(&pool, config.tombstone_grace_days).await {
            Ok(expired) => {
                for (owner_id, record_id) in expired {
                    if let Err(err) = db::delete_record(&pool, &owner_id, &record_id).await {
                        tracing::warn!(%owner_id, %record_id, %err, "failed to reap expired tombstone");
                    }
                }
            }
            Err(err) => tracing::warn!(%err, "failed to query expired tombstones"),
        }
    }
}

/// Fully evicts sessions that have sat disconnected past the reconnect
/// window. A session inside that window is held by
/// [`websocket::SessionRegistry::disconnect`] so a reconnecting device can
/// resume it; past the window there is nothing left to resume.
async fn run_session_reaper(sessions: Arc<SessionRegistry>, config: Arc<Config>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
    loop {
        ticker.tick().await;
        let drained_owners = sessions.reap_expired(config.reconnect_window_secs);
        if !drained_owners.is_empty() {
            tracing::debug!(count = drained_owners.len(), "reaped sessions past their reconnect window");
        }
    }
}

/// Reclaims a bus topic for owners that have had no live or reconnect-held
/// session for `owner_idle_teardown_secs`.
async fn run_owner_teardown(sessions: Arc<SessionRegistry>, engine: Arc<EngineRuntime>, config: Arc<Config>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        ticker.tick().await;
        for owner_id in sessions.idle_owners(config.owner_idle_teardown_secs) {
            tracing::debug!(%owner_id, "tearing down idle owner's bus topic");
            engine.drop_owner_topic(&owner_id);
        }
    }
}
