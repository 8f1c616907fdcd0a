//! HTTP server assembly

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use netmesh_common::Database;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::extclient::{
    extclient_router, routes::ApiState, AccessGate, AclEngine, BroadcastBus, ExtClientService,
    MessageBus, NullBus, Propagator, WebhookBus,
};
use crate::seed::TopologySeed;
use crate::settings::{BusKind, ServerConfig};
use crate::store::{SqliteStore, TopologyStore};

/// Build the engine around `store` and `bus`. Must be called inside a tokio runtime.
pub fn build_state(
    config: &ServerConfig,
    store: Arc<dyn TopologyStore>,
    bus: Arc<dyn MessageBus>,
) -> (Arc<ApiState>, tokio::task::JoinHandle<()>) {
    let (propagator, worker) = Propagator::spawn(
        bus,
        config.propagation.queue_capacity,
        config.propagation.max_in_flight,
    );
    let acl = AclEngine::new(config.acl.denied_ranges);
    let gate = AccessGate::new(store.clone(), config.capabilities);
    let service = ExtClientService::new(store, acl, gate, propagator);

    let state = Arc::new(ApiState {
        service,
        master_key: config.master_key.clone(),
    });
    (state, worker)
}

/// Full application router
pub fn router(state: Arc<ApiState>) -> Router {
    let api = extclient_router(state.clone()).merge(
        Router::new()
            .route("/health", get(health_handler))
            .with_state(state),
    );

    Router::new()
        .nest("/api", api)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}

/// Bus selected by configuration
pub fn bus_from_config(config: &ServerConfig) -> anyhow::Result<Arc<dyn MessageBus>> {
    let bus: Arc<dyn MessageBus> = match config.propagation.bus {
        BusKind::Null => Arc::new(NullBus),
        BusKind::Broadcast => Arc::new(BroadcastBus::new(config.propagation.queue_capacity)),
        BusKind::Webhook => {
            let url = config
                .propagation
                .webhook_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("propagation.webhook_url is required for the webhook bus"))?;
            Arc::new(WebhookBus::new(
                url,
                Duration::from_secs(config.propagation.webhook_timeout_secs),
            )?)
        }
    };
    Ok(bus)
}

/// Open the store, apply the seed file and serve until ctrl-c
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let db = Database::open(&config.db_path)?;
    let store = Arc::new(SqliteStore::new(db));

    if let Some(path) = &config.seed_path {
        TopologySeed::load(path)?.apply(store.as_ref())?;
    }

    let bus = bus_from_config(&config)?;
    info!("Publishing events on {} bus", bus.name());

    let (state, worker) = build_state(&config, store, bus);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!("netmesh API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Received shutdown signal");
        })
        .await?;

    // The router (and every propagator handle) is gone; let queued events drain.
    if tokio::time::timeout(Duration::from_secs(10), worker).await.is_err() {
        warn!("Propagation queue did not drain before shutdown");
    }
    info!("Server shutdown complete");
    Ok(())
}

async fn health_handler(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "netmesh",
        "version": netmesh_common::VERSION,
        "propagation": state.service.propagator().stats(),
    }))
}
