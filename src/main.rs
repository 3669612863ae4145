//! facility-gateway server entry point.
//!
//! Wires the store, notifier, sources, and scheduler, then serves the REST
//! and WebSocket endpoints until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum::routing::get;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use facility_gateway::api;
use facility_gateway::app_state::AppState;
use facility_gateway::config::{GatewayConfig, SettingsHandle, SourceSettings};
use facility_gateway::domain::Notifier;
use facility_gateway::escalation::HttpSmsGateway;
use facility_gateway::persistence::{FacilityStore, MemoryStore, PostgresStore};
use facility_gateway::pipeline::{EscalationRouter, Pipeline};
use facility_gateway::scheduler::PollScheduler;
use facility_gateway::sources::{
    AccessControlAdapter, EmergencyCallAdapter, SignalListener, emergency_call,
};
use facility_gateway::ws::handler::ws_handler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env().context("loading configuration")?;
    init_tracing(config.log_json);
    tracing::info!(addr = %config.listen_addr, "starting facility-gateway");

    let store: Arc<dyn FacilityStore> = if config.persistence_enabled {
        Arc::new(
            PostgresStore::connect(&config)
                .await
                .context("connecting to the canonical store")?,
        )
    } else {
        tracing::warn!("persistence disabled, using in-memory store");
        Arc::new(MemoryStore::new())
    };

    let settings = SettingsHandle::new(SourceSettings::from_env(1));
    let notifier = Notifier::new(config.notifier_capacity);
    let router = EscalationRouter::new(notifier.clone(), Arc::new(HttpSmsGateway::default()));
    let pipeline = Pipeline::new(store, router, config.alarm_window());

    let cancel = CancellationToken::new();
    let mut scheduler = PollScheduler::new(pipeline, settings.clone(), cancel.clone());
    scheduler.register(Arc::new(AccessControlAdapter::new()));
    scheduler.register(Arc::new(EmergencyCallAdapter::default()));
    let scheduler = Arc::new(scheduler);
    scheduler.start().await;

    let listener_task = scheduler
        .trigger_handle(emergency_call::SOURCE_NAME)
        .map(|trigger| SignalListener::new(settings.clone(), trigger, cancel.clone()).spawn());

    let app_state = AppState {
        scheduler: Arc::clone(&scheduler),
        notifier,
        settings,
    };

    let app = Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(30)))
                .layer(CorsLayer::permissive()),
        )
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("ctrl-c received, shutting down"),
                () = shutdown.cancelled() => {}
            }
            shutdown.cancel();
        })
        .await
        .context("serving http")?;

    scheduler.shutdown().await;
    if let Some(task) = listener_task {
        let _ = task.await;
    }
    tracing::info!("facility-gateway stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
