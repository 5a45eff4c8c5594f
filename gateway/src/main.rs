use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use region_mesh::{
    DnsResolver, MeshConfig, RegionTracker, LATENCIES_PATH, LATENCY_PATH, STATS_PATH,
};

mod model;
mod publisher;
mod routes;

use model::Model;
use publisher::Publisher;

#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<Publisher>,
    pub model: Arc<Model>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "latency_gateway=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app = std::env::var("FLY_APP_NAME").context("FLY_APP_NAME must be set")?;
    let region = std::env::var("FLY_REGION").context("FLY_REGION must be set")?;
    let cfg = MeshConfig::new(app, region.clone());

    let resolver = Arc::new(DnsResolver::from_system_conf()?);
    let tracker = Arc::new(RegionTracker::new(cfg, resolver));

    let mut mesh_errs = tracker.clone().run();
    tokio::spawn(async move {
        while let Some(err) = mesh_errs.recv().await {
            warn!("{err}");
        }
    });

    let publisher = Arc::new(Publisher::new(tracker.clone(), region.clone()));
    publisher.clone().run();

    let model = Arc::new(Model::new(tracker.clone()));
    model.clone().run();

    let state = AppState {
        publisher: publisher.clone(),
        model: model.clone(),
    };

    let router = Router::new()
        .route(LATENCY_PATH, get(publisher::latency))
        .route(LATENCIES_PATH, get(publisher::latencies))
        .route(STATS_PATH, get(publisher::stats))
        .route("/", get(routes::index).post(routes::solve))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "80".to_string());
    let addr = format!("0.0.0.0:{port}");
    info!(%region, %addr, "latency gateway starting");

    let term = signal(SignalKind::terminate())?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(term))
        .await?;

    model.stop();
    publisher.stop();
    tracker.stop();
    info!("shutdown complete");

    Ok(())
}

/// Resolves on the first SIGINT/SIGTERM, starting the graceful drain. A
/// second signal aborts the drain and closes immediately.
async fn shutdown_signal(mut term: Signal) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
    info!("graceful shutdown");

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
        info!("immediate shutdown");
        std::process::exit(0);
    });
}
