use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use trellis_graph::AppState;
use trellis_graph::config::TrellisConfig;
use trellis_graph::coordinator::{Coordinator, CoordinatorDb};
use trellis_graph::handlers;
use trellis_graph::object_store::{FsObjectStore, HttpObjectStore, ObjectStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("trellis_graph=debug,tower_http=debug")
        }))
        .init();

    let config_path =
        std::env::var("TRELLIS_CONFIG").unwrap_or_else(|_| "./trellis.toml".to_string());
    let config = TrellisConfig::load(&config_path)?;
    tracing::info!("config loaded from {config_path}");

    let object_store: Arc<dyn ObjectStore> = match &config.storage.s3 {
        Some(s3) => {
            tracing::info!("publishing chunks to {} bucket {}", s3.endpoint, s3.bucket);
            Arc::new(HttpObjectStore::new(&s3.endpoint, &s3.bucket))
        }
        None => {
            tracing::info!("publishing chunks under {}", config.storage.data_dir);
            Arc::new(FsObjectStore::new(&config.storage.data_dir))
        }
    };

    let db = CoordinatorDb::open(&config.coordinator.state_db_path)?;
    tracing::info!(
        "coordinator state db opened at {}",
        config.coordinator.state_db_path
    );

    let coordinator = Arc::new(Coordinator::new(
        config.coordinator_config(),
        db,
        object_store,
    ));
    tokio::spawn(coordinator.clone().run_flush_loop());

    let state = AppState { coordinator };

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/stats", get(handlers::stats::stats))
        .route("/shards", get(handlers::shards::shards))
        // Shards open their stream with POST /connect + Upgrade: websocket;
        // plain GET upgrades are accepted too.
        .route(
            "/connect",
            get(handlers::connect::connect).post(handlers::connect::connect),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.coordinator.listen_port));
    tracing::info!("trellis-coordinator listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
