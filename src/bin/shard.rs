use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use trellis_graph::api::GraphApi;
use trellis_graph::cdc::CdcBuffer;
use trellis_graph::config::TrellisConfig;
use trellis_graph::models::{Entity, EntityId, TypedObject, WireMessage};
use trellis_graph::query::QueryOptions;
use trellis_graph::retry::backoff_delay;
use trellis_graph::store::TripleStore;

#[derive(Clone)]
struct ShardState {
    api: Arc<GraphApi>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("trellis_graph=debug")),
        )
        .init();

    let config_path =
        std::env::var("TRELLIS_CONFIG").unwrap_or_else(|_| "./trellis.toml".to_string());
    let config = TrellisConfig::load(&config_path)?;

    let cdc = Arc::new(CdcBuffer::new(config.shard.cdc_capacity));
    let store = Arc::new(TripleStore::open(
        &config.shard.db_path,
        config.index_config(),
        cdc.clone(),
    )?);
    tracing::info!("shard store opened at {}", config.shard.db_path);

    // Shard identity is sticky: configured, else minted once and persisted.
    let shard_id = match &config.shard.shard_id {
        Some(id) => id.clone(),
        None => match store.get_meta("shard_id")? {
            Some(id) => id,
            None => {
                let id = format!("shard-{}", uuid::Uuid::new_v4());
                store.set_meta("shard_id", &id)?;
                id
            }
        },
    };
    tracing::info!("shard {shard_id} serving namespace {}", config.shard.namespace);

    let api = Arc::new(GraphApi::new(store.clone(), config.query.plan_cache_size));
    tokio::spawn(serve_http(api, config.shard.listen_port));

    let mut last_acked: u64 = store
        .get_meta("last_acked_sequence")?
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0);
    let mut sequence = last_acked;

    let mut attempt = 0u32;
    loop {
        match run_session(
            &config,
            &store,
            &cdc,
            &shard_id,
            &mut sequence,
            &mut last_acked,
        )
        .await
        {
            Ok(SessionEnd::Shutdown) => break,
            Ok(SessionEnd::Disconnected) => {
                attempt = 0;
            }
            Err(e) => {
                tracing::warn!("session failed: {e}");
                attempt += 1;
            }
        }
        let delay = backoff_delay(&config.retry, attempt.min(6));
        tracing::info!("reconnecting to coordinator in {delay:?}");
        tokio::time::sleep(delay).await;
    }

    store.save_bloom()?;
    tracing::info!("shard {shard_id} shut down cleanly");
    Ok(())
}

enum SessionEnd {
    Shutdown,
    Disconnected,
}

/// One websocket session: register, then alternate between draining the CDC
/// buffer into `cdc` batches and applying coordinator replies.
async fn run_session(
    config: &TrellisConfig,
    store: &Arc<TripleStore>,
    cdc: &Arc<CdcBuffer>,
    shard_id: &str,
    sequence: &mut u64,
    last_acked: &mut u64,
) -> anyhow::Result<SessionEnd> {
    let url = &config.shard.coordinator_url;
    let (ws, _) = connect_async(url.as_str()).await?;
    let (mut sink, mut stream) = ws.split();
    tracing::info!("connected to coordinator at {url}");

    let register = WireMessage::Register {
        shard_id: shard_id.to_string(),
        namespace: config.shard.namespace.clone(),
        last_sequence: *last_acked,
    };
    sink.send(Message::Text(serde_json::to_string(&register)?.into()))
        .await?;

    // The registration reply must arrive before any cdc traffic.
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<WireMessage>(text.as_str())? {
                    WireMessage::Registered { .. } => break,
                    WireMessage::Error { code, message } => {
                        anyhow::bail!("registration rejected ({code}): {message}")
                    }
                    other => anyhow::bail!("unexpected reply to register: {other:?}"),
                }
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
            None => anyhow::bail!("coordinator closed during registration"),
        }
    }
    tracing::info!("registered at sequence {last_acked}");

    let mut drain = tokio::time::interval(Duration::from_millis(
        config.coordinator.batch_timeout_ms.max(10),
    ));
    loop {
        tokio::select! {
            _ = drain.tick() => {
                let events = cdc.flush();
                if events.is_empty() {
                    continue;
                }
                *sequence += 1;
                let batch = WireMessage::Cdc {
                    shard_id: shard_id.to_string(),
                    events,
                    sequence: *sequence,
                };
                sink.send(Message::Text(serde_json::to_string(&batch)?.into())).await?;
            }

            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<WireMessage>(text.as_str())? {
                            WireMessage::Ack { sequence: acked, .. } => {
                                *last_acked = acked;
                                store.set_meta("last_acked_sequence", &acked.to_string())?;
                                tracing::debug!("coordinator acked sequence {acked}");
                            }
                            WireMessage::Error { code, message } => {
                                tracing::warn!("coordinator error ({code}): {message}");
                            }
                            other => tracing::warn!("unexpected message: {other:?}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Disconnected),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                let bye = WireMessage::Deregister { shard_id: shard_id.to_string() };
                let _ = sink
                    .send(Message::Text(serde_json::to_string(&bye)?.into()))
                    .await;
                return Ok(SessionEnd::Shutdown);
            }
        }
    }
}

// ── Shard-local HTTP surface ──
//
// A development stand-in for the production RPC router: the same GraphApi
// methods, bound one-to-one.

async fn serve_http(api: Arc<GraphApi>, port: u16) {
    let state = ShardState { api };
    let app = Router::new()
        .route(
            "/api/v1/entity",
            get(get_entity).post(create_entity).delete(delete_entity),
        )
        .route("/api/v1/entity/update", post(update_entity))
        .route("/api/v1/query", post(run_query))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("shard api listening on {addr}");
    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("shard api server failed: {e}");
            }
        }
        Err(e) => tracing::error!("shard api bind failed: {e}"),
    }
}

#[derive(Deserialize)]
struct EntityQuery {
    id: String,
}

async fn get_entity(
    State(state): State<ShardState>,
    Query(params): Query<EntityQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let id = EntityId::parse(&params.id).map_err(|e| e.into_response_parts())?;
    let entity = state.api.get_entity(&id).map_err(|e| e.into_response_parts())?;
    Ok(Json(entity))
}

async fn create_entity(
    State(state): State<ShardState>,
    Json(entity): Json<Entity>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .api
        .create_entity(&entity)
        .map_err(|e| e.into_response_parts())?;
    Ok(StatusCode::CREATED)
}

#[derive(Deserialize)]
struct UpdateRequest {
    id: String,
    props: BTreeMap<String, TypedObject>,
}

async fn update_entity(
    State(state): State<ShardState>,
    Json(req): Json<UpdateRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let id = EntityId::parse(&req.id).map_err(|e| e.into_response_parts())?;
    state
        .api
        .update_entity(&id, &req.props)
        .map_err(|e| e.into_response_parts())?;
    Ok(StatusCode::OK)
}

async fn delete_entity(
    State(state): State<ShardState>,
    Query(params): Query<EntityQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let id = EntityId::parse(&params.id).map_err(|e| e.into_response_parts())?;
    state
        .api
        .delete_entity(&id)
        .map_err(|e| e.into_response_parts())?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    cursor: Option<String>,
}

async fn run_query(
    State(state): State<ShardState>,
    Json(req): Json<QueryRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let result = state
        .api
        .query(
            &req.query,
            &QueryOptions {
                limit: req.limit,
                cursor: req.cursor,
            },
        )
        .map_err(|e| e.into_response_parts())?;
    Ok(Json(result))
}
