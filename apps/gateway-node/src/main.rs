use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use common::{DeliveryReceipt, DeliveryState, GatewayHealth, HelloAnnounce, MailMessage};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

mod hello;
mod outbox;
mod peer;
mod relay;
mod routes;
mod status;
mod store;


use routes::{RouteRecord, RouteStatus, RouteTable};
use store::{DeliveryRecord, InboxReadError, MailStore, OutboxRecord, ReceiveOutcome};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone)]
pub(crate) struct GatewayConfig {
    pub(crate) bind: String,
    pub(crate) state_dir: PathBuf,
    pub(crate) node_name: String,
    pub(crate) advertise_url: String,
    pub(crate) peer_url: Option<String>,
    pub(crate) peer_name: String,
    pub(crate) hello_interval_secs: u64,
    pub(crate) outbox_interval_secs: u64,
    pub(crate) relay_interval_secs: u64,
    pub(crate) route_expiry_secs: u64,
    pub(crate) status_snapshot_path: Option<PathBuf>,
    pub(crate) status_interval_secs: u64,
}

impl GatewayConfig {
    fn from_env() -> Result<Self> {
        let bind = env_or("RFMAILNET_BIND", "127.0.0.1:8080");
        let advertise_url = std::env::var("RFMAILNET_ADVERTISE_URL")
            .unwrap_or_else(|_| format!("http://{bind}"));
        let peer_url = std::env::var("RFMAILNET_PEER_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let status_snapshot_path = std::env::var("RFMAILNET_STATUS_SNAPSHOT")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            state_dir: PathBuf::from(env_or("RFMAILNET_STATE_DIR", "./data/rfmailnet")),
            node_name: env_or("RFMAILNET_NODE_NAME", "RFMAILNET-GW"),
            advertise_url,
            peer_url,
            peer_name: env_or("RFMAILNET_PEER_NAME", "RFMAILNET-HUB"),
            hello_interval_secs: env_u64("RFMAILNET_HELLO_INTERVAL_SECS", 60)?,
            outbox_interval_secs: env_u64("RFMAILNET_OUTBOX_INTERVAL_SECS", 15)?,
            relay_interval_secs: env_u64("RFMAILNET_RELAY_INTERVAL_SECS", 15)?,
            route_expiry_secs: env_u64("RFMAILNET_ROUTE_EXPIRY_SECS", 900)?,
            status_snapshot_path,
            status_interval_secs: env_u64("RFMAILNET_STATUS_INTERVAL_SECS", 30)?,
            bind,
        })
    }
}

#[derive(Clone)]
pub(crate) struct GatewayState {
    pub(crate) config: Arc<GatewayConfig>,
    pub(crate) store: Arc<Mutex<MailStore>>,
    pub(crate) routes: Arc<Mutex<RouteTable>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_target(false)
        .compact()
        .init();

    let config = Arc::new(GatewayConfig::from_env()?);

    let store = MailStore::init(config.state_dir.clone()).await?;
    let route_records = load_route_records(&config).await?;
    let route_table = RouteTable::from_records(
        config.node_name.clone(),
        config.route_expiry_secs,
        route_records,
    );

    let state = GatewayState {
        config: config.clone(),
        store: Arc::new(Mutex::new(store)),
        routes: Arc::new(Mutex::new(route_table)),
    };

    {
        let mut routes = state.routes.lock().await;
        routes.note_self(&config.advertise_url, VERSION, unix_ts());
    }
    persist_routes(&state).await?;

    if let Some(peer_url) = config.peer_url.clone() {
        info!(peer = %peer_url, "peer configured, starting exchange workers");
        tokio::spawn(hello::run_hello_loop(state.clone(), peer_url.clone()));
        tokio::spawn(outbox::run_outbox_loop(state.clone(), peer_url.clone()));
        tokio::spawn(relay::run_relay_loop(state.clone(), peer_url));
    }

    if let Some(snapshot_path) = config.status_snapshot_path.clone() {
        info!(path = %snapshot_path.display(), "status snapshot writer enabled");
        tokio::spawn(status::run_status_loop(state.clone(), snapshot_path));
    }

    let app = Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/messages", get(list_messages).post(receive_message))
        .route("/messages/{msgid}", get(read_message))
        .route("/outbox", get(outbox::list_outbox).post(outbox::stage_message))
        .route("/hello", post(hello::receive_hello))
        .route("/routes", get(list_routes))
        .with_state(state);

    let bind_addr = config.bind.parse::<SocketAddr>()?;
    info!(%bind_addr, node = %config.node_name, "gateway listening");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health(State(state): State<GatewayState>) -> Json<GatewayHealth> {
    let inbox_path = {
        let store = state.store.lock().await;
        store.inbox_dir().display().to_string()
    };

    Json(GatewayHealth {
        status: "OK".to_string(),
        node: state.config.node_name.clone(),
        version: VERSION.to_string(),
        inbox_path,
    })
}

async fn receive_message(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Json<DeliveryReceipt> {
    let msg = match serde_json::from_slice::<MailMessage>(&body) {
        Ok(msg) => msg,
        Err(err) => {
            warn!(error = %err, "rejected unparseable message");
            return Json(DeliveryReceipt::error(format!(
                "invalid message payload: {err}"
            )));
        }
    };

    let outcome = {
        let mut store = state.store.lock().await;
        store.receive(msg).await
    };

    match outcome {
        Ok(ReceiveOutcome::Saved { msgid }) => {
            info!(msgid = %msgid, "saved message");
            Json(DeliveryReceipt::ok("saved", msgid))
        }
        Ok(ReceiveOutcome::Duplicate { msgid }) => {
            debug!(msgid = %msgid, "ignored duplicate message");
            Json(DeliveryReceipt::ok("duplicate", msgid))
        }
        Err(err) => {
            error!(error = %err, "failed to save message");
            Json(DeliveryReceipt::error(err.to_string()))
        }
    }
}

async fn list_messages(State(state): State<GatewayState>) -> impl IntoResponse {
    let store = state.store.lock().await;
    match store.list_inbox().await {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(err) => {
            error!(error = %err, "failed to list inbox");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn read_message(
    State(state): State<GatewayState>,
    Path(msgid): Path<String>,
) -> impl IntoResponse {
    let store = state.store.lock().await;
    match store.read_inbox(&msgid).await {
        Ok(msg) => (StatusCode::OK, Json(msg)).into_response(),
        Err(InboxReadError::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(InboxReadError::Invalid(detail)) => {
            error!(msgid = %msgid, error = %detail, "stored message unreadable");
            StatusCode::CONFLICT.into_response()
        }
        Err(InboxReadError::Internal(err)) => {
            error!(msgid = %msgid, error = %err, "internal error while reading message");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn list_routes(State(state): State<GatewayState>) -> Json<Vec<RouteRecord>> {
    let routes = state.routes.lock().await;
    Json(routes.records())
}

fn routes_store_path(config: &GatewayConfig) -> PathBuf {
    config.state_dir.join("routes.json")
}

async fn load_route_records(config: &GatewayConfig) -> Result<Vec<RouteRecord>> {
    let path = routes_store_path(config);

    if !tokio::fs::try_exists(&path).await? {
        return Ok(Vec::new());
    }

    let payload = tokio::fs::read(&path).await?;
    serde_json::from_slice::<Vec<RouteRecord>>(&payload)
        .with_context(|| format!("invalid routes file: {}", path.display()))
}

pub(crate) async fn persist_routes(state: &GatewayState) -> Result<()> {
    let records = {
        let routes = state.routes.lock().await;
        routes.records()
    };

    let payload = serde_json::to_vec_pretty(&records)?;
    store::write_atomic(&routes_store_path(&state.config), &payload).await
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .with_context(|| format!("{name} must be an integer, got '{value}'")),
        Err(_) => Ok(default),
    }
}

pub(crate) fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
