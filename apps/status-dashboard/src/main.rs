use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{any, get};
use axum::{Json, Router};
use tracing::info;

mod document;
mod page;

#[derive(Debug, Clone)]
struct DashboardConfig {
    hub_path: PathBuf,
    node_path: PathBuf,
    bind: String,
}

impl DashboardConfig {
    fn from_env() -> Self {
        Self {
            hub_path: PathBuf::from(env_or(
                "RFMAILNET_HUB_STATUS",
                "./data/status/rfmailnet-hub.json",
            )),
            node_path: PathBuf::from(env_or(
                "RFMAILNET_NODE_STATUS",
                "./data/status/rfmailnet-node.json",
            )),
            bind: env_or("RFMAILNET_STATUS_BIND", "127.0.0.1:8082"),
        }
    }
}

#[derive(Clone)]
struct DashboardState {
    config: Arc<DashboardConfig>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_target(false)
        .compact()
        .init();

    let config = DashboardConfig::from_env();
    info!(
        hub = %config.hub_path.display(),
        node = %config.node_path.display(),
        "serving status documents"
    );

    let bind_addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("invalid RFMAILNET_STATUS_BIND value '{}'", config.bind))?;
    let state = DashboardState {
        config: Arc::new(config),
    };

    let app = Router::new()
        .route("/", any(page::status_page))
        .route("/health", get(health))
        .with_state(state);

    info!(%bind_addr, "status dashboard listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "service": "status-dashboard"
    }))
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}
