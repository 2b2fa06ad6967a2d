use super::*;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
pub(crate) struct StatusSnapshot {
    pub(crate) node: String,
    pub(crate) version: String,
    pub(crate) status: String,
    pub(crate) peer: String,
    pub(crate) peer_status: String,
    pub(crate) inbox_messages: usize,
    pub(crate) outbox_pending: usize,
    pub(crate) staged: usize,
    pub(crate) retrying: usize,
    pub(crate) delivered: usize,
    pub(crate) failed: usize,
    pub(crate) routes_known: usize,
    pub(crate) updated_at_unix: u64,
}

pub(crate) async fn compose_snapshot(state: &GatewayState, now: u64) -> StatusSnapshot {
    let (inbox_messages, outbox_pending, counts) = {
        let store = state.store.lock().await;
        let inbox = store.inbox_entries().await.map(|e| e.len()).unwrap_or(0);
        let outbox = store.outbox_records().await.map(|r| r.len()).unwrap_or(0);
        (inbox, outbox, store.delivery_counts())
    };

    let (routes_known, peer_status) = {
        let routes = state.routes.lock().await;
        let peer_status = match routes.status_of(&state.config.peer_name) {
            Some(RouteStatus::Online) => "online".to_string(),
            Some(RouteStatus::Offline) => "offline".to_string(),
            None => "unknown".to_string(),
        };
        (routes.len(), peer_status)
    };

    StatusSnapshot {
        node: state.config.node_name.clone(),
        version: VERSION.to_string(),
        status: "online".to_string(),
        peer: if state.config.peer_url.is_some() {
            state.config.peer_name.clone()
        } else {
            "none".to_string()
        },
        peer_status,
        inbox_messages,
        outbox_pending,
        staged: counts.new,
        retrying: counts.retry,
        delivered: counts.sent,
        failed: counts.failed,
        routes_known,
        updated_at_unix: now,
    }
}

pub(crate) async fn run_status_loop(state: GatewayState, snapshot_path: PathBuf) {
    let interval = Duration::from_secs(state.config.status_interval_secs);

    loop {
        let snapshot = compose_snapshot(&state, unix_ts()).await;

        match serde_json::to_vec_pretty(&snapshot) {
            Ok(payload) => {
                if let Err(err) = store::write_atomic(&snapshot_path, &payload).await {
                    warn!(
                        error = %err,
                        path = %snapshot_path.display(),
                        "failed to write status snapshot"
                    );
                }
            }
            Err(err) => warn!(error = %err, "failed to encode status snapshot"),
        }

        tokio::time::sleep(interval).await;
    }
}
