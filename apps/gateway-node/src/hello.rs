use super::*;

pub(crate) async fn receive_hello(
    State(state): State<GatewayState>,
    Json(hello): Json<HelloAnnounce>,
) -> Json<serde_json::Value> {
    info!(node = %hello.node, url = %hello.advertise_url, "hello received");

    {
        let now = unix_ts();
        let mut routes = state.routes.lock().await;
        routes.observe_hello(&hello, now);
        routes.expire_stale(now);
    }

    if let Err(err) = persist_routes(&state).await {
        warn!(error = %err, "failed to persist routes after hello");
    }

    Json(serde_json::json!({
        "status": "ok",
        "node": state.config.node_name,
    }))
}

pub(crate) async fn run_hello_loop(state: GatewayState, peer_url: String) {
    let http = reqwest::Client::new();
    let interval = Duration::from_secs(state.config.hello_interval_secs);

    loop {
        let hello = HelloAnnounce {
            node: state.config.node_name.clone(),
            version: VERSION.to_string(),
            advertise_url: state.config.advertise_url.clone(),
            sent_at_unix: unix_ts(),
        };

        let outcome = peer::send_hello_to(&http, &peer_url, &hello).await;
        let online = outcome.is_ok();
        if let Err(err) = outcome {
            debug!(error = %err, peer = %peer_url, "hello not delivered");
        }

        {
            let now = unix_ts();
            let mut routes = state.routes.lock().await;
            routes.note_self(&state.config.advertise_url, VERSION, now);
            routes.note_peer(&state.config.peer_name, &peer_url, online, None, now);

            let removed = routes.expire_stale(now);
            if removed > 0 {
                info!(removed, "expired stale routes");
            }
        }

        if let Err(err) = persist_routes(&state).await {
            warn!(error = %err, "failed to persist routes after hello round");
        }

        tokio::time::sleep(interval).await;
    }
}
