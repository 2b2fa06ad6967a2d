use super::*;

pub(crate) const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_SCHEDULE_SECS: [u64; 5] = [60, 120, 240, 480, 600];

pub(crate) fn next_backoff_secs(attempts: u32) -> u64 {
    if attempts == 0 {
        return BACKOFF_SCHEDULE_SECS[0];
    }
    let idx = (attempts as usize).min(BACKOFF_SCHEDULE_SECS.len() - 1);
    BACKOFF_SCHEDULE_SECS[idx]
}

#[derive(Debug, Default)]
pub(crate) struct OutboxRunReport {
    pub(crate) attempted: usize,
    pub(crate) delivered: usize,
    pub(crate) retried: usize,
    pub(crate) failed: usize,
    pub(crate) expired: usize,
    pub(crate) last_error: Option<String>,
}

enum OutboxDisposition {
    Delivered,
    Retried { last_error: String },
    Failed { last_error: String },
    Expired,
}

pub(crate) async fn stage_message(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Json<DeliveryReceipt> {
    let msg = match serde_json::from_slice::<MailMessage>(&body) {
        Ok(msg) => msg,
        Err(err) => {
            warn!(error = %err, "rejected unparseable staging request");
            return Json(DeliveryReceipt::error(format!(
                "invalid message payload: {err}"
            )));
        }
    };

    let msgid = msg.msgid.clone();
    let staged = {
        let mut store = state.store.lock().await;
        store.stage_outbound(msg, unix_ts()).await
    };

    match staged {
        Ok(path) => {
            info!(msgid = %msgid, path = %path.display(), "staged outbound message");
            Json(DeliveryReceipt::ok("staged", msgid))
        }
        Err(err) => {
            error!(error = %err, msgid = %msgid, "failed to stage outbound message");
            Json(DeliveryReceipt::error(err.to_string()))
        }
    }
}

pub(crate) async fn list_outbox(State(state): State<GatewayState>) -> impl IntoResponse {
    let store = state.store.lock().await;
    match store.outbox_records().await {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(err) => {
            error!(error = %err, "failed to list outbox");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub(crate) async fn run_outbox_once(
    state: &GatewayState,
    http: &reqwest::Client,
    default_peer_url: &str,
    now: u64,
) -> OutboxRunReport {
    let mut report = OutboxRunReport::default();

    let due = {
        let store = state.store.lock().await;
        match store.due_outbox(now).await {
            Ok(due) => due,
            Err(err) => {
                warn!(error = %err, "failed to scan outbox");
                report.last_error = Some(format!("{err:#}"));
                return report;
            }
        }
    };

    for record in due {
        let msgid = record.msg.msgid.clone();
        if record.msg.ttl > 0 {
            report.attempted += 1;
        }

        match process_record(state, http, default_peer_url, record, now).await {
            Ok(OutboxDisposition::Delivered) => {
                report.delivered += 1;
                info!(msgid = %msgid, "message delivered");
            }
            Ok(OutboxDisposition::Retried { last_error }) => {
                report.retried += 1;
                debug!(msgid = %msgid, error = %last_error, "delivery failed, retry scheduled");
                report.last_error = Some(last_error);
            }
            Ok(OutboxDisposition::Failed { last_error }) => {
                report.failed += 1;
                warn!(msgid = %msgid, error = %last_error, "message failed permanently");
                report.last_error = Some(last_error);
            }
            Ok(OutboxDisposition::Expired) => {
                report.expired += 1;
                debug!(msgid = %msgid, "dropped expired message");
            }
            Err(err) => {
                warn!(error = %err, msgid = %msgid, "outbox bookkeeping error");
                report.last_error = Some(format!("{err:#}"));
            }
        }
    }

    report
}

async fn process_record(
    state: &GatewayState,
    http: &reqwest::Client,
    default_peer_url: &str,
    mut record: OutboxRecord,
    now: u64,
) -> Result<OutboxDisposition> {
    let msgid = record.msg.msgid.clone();

    if record.msg.ttl == 0 {
        let mut store = state.store.lock().await;
        store
            .mark_delivery(
                &msgid,
                DeliveryState::Failed,
                record.attempts,
                "TTL_EXPIRED",
                now,
            )
            .await?;
        store.remove_outbox_record(&msgid).await?;
        return Ok(OutboxDisposition::Expired);
    }

    let mut outgoing = record.msg.clone();
    outgoing.ttl -= 1;

    let target = {
        let routes = state.routes.lock().await;
        routes.route_for(&outgoing.dest).map(str::to_string)
    }
    .unwrap_or_else(|| default_peer_url.to_string());

    let sent = peer::post_message_to(http, &target, &outgoing).await;

    record.attempts += 1;
    record.updated_at_unix = now;

    let mut store = state.store.lock().await;
    match sent {
        Ok(()) => {
            store
                .mark_delivery(&msgid, DeliveryState::Sent, record.attempts, "", now)
                .await?;
            store.remove_outbox_record(&msgid).await?;
            Ok(OutboxDisposition::Delivered)
        }
        Err(err) => {
            let last_error = format!("{err:#}");

            if record.attempts >= MAX_ATTEMPTS {
                store
                    .mark_delivery(
                        &msgid,
                        DeliveryState::Failed,
                        record.attempts,
                        &last_error,
                        now,
                    )
                    .await?;
                store.remove_outbox_record(&msgid).await?;
                return Ok(OutboxDisposition::Failed { last_error });
            }

            record.last_error = last_error.clone();
            record.next_attempt_unix = now + next_backoff_secs(record.attempts);
            store.save_outbox_record(&record).await?;
            store
                .mark_delivery(
                    &msgid,
                    DeliveryState::Retry,
                    record.attempts,
                    &last_error,
                    now,
                )
                .await?;

            Ok(OutboxDisposition::Retried { last_error })
        }
    }
}

pub(crate) async fn run_outbox_loop(state: GatewayState, peer_url: String) {
    let http = reqwest::Client::new();
    let interval = Duration::from_secs(state.config.outbox_interval_secs);

    tokio::time::sleep(Duration::from_secs(3)).await;

    loop {
        let report = run_outbox_once(&state, &http, &peer_url, unix_ts()).await;
        if report.attempted > 0 || report.expired > 0 {
            info!(
                attempted = report.attempted,
                delivered = report.delivered,
                retried = report.retried,
                failed = report.failed,
                expired = report.expired,
                "outbox pass finished"
            );
        }

        tokio::time::sleep(interval).await;
    }
}
