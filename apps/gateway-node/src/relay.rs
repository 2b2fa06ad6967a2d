use super::*;

#[derive(Debug, Default)]
pub(crate) struct RelayRunReport {
    pub(crate) scanned: usize,
    pub(crate) forwarded: usize,
    pub(crate) skipped_local: usize,
    pub(crate) skipped_expired: usize,
    pub(crate) skipped_forwarded: usize,
    pub(crate) failed: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RelayDecision {
    Forward,
    SkipLocal,
    SkipExpired,
    SkipAlreadyForwarded,
}

pub(crate) fn relay_decision(
    msg: &MailMessage,
    local_node: &str,
    delivery: Option<&DeliveryRecord>,
) -> RelayDecision {
    if !msg.dest.is_empty() && msg.dest == local_node {
        return RelayDecision::SkipLocal;
    }
    if msg.ttl == 0 {
        return RelayDecision::SkipExpired;
    }
    if let Some(record) = delivery
        && record.state == DeliveryState::Sent
    {
        return RelayDecision::SkipAlreadyForwarded;
    }
    RelayDecision::Forward
}

pub(crate) async fn run_relay_once(
    state: &GatewayState,
    http: &reqwest::Client,
    default_peer_url: &str,
    now: u64,
) -> RelayRunReport {
    let mut report = RelayRunReport::default();

    let entries = {
        let store = state.store.lock().await;
        match store.inbox_entries().await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, "failed to scan inbox for relay");
                return report;
            }
        }
    };

    for entry in entries {
        report.scanned += 1;

        let decision = {
            let store = state.store.lock().await;
            relay_decision(
                &entry.msg,
                &state.config.node_name,
                store.delivery_record(&entry.msgid),
            )
        };

        match decision {
            RelayDecision::SkipLocal => report.skipped_local += 1,
            RelayDecision::SkipExpired => report.skipped_expired += 1,
            RelayDecision::SkipAlreadyForwarded => report.skipped_forwarded += 1,
            RelayDecision::Forward => {
                let target = {
                    let routes = state.routes.lock().await;
                    routes.route_for(&entry.msg.dest).map(str::to_string)
                }
                .unwrap_or_else(|| default_peer_url.to_string());

                let mut outgoing = entry.msg.clone();
                outgoing.ttl -= 1;

                match peer::post_message_to(http, &target, &outgoing).await {
                    Ok(()) => {
                        report.forwarded += 1;
                        info!(
                            msgid = %entry.msgid,
                            target = %target,
                            ttl = outgoing.ttl,
                            "relayed message"
                        );

                        let mut store = state.store.lock().await;
                        if let Err(err) = store
                            .mark_delivery(&entry.msgid, DeliveryState::Sent, 1, "", now)
                            .await
                        {
                            warn!(error = %err, msgid = %entry.msgid, "failed to record relay");
                        }
                    }
                    Err(err) => {
                        report.failed += 1;
                        warn!(error = %err, msgid = %entry.msgid, "relay attempt failed");
                    }
                }
            }
        }
    }

    report
}

pub(crate) async fn run_relay_loop(state: GatewayState, peer_url: String) {
    let http = reqwest::Client::new();
    let interval = Duration::from_secs(state.config.relay_interval_secs);

    loop {
        let report = run_relay_once(&state, &http, &peer_url, unix_ts()).await;
        if report.forwarded > 0 || report.failed > 0 {
            info!(
                scanned = report.scanned,
                forwarded = report.forwarded,
                failed = report.failed,
                "relay pass finished"
            );
        }

        tokio::time::sleep(interval).await;
    }
}
