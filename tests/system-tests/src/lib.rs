#[cfg(test)]
mod tests {
    use std::fs;
    use std::ffi::OsString;
    use std::path::Path;
    use std::path::PathBuf;
    use std::process::Stdio;
    use std::sync::OnceLock;
    use std::time::SystemTime;
    use std::time::Duration;

    use anyhow::{Context, Result, bail};
    use common::{HelloAnnounce, MailMessage};
    use gateway_client::GatewayClient;
    use reqwest::StatusCode;
    use tokio::process::{Child, Command};
    use tokio::time::sleep;

    #[tokio::test]
    async fn gateway_message_roundtrip() -> Result<()> {
        let bind = "127.0.0.1:19090";
        let state_dir = fresh_data_dir("roundtrip");
        let mut gateway = start_gateway(bind, &state_dir).await?;
        let client = GatewayClient::new(format!("http://{bind}"));

        let result = async {
            let health = client.health().await?;
            assert_eq!(health.status, "OK");
            assert_eq!(health.node, "RFMAILNET-GW");

            let msg = MailMessage::new("sys-rt-1", "VK2ABC-GW", 3)
                .with_body("qso log attached")
                .with_origin("VK2XYZ-GW");

            let receipt = client.post_message(&msg).await?;
            assert_eq!(receipt.status, "saved");
            assert_eq!(receipt.msgid, "sys-rt-1");

            let again = client.post_message(&msg).await?;
            assert_eq!(again.status, "duplicate");

            let entries = client.inbox().await?;
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].msgid, "sys-rt-1");
            assert!(entries[0].size_bytes > 0);

            let stored = client.read_message("sys-rt-1").await?;
            assert_eq!(stored["body"], "qso log attached");
            assert_eq!(stored["ttl"], 3);
            assert_eq!(stored["origin"], "VK2XYZ-GW");

            Ok::<(), anyhow::Error>(())
        }
        .await;

        stop_node(&mut gateway).await;
        let _ = fs::remove_dir_all(&state_dir);
        result
    }

    #[tokio::test]
    async fn hello_announcement_updates_routes() -> Result<()> {
        let bind = "127.0.0.1:19091";
        let state_dir = fresh_data_dir("hello");
        let mut gateway = start_gateway(bind, &state_dir).await?;
        let client = GatewayClient::new(format!("http://{bind}"));

        let result = async {
            let hello = HelloAnnounce {
                node: "VK2TST-GW".to_string(),
                version: "0.2.0".to_string(),
                advertise_url: "http://127.0.0.1:9".to_string(),
                sent_at_unix: 1,
            };

            let reply = client.send_hello(&hello).await?;
            assert_eq!(reply["status"], "ok");
            assert_eq!(reply["node"], "RFMAILNET-GW");

            let routes = client.routes().await?;
            let records = routes.as_array().context("routes listing is not an array")?;
            let learned = records
                .iter()
                .find(|record| record["node"] == "VK2TST-GW")
                .context("announced node missing from routes")?;
            assert_eq!(learned["url"], "http://127.0.0.1:9");
            assert_eq!(learned["status"], "online");

            Ok::<(), anyhow::Error>(())
        }
        .await;

        stop_node(&mut gateway).await;
        let _ = fs::remove_dir_all(&state_dir);
        result
    }

    #[tokio::test]
    async fn dashboard_renders_status_documents() -> Result<()> {
        let bind = "127.0.0.1:19092";
        let data_dir = fresh_data_dir("dashboard");
        let hub_path = data_dir.join("hub.json");
        let node_path = data_dir.join("node.json");

        fs::write(
            &hub_path,
            r#"{"node":"VK2ICW-HUB","status":"online","uptime":"5d"}"#,
        )?;

        let mut dashboard = start_dashboard(bind, &hub_path, &node_path).await?;

        let result = async {
            let url = format!("http://{bind}/");
            let first = reqwest::get(&url).await?.error_for_status()?.text().await?;

            let node_row = first.find("<tr><th>node</th><td>VK2ICW-HUB</td></tr>");
            let status_row = first.find("<tr><th>status</th><td>online</td></tr>");
            let uptime_row = first.find("<tr><th>uptime</th><td>5d</td></tr>");
            assert!(node_row.is_some() && status_row.is_some() && uptime_row.is_some());
            assert!(node_row < status_row && status_row < uptime_row);

            let expected_error = format!(
                "<tr><td class=\"error\">File not found: {}</td></tr>",
                node_path.display()
            );
            assert!(first.contains(&expected_error));

            let second = reqwest::get(&url).await?.error_for_status()?.text().await?;
            assert_eq!(first, second);

            Ok::<(), anyhow::Error>(())
        }
        .await;

        stop_node(&mut dashboard).await;
        let _ = fs::remove_dir_all(&data_dir);
        result
    }

    #[tokio::test]
    async fn dashboard_escapes_document_content() -> Result<()> {
        let bind = "127.0.0.1:19093";
        let data_dir = fresh_data_dir("dashboard-escape");
        let hub_path = data_dir.join("hub.json");
        let node_path = data_dir.join("node.json");

        fs::write(&hub_path, r#"{"note":"<script>alert(1)</script>"}"#)?;
        fs::write(&node_path, r#"{"status":"ok"}"#)?;

        let mut dashboard = start_dashboard(bind, &hub_path, &node_path).await?;

        let result = async {
            let page = reqwest::get(format!("http://{bind}/"))
                .await?
                .error_for_status()?
                .text()
                .await?;

            assert!(page.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
            assert!(!page.contains("<script>"));

            Ok::<(), anyhow::Error>(())
        }
        .await;

        stop_node(&mut dashboard).await;
        let _ = fs::remove_dir_all(&data_dir);
        result
    }

    #[tokio::test]
    async fn staged_message_is_forwarded_to_the_peer_gateway() -> Result<()> {
        let hub_bind = "127.0.0.1:19094";
        let edge_bind = "127.0.0.1:19095";
        let hub_dir = fresh_data_dir("forward-hub");
        let edge_dir = fresh_data_dir("forward-edge");

        let mut hub = start_gateway_with_env(
            hub_bind,
            &hub_dir,
            &[("RFMAILNET_NODE_NAME", "VK2HUB-GW")],
        )
        .await?;
        let mut edge = start_gateway_with_env(
            edge_bind,
            &edge_dir,
            &[
                ("RFMAILNET_NODE_NAME", "VK2EDGE-GW"),
                ("RFMAILNET_PEER_URL", &format!("http://{hub_bind}")),
                ("RFMAILNET_PEER_NAME", "VK2HUB-GW"),
                ("RFMAILNET_OUTBOX_INTERVAL_SECS", "1"),
            ],
        )
        .await?;

        let edge_client = GatewayClient::new(format!("http://{edge_bind}"));
        let hub_client = GatewayClient::new(format!("http://{hub_bind}"));

        let result = async {
            let msg = MailMessage::new("sys-fwd-1", "VK2HUB-GW", 3)
                .with_body("store and forward")
                .with_origin("VK2EDGE-GW");

            let receipt = edge_client.stage_message(&msg).await?;
            assert_eq!(receipt.status, "staged");

            let delivered = wait_for_message(&hub_client, "sys-fwd-1", 40).await?;
            assert_eq!(delivered["body"], "store and forward");
            assert_eq!(delivered["origin"], "VK2EDGE-GW");
            assert_eq!(delivered["ttl"], 2);

            Ok::<(), anyhow::Error>(())
        }
        .await;

        stop_node(&mut edge).await;
        stop_node(&mut hub).await;
        let _ = fs::remove_dir_all(&edge_dir);
        let _ = fs::remove_dir_all(&hub_dir);
        result
    }

    #[tokio::test]
    async fn relay_forwards_through_traffic() -> Result<()> {
        let hub_bind = "127.0.0.1:19096";
        let relay_bind = "127.0.0.1:19097";
        let hub_dir = fresh_data_dir("relay-hub");
        let relay_dir = fresh_data_dir("relay-edge");

        let mut hub = start_gateway_with_env(
            hub_bind,
            &hub_dir,
            &[("RFMAILNET_NODE_NAME", "VK2HUB2-GW")],
        )
        .await?;
        let mut relay = start_gateway_with_env(
            relay_bind,
            &relay_dir,
            &[
                ("RFMAILNET_NODE_NAME", "VK2REL-GW"),
                ("RFMAILNET_PEER_URL", &format!("http://{hub_bind}")),
                ("RFMAILNET_PEER_NAME", "VK2HUB2-GW"),
                ("RFMAILNET_RELAY_INTERVAL_SECS", "1"),
            ],
        )
        .await?;

        let relay_client = GatewayClient::new(format!("http://{relay_bind}"));
        let hub_client = GatewayClient::new(format!("http://{hub_bind}"));

        let result = async {
            let msg = MailMessage::new("sys-rel-1", "VK9DX-GW", 4)
                .with_body("pass it on")
                .with_origin("VK2FAR-GW");

            let receipt = relay_client.post_message(&msg).await?;
            assert_eq!(receipt.status, "saved");

            let forwarded = wait_for_message(&hub_client, "sys-rel-1", 40).await?;
            assert_eq!(forwarded["ttl"], 3);
            assert_eq!(forwarded["origin"], "VK2FAR-GW");

            let kept = relay_client.read_message("sys-rel-1").await?;
            assert_eq!(kept["ttl"], 4);

            Ok::<(), anyhow::Error>(())
        }
        .await;

        stop_node(&mut relay).await;
        stop_node(&mut hub).await;
        let _ = fs::remove_dir_all(&relay_dir);
        let _ = fs::remove_dir_all(&hub_dir);
        result
    }

    #[tokio::test]
    async fn cli_send_is_delivered_and_listed_in_inbox() -> Result<()> {
        let bind = "127.0.0.1:19098";
        let base_url = format!("http://{bind}");
        let state_dir = fresh_data_dir("cli-send");

        let mut gateway = start_gateway_with_env(
            bind,
            &state_dir,
            &[
                ("RFMAILNET_NODE_NAME", "VK2SELF-GW"),
                ("RFMAILNET_PEER_URL", &base_url),
                ("RFMAILNET_PEER_NAME", "VK2SELF-GW"),
                ("RFMAILNET_OUTBOX_INTERVAL_SECS", "1"),
            ],
        )
        .await?;
        let client = GatewayClient::new(&base_url);

        let result = async {
            let send_output = run_cli(&[
                "--gateway-url",
                &base_url,
                "send",
                "--dest",
                "VK2SELF-GW",
                "--body",
                "hello myself",
                "--msgid",
                "sys-cli-1",
            ])
            .await?;
            assert!(send_output.contains("staged message sys-cli-1 for VK2SELF-GW"));

            wait_for_message(&client, "sys-cli-1", 40).await?;

            let inbox_output = run_cli(&["--gateway-url", &base_url, "inbox"]).await?;
            assert!(inbox_output.contains("sys-cli-1"));

            Ok::<(), anyhow::Error>(())
        }
        .await;

        stop_node(&mut gateway).await;
        let _ = fs::remove_dir_all(&state_dir);
        result
    }

    #[tokio::test]
    async fn gateway_snapshot_feeds_the_dashboard() -> Result<()> {
        let gateway_bind = "127.0.0.1:19099";
        let dashboard_bind = "127.0.0.1:19100";
        let state_dir = fresh_data_dir("snapshot");
        let snapshot_path = state_dir.join("status").join("rfmailnet-node.json");
        let absent_hub = state_dir.join("status").join("rfmailnet-hub.json");

        let mut gateway = start_gateway_with_env(
            gateway_bind,
            &state_dir,
            &[
                ("RFMAILNET_NODE_NAME", "VK2SNAP-GW"),
                (
                    "RFMAILNET_STATUS_SNAPSHOT",
                    snapshot_path.to_str().context("snapshot path not utf-8")?,
                ),
                ("RFMAILNET_STATUS_INTERVAL_SECS", "1"),
            ],
        )
        .await?;
        let client = GatewayClient::new(format!("http://{gateway_bind}"));

        let result = async {
            let msg = MailMessage::new("sys-snap-1", "VK2SNAP-GW", 2).with_body("for the counter");
            client.post_message(&msg).await?;

            wait_for_file(&snapshot_path, 40).await?;
            let mut dashboard =
                start_dashboard(dashboard_bind, &absent_hub, &snapshot_path).await?;

            let page_result = async {
                let mut page = String::new();
                for _ in 0..40usize {
                    page = reqwest::get(format!("http://{dashboard_bind}/"))
                        .await?
                        .error_for_status()?
                        .text()
                        .await?;
                    if page.contains("<tr><th>inbox_messages</th><td>1</td></tr>") {
                        break;
                    }
                    sleep(Duration::from_millis(500)).await;
                }

                assert!(page.contains("<tr><th>node</th><td>VK2SNAP-GW</td></tr>"));
                assert!(page.contains("<tr><th>inbox_messages</th><td>1</td></tr>"));
                let expected_error = format!("File not found: {}", absent_hub.display());
                assert!(page.contains(&expected_error));

                Ok::<(), anyhow::Error>(())
            }
            .await;

            stop_node(&mut dashboard).await;
            page_result
        }
        .await;

        stop_node(&mut gateway).await;
        let _ = fs::remove_dir_all(&state_dir);
        result
    }

    async fn start_gateway(bind: &str, state_dir: &Path) -> Result<Child> {
        start_gateway_with_env(bind, state_dir, &[]).await
    }

    async fn start_gateway_with_env(
        bind: &str,
        state_dir: &Path,
        extra: &[(&str, &str)],
    ) -> Result<Child> {
        let gateway_bin = binary_path("gateway-node")?;

        let mut command = Command::new(gateway_bin);
        command
            .env("RFMAILNET_BIND", bind)
            .env("RFMAILNET_STATE_DIR", state_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        for (key, value) in extra {
            command.env(key, value);
        }

        let child = command.spawn().context("failed to spawn gateway-node")?;
        wait_for_health(bind, 40).await?;
        Ok(child)
    }

    async fn start_dashboard(bind: &str, hub_path: &Path, node_path: &Path) -> Result<Child> {
        let dashboard_bin = binary_path("status-dashboard")?;

        let child = Command::new(dashboard_bin)
            .env("RFMAILNET_STATUS_BIND", bind)
            .env("RFMAILNET_HUB_STATUS", hub_path)
            .env("RFMAILNET_NODE_STATUS", node_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("failed to spawn status-dashboard")?;

        wait_for_health(bind, 40).await?;
        Ok(child)
    }

    async fn run_cli(args: &[&str]) -> Result<String> {
        let cli_bin = binary_path("rfmail")?;
        let output = Command::new(cli_bin)
            .args(args)
            .output()
            .await
            .context("failed to execute rfmail")?;

        if !output.status.success() {
            bail!("rfmail failed: {}", String::from_utf8_lossy(&output.stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn wait_for_message(
        client: &GatewayClient,
        msgid: &str,
        retries: usize,
    ) -> Result<serde_json::Value> {
        for _ in 0..retries {
            if let Ok(msg) = client.read_message(msgid).await {
                return Ok(msg);
            }
            sleep(Duration::from_millis(500)).await;
        }

        bail!("message {msgid} never arrived at {}", client.base_url());
    }

    async fn wait_for_file(path: &Path, retries: usize) -> Result<()> {
        for _ in 0..retries {
            if path.exists() {
                return Ok(());
            }
            sleep(Duration::from_millis(500)).await;
        }

        bail!("file never appeared: {}", path.display());
    }

    async fn wait_for_health(bind: &str, retries: usize) -> Result<()> {
        let health_url = format!("http://{bind}/health");
        wait_for_url_status(&health_url, StatusCode::OK, retries).await
    }

    async fn wait_for_url_status(url: &str, expected: StatusCode, retries: usize) -> Result<()> {
        let http = reqwest::Client::new();

        for _ in 0..retries {
            if let Ok(resp) = http.get(url).send().await
                && resp.status() == expected
            {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }

        bail!("service did not return {expected} at {url}");
    }

    async fn stop_node(child: &mut Child) {
        let _ = child.kill().await;
        let _ = child.wait().await;
    }

    fn binary_path(name: &str) -> Result<PathBuf> {
        let workspace_root = workspace_root()?;
        ensure_binaries_built(&workspace_root)?;
        let mut path = workspace_root.join("target").join("debug").join(name);

        if let Some(suffix) = std::env::consts::EXE_SUFFIX.strip_prefix('.') {
            let mut filename = OsString::from(name);
            filename.push(".");
            filename.push(suffix);
            path = workspace_root.join("target").join("debug").join(filename);
        }

        if !path.exists() {
            bail!("expected binary does not exist: {}", path.display());
        }

        Ok(path)
    }

    fn workspace_root() -> Result<PathBuf> {
        let crate_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        crate_dir
            .parent()
            .and_then(|p| p.parent())
            .map(PathBuf::from)
            .context("failed to resolve workspace root")
    }

    fn build_required_binaries(workspace_root: &PathBuf) -> Result<()> {
        let status = std::process::Command::new("cargo")
            .arg("build")
            .arg("-p")
            .arg("gateway-node")
            .arg("-p")
            .arg("status-dashboard")
            .arg("-p")
            .arg("cli-client")
            .current_dir(workspace_root)
            .status()
            .context("failed to run cargo build for system test binaries")?;

        if !status.success() {
            bail!("cargo build for system test binaries failed");
        }

        Ok(())
    }

    fn ensure_binaries_built(workspace_root: &PathBuf) -> Result<()> {
        static BUILD_RESULT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

        let result = BUILD_RESULT.get_or_init(|| {
            build_required_binaries(workspace_root).map_err(|err| err.to_string())
        });

        if let Err(message) = result {
            bail!("failed to build required binaries: {message}");
        }

        Ok(())
    }

    fn fresh_data_dir(name: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let path = std::env::temp_dir().join(format!("rfmailnet-{name}-{unique}"));
        let _ = fs::remove_dir_all(&path);
        let _ = fs::create_dir_all(&path);
        path
    }
}
