use anyhow::{Context, Result};
use common::{HelloAnnounce, MailMessage};

pub(crate) fn build_messages_url(base_url: &str) -> String {
    format!("{}/messages", base_url.trim_end_matches('/'))
}

pub(crate) fn build_hello_url(base_url: &str) -> String {
    format!("{}/hello", base_url.trim_end_matches('/'))
}

pub(crate) async fn post_message_to(
    http: &reqwest::Client,
    base_url: &str,
    msg: &MailMessage,
) -> Result<()> {
    http.post(build_messages_url(base_url))
        .json(msg)
        .send()
        .await
        .with_context(|| format!("failed to reach peer {base_url}"))?
        .error_for_status()
        .with_context(|| format!("peer {base_url} rejected message msgid={}", msg.msgid))?;

    Ok(())
}

pub(crate) async fn send_hello_to(
    http: &reqwest::Client,
    base_url: &str,
    hello: &HelloAnnounce,
) -> Result<()> {
    http.post(build_hello_url(base_url))
        .json(hello)
        .send()
        .await
        .with_context(|| format!("failed to reach peer {base_url}"))?
        .error_for_status()
        .with_context(|| format!("peer {base_url} rejected hello from {}", hello.node))?;

    Ok(())
}
