use anyhow::{Context, Result};
use common::{DeliveryReceipt, GatewayHealth, HelloAnnounce, InboxSummary, MailMessage};
use reqwest::Client;
use uuid::Uuid;

#[derive(Clone)]
pub struct GatewayClient {
    http: Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<GatewayHealth> {
        let url = format!("{}/health", self.base_url);

        let health = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to reach gateway at {}", self.base_url))?
            .error_for_status()
            .context("gateway health probe failed")?
            .json::<GatewayHealth>()
            .await
            .context("failed to decode health payload")?;

        Ok(health)
    }

    pub async fn post_message(&self, msg: &MailMessage) -> Result<DeliveryReceipt> {
        let url = format!("{}/messages", self.base_url);

        let receipt = self
            .http
            .post(url)
            .json(msg)
            .send()
            .await
            .with_context(|| format!("failed to POST message msgid={}", msg.msgid))?
            .error_for_status()
            .with_context(|| format!("gateway rejected message msgid={}", msg.msgid))?
            .json::<DeliveryReceipt>()
            .await
            .context("failed to decode delivery receipt")?;

        Ok(receipt)
    }

    pub async fn stage_message(&self, msg: &MailMessage) -> Result<DeliveryReceipt> {
        let url = format!("{}/outbox", self.base_url);

        let receipt = self
            .http
            .post(url)
            .json(msg)
            .send()
            .await
            .with_context(|| format!("failed to stage message msgid={}", msg.msgid))?
            .error_for_status()
            .with_context(|| format!("gateway rejected staged message msgid={}", msg.msgid))?
            .json::<DeliveryReceipt>()
            .await
            .context("failed to decode staging receipt")?;

        Ok(receipt)
    }

    pub async fn send_hello(&self, hello: &HelloAnnounce) -> Result<serde_json::Value> {
        let url = format!("{}/hello", self.base_url);

        let reply = self
            .http
            .post(url)
            .json(hello)
            .send()
            .await
            .with_context(|| format!("failed to announce node={}", hello.node))?
            .error_for_status()
            .context("gateway rejected hello announcement")?
            .json::<serde_json::Value>()
            .await
            .context("failed to decode hello reply")?;

        Ok(reply)
    }

    pub async fn inbox(&self) -> Result<Vec<InboxSummary>> {
        let url = format!("{}/messages", self.base_url);

        let entries = self
            .http
            .get(url)
            .send()
            .await
            .context("failed to list inbox")?
            .error_for_status()
            .context("inbox listing failed")?
            .json::<Vec<InboxSummary>>()
            .await
            .context("failed to decode inbox listing")?;

        Ok(entries)
    }

    pub async fn read_message(&self, msgid: impl AsRef<str>) -> Result<serde_json::Value> {
        let msgid = msgid.as_ref();
        let url = format!("{}/messages/{}", self.base_url, msgid);

        let msg = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to fetch message msgid={msgid}"))?
            .error_for_status()
            .with_context(|| format!("message not found or unreadable msgid={msgid}"))?
            .json::<serde_json::Value>()
            .await
            .with_context(|| format!("failed to decode message msgid={msgid}"))?;

        Ok(msg)
    }

    pub async fn routes(&self) -> Result<serde_json::Value> {
        let url = format!("{}/routes", self.base_url);

        let routes = self
            .http
            .get(url)
            .send()
            .await
            .context("failed to list routes")?
            .error_for_status()
            .context("route listing failed")?
            .json::<serde_json::Value>()
            .await
            .context("failed to decode route listing")?;

        Ok(routes)
    }

    pub async fn outbox(&self) -> Result<serde_json::Value> {
        let url = format!("{}/outbox", self.base_url);

        let pending = self
            .http
            .get(url)
            .send()
            .await
            .context("failed to list outbox")?
            .error_for_status()
            .context("outbox listing failed")?
            .json::<serde_json::Value>()
            .await
            .context("failed to decode outbox listing")?;

        Ok(pending)
    }
}

pub fn generate_msgid() -> String {
    format!("msg-{}", Uuid::new_v4())
}
