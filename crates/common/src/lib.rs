use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MailMessage {
    #[serde(default)]
    pub msgid: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub dest: String,
    #[serde(default)]
    pub ttl: u32,
    #[serde(default)]
    pub body: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MailMessage {
    pub fn new(msgid: impl Into<String>, dest: impl Into<String>, ttl: u32) -> Self {
        Self {
            msgid: msgid.into(),
            origin: String::new(),
            dest: dest.into(),
            ttl,
            body: String::new(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloAnnounce {
    pub node: String,
    pub version: String,
    pub advertise_url: String,
    pub sent_at_unix: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayHealth {
    pub status: String,
    pub node: String,
    pub version: String,
    pub inbox_path: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    New,
    Sent,
    Retry,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub status: String,
    #[serde(default)]
    pub msgid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryReceipt {
    pub fn ok(status: impl Into<String>, msgid: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            msgid: msgid.into(),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            msgid: String::new(),
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboxSummary {
    pub msgid: String,
    pub origin: String,
    pub dest: String,
    pub ttl: u32,
    pub size_bytes: u64,
}
