use std::collections::BTreeMap;

use common::HelloAnnounce;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteRecord {
    pub node: String,
    pub url: String,
    pub via: String,
    pub status: RouteStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub updated_at_unix: u64,
}

pub struct RouteTable {
    local_node: String,
    expiry_secs: u64,
    routes: BTreeMap<String, RouteRecord>,
}

impl RouteTable {
    pub fn new(local_node: impl Into<String>, expiry_secs: u64) -> Self {
        Self {
            local_node: local_node.into(),
            expiry_secs,
            routes: BTreeMap::new(),
        }
    }

    pub fn from_records(
        local_node: impl Into<String>,
        expiry_secs: u64,
        records: Vec<RouteRecord>,
    ) -> Self {
        let mut table = Self::new(local_node, expiry_secs);
        for record in records {
            table.routes.insert(record.node.clone(), record);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn records(&self) -> Vec<RouteRecord> {
        self.routes.values().cloned().collect()
    }

    pub fn note_self(&mut self, url: &str, version: &str, now: u64) {
        self.routes.insert(
            self.local_node.clone(),
            RouteRecord {
                node: self.local_node.clone(),
                url: url.to_string(),
                via: "local".to_string(),
                status: RouteStatus::Online,
                version: Some(version.to_string()),
                updated_at_unix: now,
            },
        );
    }

    pub fn note_peer(
        &mut self,
        node: &str,
        url: &str,
        online: bool,
        version: Option<&str>,
        now: u64,
    ) {
        let status = if online {
            RouteStatus::Online
        } else {
            RouteStatus::Offline
        };

        let record = self
            .routes
            .entry(node.to_string())
            .or_insert_with(|| RouteRecord {
                node: node.to_string(),
                url: url.to_string(),
                via: host_of(url),
                status: status.clone(),
                version: None,
                updated_at_unix: now,
            });

        record.url = url.to_string();
        record.via = host_of(url);
        record.status = status;
        record.updated_at_unix = now;
        if let Some(version) = version {
            record.version = Some(version.to_string());
        }
    }

    pub fn observe_hello(&mut self, hello: &HelloAnnounce, now: u64) {
        self.routes.insert(
            hello.node.clone(),
            RouteRecord {
                node: hello.node.clone(),
                url: hello.advertise_url.clone(),
                via: host_of(&hello.advertise_url),
                status: RouteStatus::Online,
                version: Some(hello.version.clone()),
                updated_at_unix: now,
            },
        );
    }

    pub fn route_for(&self, dest: &str) -> Option<&str> {
        if dest.is_empty() {
            return None;
        }
        self.routes.get(dest).map(|record| record.url.as_str())
    }

    pub fn status_of(&self, node: &str) -> Option<RouteStatus> {
        self.routes.get(node).map(|record| record.status.clone())
    }

    pub fn expire_stale(&mut self, now: u64) -> usize {
        let before = self.routes.len();
        let local_node = self.local_node.clone();
        let expiry_secs = self.expiry_secs;

        self.routes.retain(|node, record| {
            *node == local_node || now.saturating_sub(record.updated_at_unix) <= expiry_secs
        });

        before - self.routes.len()
    }
}

fn host_of(url: &str) -> String {
    let rest = url.split_once("//").map_or(url, |(_, rest)| rest);
    let host_port = rest.split('/').next().unwrap_or(rest);
    host_port.split(':').next().unwrap_or(host_port).to_string()
}
