use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use common::{DeliveryState, InboxSummary, MailMessage};
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub msg: MailMessage,
    pub attempts: u32,
    pub next_attempt_unix: u64,
    pub last_error: String,
    pub created_at_unix: u64,
    pub updated_at_unix: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub state: DeliveryState,
    pub attempts: u32,
    pub last_error: String,
    pub updated_at_unix: u64,
}

#[derive(Debug, Clone)]
pub struct InboxEntry {
    pub msgid: String,
    pub size_bytes: u64,
    pub msg: MailMessage,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryCounts {
    pub new: usize,
    pub sent: usize,
    pub retry: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub enum InboxReadError {
    NotFound,
    Invalid(String),
    Internal(anyhow::Error),
}

impl std::fmt::Display for InboxReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "message not found"),
            Self::Invalid(msg) => write!(f, "invalid stored message: {msg}"),
            Self::Internal(err) => write!(f, "internal mailstore error: {err}"),
        }
    }
}

impl std::error::Error for InboxReadError {}

#[derive(Debug, Clone)]
pub enum ReceiveOutcome {
    Saved { msgid: String },
    Duplicate { msgid: String },
}

pub struct MailStore {
    root_dir: PathBuf,
    inbox_dir: PathBuf,
    outbox_dir: PathBuf,
    seen_path: PathBuf,
    delivery_path: PathBuf,
    seen: HashSet<String>,
    delivery: BTreeMap<String, DeliveryRecord>,
}

impl MailStore {
    pub async fn init(root_dir: impl Into<PathBuf>) -> Result<Self> {
        let root_dir = root_dir.into();
        let inbox_dir = root_dir.join("inbox");
        let outbox_dir = root_dir.join("outbox");
        let seen_path = root_dir.join("seen.json");
        let delivery_path = root_dir.join("delivery.json");

        fs::create_dir_all(&inbox_dir).await?;
        fs::create_dir_all(&outbox_dir).await?;

        let seen = if fs::try_exists(&seen_path).await? {
            let payload = fs::read(&seen_path).await?;
            serde_json::from_slice::<Vec<String>>(&payload)
                .with_context(|| format!("invalid seen index: {}", seen_path.display()))?
                .into_iter()
                .collect()
        } else {
            HashSet::new()
        };

        let delivery = if fs::try_exists(&delivery_path).await? {
            let payload = fs::read(&delivery_path).await?;
            serde_json::from_slice::<BTreeMap<String, DeliveryRecord>>(&payload)
                .with_context(|| format!("invalid delivery index: {}", delivery_path.display()))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            root_dir,
            inbox_dir,
            outbox_dir,
            seen_path,
            delivery_path,
            seen,
            delivery,
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn inbox_dir(&self) -> &Path {
        &self.inbox_dir
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    pub fn is_seen(&self, msgid: &str) -> bool {
        self.seen.contains(msgid)
    }

    pub async fn receive(&mut self, mut msg: MailMessage) -> Result<ReceiveOutcome> {
        if msg.msgid.trim().is_empty() {
            msg.msgid = fallback_msgid(&msg)?;
        }
        let msgid = msg.msgid.clone();

        if self.seen.contains(&msgid) {
            return Ok(ReceiveOutcome::Duplicate { msgid });
        }

        let path = self.inbox_path(&msgid);
        let payload = serde_json::to_vec_pretty(&msg)?;
        write_atomic(&path, &payload).await?;

        self.seen.insert(msgid.clone());
        self.persist_seen().await?;

        Ok(ReceiveOutcome::Saved { msgid })
    }

    pub async fn inbox_entries(&self) -> Result<Vec<InboxEntry>> {
        let mut entries = fs::read_dir(&self.inbox_dir).await?;
        let mut messages = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }

            let payload = fs::read(&path).await?;
            let Ok(msg) = serde_json::from_slice::<MailMessage>(&payload) else {
                continue;
            };

            messages.push(InboxEntry {
                msgid: msg.msgid.clone(),
                size_bytes: entry.metadata().await?.len(),
                msg,
            });
        }

        messages.sort_by(|a, b| a.msgid.cmp(&b.msgid));
        Ok(messages)
    }

    pub async fn list_inbox(&self) -> Result<Vec<InboxSummary>> {
        let entries = self.inbox_entries().await?;

        Ok(entries
            .into_iter()
            .map(|entry| InboxSummary {
                msgid: entry.msgid,
                origin: entry.msg.origin,
                dest: entry.msg.dest,
                ttl: entry.msg.ttl,
                size_bytes: entry.size_bytes,
            })
            .collect())
    }

    pub async fn read_inbox(
        &self,
        msgid: &str,
    ) -> std::result::Result<serde_json::Value, InboxReadError> {
        let path = self.inbox_path(msgid);

        if !fs::try_exists(&path)
            .await
            .map_err(|err| InboxReadError::Internal(err.into()))?
        {
            return Err(InboxReadError::NotFound);
        }

        let payload = fs::read(&path)
            .await
            .map_err(|err| InboxReadError::Internal(err.into()))?;

        serde_json::from_slice::<serde_json::Value>(&payload)
            .map_err(|err| InboxReadError::Invalid(format!("{}: {err}", path.display())))
    }

    pub async fn stage_outbound(&mut self, msg: MailMessage, now: u64) -> Result<PathBuf> {
        if msg.msgid.trim().is_empty() {
            bail!("staged message requires a msgid");
        }
        let msgid = msg.msgid.clone();

        let record = OutboxRecord {
            msg,
            attempts: 0,
            next_attempt_unix: 0,
            last_error: String::new(),
            created_at_unix: now,
            updated_at_unix: now,
        };

        let path = self.outbox_path(&msgid);
        let payload = serde_json::to_vec_pretty(&record)?;
        write_atomic(&path, &payload).await?;

        self.mark_delivery(&msgid, DeliveryState::New, 0, "", now)
            .await?;

        Ok(path)
    }

    pub async fn outbox_records(&self) -> Result<Vec<OutboxRecord>> {
        let mut entries = fs::read_dir(&self.outbox_dir).await?;
        let mut records = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }

            let payload = fs::read(&path).await?;
            let Ok(record) = serde_json::from_slice::<OutboxRecord>(&payload) else {
                continue;
            };

            records.push(record);
        }

        records.sort_by(|a, b| a.msg.msgid.cmp(&b.msg.msgid));
        Ok(records)
    }

    pub async fn due_outbox(&self, now: u64) -> Result<Vec<OutboxRecord>> {
        let records = self.outbox_records().await?;

        Ok(records
            .into_iter()
            .filter(|record| record.next_attempt_unix == 0 || now >= record.next_attempt_unix)
            .collect())
    }

    pub async fn save_outbox_record(&self, record: &OutboxRecord) -> Result<()> {
        let path = self.outbox_path(&record.msg.msgid);
        let payload = serde_json::to_vec_pretty(record)?;
        write_atomic(&path, &payload).await
    }

    pub async fn remove_outbox_record(&self, msgid: &str) -> Result<()> {
        let path = self.outbox_path(msgid);

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to remove outbox record {msgid}"))
            }
        }
    }

    pub async fn mark_delivery(
        &mut self,
        msgid: &str,
        state: DeliveryState,
        attempts: u32,
        last_error: &str,
        now: u64,
    ) -> Result<()> {
        self.delivery.insert(
            msgid.to_string(),
            DeliveryRecord {
                state,
                attempts,
                last_error: last_error.to_string(),
                updated_at_unix: now,
            },
        );
        self.persist_delivery().await
    }

    pub fn delivery_record(&self, msgid: &str) -> Option<&DeliveryRecord> {
        self.delivery.get(msgid)
    }

    pub fn delivery_counts(&self) -> DeliveryCounts {
        let mut counts = DeliveryCounts::default();
        for record in self.delivery.values() {
            match record.state {
                DeliveryState::New => counts.new += 1,
                DeliveryState::Sent => counts.sent += 1,
                DeliveryState::Retry => counts.retry += 1,
                DeliveryState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    fn inbox_path(&self, msgid: &str) -> PathBuf {
        self.inbox_dir.join(format!("{}.json", safe_filename(msgid)))
    }

    fn outbox_path(&self, msgid: &str) -> PathBuf {
        self.outbox_dir
            .join(format!("{}.json", safe_filename(msgid)))
    }

    async fn persist_seen(&self) -> Result<()> {
        let mut msgids: Vec<&String> = self.seen.iter().collect();
        msgids.sort();

        let payload = serde_json::to_vec_pretty(&msgids)?;
        write_atomic(&self.seen_path, &payload).await
    }

    async fn persist_delivery(&self) -> Result<()> {
        let payload = serde_json::to_vec_pretty(&self.delivery)?;
        write_atomic(&self.delivery_path, &payload).await
    }
}

fn fallback_msgid(msg: &MailMessage) -> Result<String> {
    let payload = serde_json::to_vec(msg)?;
    let hash = blake3::hash(&payload).to_hex().to_string();
    Ok(format!("msg-{}", &hash[..16]))
}

fn safe_filename(msgid: &str) -> String {
    msgid
        .chars()
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => ch,
            _ => '-',
        })
        .collect()
}

fn unix_ts_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

pub(crate) async fn write_atomic(path: &Path, payload: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent).await?;

    let tmp = path.with_extension(format!("tmp-{}-{}", std::process::id(), unix_ts_nanos()));

    fs::write(&tmp, payload).await?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed to move {} -> {}", tmp.display(), path.display()))?;

    Ok(())
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod store_tests;
