//! User registry — maps chat identities to portal emails.
//!
//! Only emails are ever stored here. The JSON file backend keeps the
//! on-disk shape as a flat object keyed by chat id string.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::types::{AttendanceError, AttendanceResult, ChatId};

/// Registration lookup and persistence.
#[async_trait]
pub trait UserRegistry: Send + Sync {
    /// All registrations, keyed by chat id string.
    async fn load(&self) -> AttendanceResult<BTreeMap<String, String>>;

    /// Record (or replace) the email for a chat. Other entries are kept.
    async fn save(&self, chat_id: ChatId, email: &str) -> AttendanceResult<()>;

    /// Email registered for a chat, if any.
    async fn lookup(&self, chat_id: ChatId) -> AttendanceResult<Option<String>> {
        Ok(self.load().await?.remove(&chat_id.to_string()))
    }
}

/// Registry persisted as a pretty-printed JSON object.
pub struct JsonFileRegistry {
    path: PathBuf,
    // Serializes read-modify-write cycles within the process.
    write_lock: Mutex<()>,
}

impl JsonFileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> AttendanceResult<BTreeMap<String, String>> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&data).map_err(|e| {
            AttendanceError::Registry(format!(
                "failed to parse {}: {e}",
                self.path.display()
            ))
        })
    }

    async fn write_file(&self, users: &BTreeMap<String, String>) -> AttendanceResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let payload = serde_json::to_string_pretty(users)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl UserRegistry for JsonFileRegistry {
    async fn load(&self) -> AttendanceResult<BTreeMap<String, String>> {
        self.read_file().await
    }

    async fn save(&self, chat_id: ChatId, email: &str) -> AttendanceResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut users = self.read_file().await?;
        users.insert(chat_id.to_string(), email.to_string());
        self.write_file(&users).await?;
        tracing::info!(%chat_id, "registered email");
        Ok(())
    }
}

/// Registry held in memory only; for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryRegistry {
    users: Mutex<BTreeMap<String, String>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated registry.
    pub fn with_users<I, K, V>(users: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            users: Mutex::new(
                users
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl UserRegistry for MemoryRegistry {
    async fn load(&self) -> AttendanceResult<BTreeMap<String, String>> {
        Ok(self.users.lock().await.clone())
    }

    async fn save(&self, chat_id: ChatId, email: &str) -> AttendanceResult<()> {
        self.users
            .lock()
            .await
            .insert(chat_id.to_string(), email.to_string());
        Ok(())
    }
}
