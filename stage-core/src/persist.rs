//! Performance persistence.
//!
//! The engine treats persistence as a stream of checkpoints: failures are
//! logged by the caller and never roll back in-memory state.
//! [`JsonlPersistence`] keeps scripts as JSON files and each performance as
//! a directory holding its metadata, an append-only JSON-lines event log and
//! one snapshot per actor.

use crate::script::ScriptEvent;
use crate::state::MemorySnapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current script file version.
const SAVE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceStatus {
    Created,
    Running,
    Paused,
    Completed,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Dialogue,
    Pass,
    Revoke,
    Nudge,
    GodInject,
    GodAction,
    TimeTravel,
    Fact,
    Jump,
    SceneEnd,
    Adaptation,
}

/// One logged occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub kind: EventKind,
    #[serde(default)]
    pub actor: Option<String>,
    pub content: String,
    pub event_index: usize,
}

impl EventRecord {
    pub fn new(kind: EventKind, content: impl Into<String>, event_index: usize) -> Self {
        Self {
            kind,
            actor: None,
            content: content.into(),
            event_index,
        }
    }

    pub fn by(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Store a script. Returns its id.
    async fn save_script(&self, title: &str, script: &[ScriptEvent]) -> Result<String, PersistError>;

    /// Open a performance of a saved script. Returns its id.
    async fn create_performance(&self, script_id: &str, title: &str) -> Result<String, PersistError>;

    async fn log_event(&self, performance_id: &str, record: &EventRecord) -> Result<(), PersistError>;

    async fn save_actor_state(
        &self,
        performance_id: &str,
        actor: &str,
        memory: &MemorySnapshot,
    ) -> Result<(), PersistError>;

    async fn update_performance_status(
        &self,
        performance_id: &str,
        status: PerformanceStatus,
        current_index: usize,
    ) -> Result<(), PersistError>;
}

/// Persistence that stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPersistence;

#[async_trait]
impl Persistence for NoopPersistence {
    async fn save_script(&self, _title: &str, _script: &[ScriptEvent]) -> Result<String, PersistError> {
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn create_performance(&self, _script_id: &str, _title: &str) -> Result<String, PersistError> {
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn log_event(&self, _performance_id: &str, _record: &EventRecord) -> Result<(), PersistError> {
        Ok(())
    }

    async fn save_actor_state(
        &self,
        _performance_id: &str,
        _actor: &str,
        _memory: &MemorySnapshot,
    ) -> Result<(), PersistError> {
        Ok(())
    }

    async fn update_performance_status(
        &self,
        _performance_id: &str,
        _status: PerformanceStatus,
        _current_index: usize,
    ) -> Result<(), PersistError> {
        Ok(())
    }
}

/// A script as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedScript {
    pub version: u32,
    pub id: String,
    pub title: String,
    pub saved_at: DateTime<Utc>,
    pub events: Vec<ScriptEvent>,
}

/// Performance metadata as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceMeta {
    pub id: String,
    pub script_id: String,
    pub title: String,
    pub status: PerformanceStatus,
    pub current_index: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A line of the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub record: EventRecord,
}

/// File-backed persistence rooted at a directory.
#[derive(Debug, Clone)]
pub struct JsonlPersistence {
    root: PathBuf,
}

impl JsonlPersistence {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn script_path(&self, id: &str) -> PathBuf {
        self.root.join("scripts").join(format!("{id}.json"))
    }

    fn performance_dir(&self, id: &str) -> PathBuf {
        self.root.join("performances").join(id)
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.performance_dir(id).join("meta.json")
    }

    fn events_path(&self, id: &str) -> PathBuf {
        self.performance_dir(id).join("events.jsonl")
    }

    fn actor_path(&self, id: &str, actor: &str) -> PathBuf {
        let file: String = actor
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        self.performance_dir(id)
            .join("actors")
            .join(format!("{file}.json"))
    }

    pub async fn load_script(&self, id: &str) -> Result<SavedScript, PersistError> {
        let json = fs::read_to_string(self.script_path(id)).await?;
        let saved: SavedScript = serde_json::from_str(&json)?;
        if saved.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: saved.version,
            });
        }
        Ok(saved)
    }

    pub async fn load_meta(&self, performance_id: &str) -> Result<PerformanceMeta, PersistError> {
        let json = fs::read_to_string(self.meta_path(performance_id)).await?;
        Ok(serde_json::from_str(&json)?)
    }

    pub async fn read_events(&self, performance_id: &str) -> Result<Vec<LoggedEvent>, PersistError> {
        let text = match fs::read_to_string(self.events_path(performance_id)).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(PersistError::from))
            .collect()
    }

    pub async fn load_actor_state(
        &self,
        performance_id: &str,
        actor: &str,
    ) -> Result<MemorySnapshot, PersistError> {
        let json = fs::read_to_string(self.actor_path(performance_id, actor)).await?;
        Ok(serde_json::from_str(&json)?)
    }

    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(value)?;
        fs::write(path, json).await?;
        Ok(())
    }
}

#[async_trait]
impl Persistence for JsonlPersistence {
    async fn save_script(&self, title: &str, script: &[ScriptEvent]) -> Result<String, PersistError> {
        let id = uuid::Uuid::new_v4().to_string();
        let saved = SavedScript {
            version: SAVE_VERSION,
            id: id.clone(),
            title: title.to_string(),
            saved_at: Utc::now(),
            events: script.to_vec(),
        };
        Self::write_json(&self.script_path(&id), &saved).await?;
        Ok(id)
    }

    async fn create_performance(&self, script_id: &str, title: &str) -> Result<String, PersistError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let meta = PerformanceMeta {
            id: id.clone(),
            script_id: script_id.to_string(),
            title: title.to_string(),
            status: PerformanceStatus::Created,
            current_index: 0,
            created_at: now,
            updated_at: now,
        };
        Self::write_json(&self.meta_path(&id), &meta).await?;
        Ok(id)
    }

    async fn log_event(&self, performance_id: &str, record: &EventRecord) -> Result<(), PersistError> {
        let path = self.events_path(performance_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(&LoggedEvent {
            at: Utc::now(),
            record: record.clone(),
        })?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn save_actor_state(
        &self,
        performance_id: &str,
        actor: &str,
        memory: &MemorySnapshot,
    ) -> Result<(), PersistError> {
        Self::write_json(&self.actor_path(performance_id, actor), memory).await
    }

    async fn update_performance_status(
        &self,
        performance_id: &str,
        status: PerformanceStatus,
        current_index: usize,
    ) -> Result<(), PersistError> {
        let mut meta = self.load_meta(performance_id).await?;
        meta.status = status;
        meta.current_index = current_index;
        meta.updated_at = Utc::now();
        Self::write_json(&self.meta_path(performance_id), &meta).await
    }
}
