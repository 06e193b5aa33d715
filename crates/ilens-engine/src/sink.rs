//! Session delivery.
//!
//! When a scanning run finishes, the engine hands the frozen session and
//! the canonical items to a [`SessionSink`]. The JSON sink appends to a
//! flat inventory file; callers embedding the engine implement their own.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ilens_models::{Detection, DetectionId, ScanSession, SessionId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EngineError, EngineResult};

/// Receives finished sessions.
#[async_trait]
pub trait SessionSink: Send + Sync {
    /// Deliver a finished session together with its canonical items.
    ///
    /// `items` is the canonical list at finish time; ids recorded in the
    /// session but since evicted have no item record.
    async fn deliver(&self, session: &ScanSession, items: &[Detection]) -> EngineResult<()>;
}

/// Discards sessions. Used when the caller only consumes live events.
pub struct NullSink;

#[async_trait]
impl SessionSink for NullSink {
    async fn deliver(&self, _session: &ScanSession, _items: &[Detection]) -> EngineResult<()> {
        Ok(())
    }
}

/// Appends finished sessions to a JSON inventory file.
pub struct JsonInventorySink {
    path: PathBuf,
}

impl JsonInventorySink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct InventoryDoc {
    #[serde(default)]
    sessions: Vec<SessionRecord>,
    #[serde(default)]
    items: Vec<ItemRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    session_id: SessionId,
    started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ended_at: Option<DateTime<Utc>>,
    item_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct ItemRecord {
    id: DetectionId,
    session_id: SessionId,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    created_at: DateTime<Utc>,
}

#[async_trait]
impl SessionSink for JsonInventorySink {
    async fn deliver(&self, session: &ScanSession, items: &[Detection]) -> EngineResult<()> {
        let mut doc: InventoryDoc = match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => InventoryDoc::default(),
            Err(e) => return Err(EngineError::Io(e)),
        };

        doc.sessions.push(SessionRecord {
            session_id: session.id.clone(),
            started_at: session.started_at,
            ended_at: session.ended_at,
            item_count: session.item_count(),
        });
        for item in items {
            doc.items.push(ItemRecord {
                id: item.id.clone(),
                session_id: session.id.clone(),
                name: item.name.clone(),
                brand: item.metadata.brand.clone(),
                color: item.metadata.color.clone(),
                size: item.metadata.size.clone(),
                category: item.metadata.category.clone(),
                created_at: item.created_at,
            });
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, serde_json::to_vec_pretty(&doc)?).await?;

        info!(
            path = %self.path.display(),
            session_id = %session.id,
            items = items.len(),
            "session delivered to inventory file"
        );
        Ok(())
    }
}
