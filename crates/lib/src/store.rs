//! Inbound message records and the in-memory store that owns them.
//!
//! Records are immutable once persisted and shared as `Arc`s; the broadcast layer only
//! borrows them while publishing. The store keeps at most `max_records`, evicting the oldest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One message received from an external provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessageRecord {
    pub id: String,
    /// Provider the message came from (e.g. "telegram").
    pub provider: String,
    /// Raw provider payload as received.
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    by_id: HashMap<String, Arc<InboundMessageRecord>>,
    /// Oldest first.
    order: VecDeque<String>,
}

/// In-memory message store (persist, get, recent).
pub struct MessageStore {
    inner: Arc<RwLock<Inner>>,
    max_records: usize,
}

impl MessageStore {
    /// Store holding at most `max_records` records (minimum 1).
    pub fn new(max_records: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            max_records: max_records.max(1),
        }
    }

    /// Persist a new record with a generated id and the current time.
    pub async fn persist(
        &self,
        provider: impl Into<String>,
        payload: serde_json::Value,
    ) -> Arc<InboundMessageRecord> {
        let record = Arc::new(InboundMessageRecord {
            id: format!("msg-{}", uuid::Uuid::new_v4()),
            provider: provider.into(),
            payload,
            received_at: Utc::now(),
        });
        let mut g = self.inner.write().await;
        g.order.push_back(record.id.clone());
        g.by_id.insert(record.id.clone(), record.clone());
        while g.order.len() > self.max_records {
            if let Some(old) = g.order.pop_front() {
                g.by_id.remove(&old);
            }
        }
        record
    }

    pub async fn get(&self, id: &str) -> Option<Arc<InboundMessageRecord>> {
        self.inner.read().await.by_id.get(id).cloned()
    }

    /// Up to `limit` records, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<Arc<InboundMessageRecord>> {
        let g = self.inner.read().await;
        g.order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| g.by_id.get(id).cloned())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
