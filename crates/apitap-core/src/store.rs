//! In-memory request store
//!
//! Table of captured requests keyed by request id, preserving capture order.
//! Cloneable handle over shared state so continuation tasks can apply late
//! results without holding locks across await points. Entries are removed only
//! by explicit clears, never evicted.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::request::{CapturedRequest, TabId};

#[derive(Default)]
struct StoreInner {
    entries: HashMap<String, CapturedRequest>,
    /// Request ids in capture order
    order: Vec<String>,
}

/// Shared in-memory table of captured requests.
#[derive(Clone, Default)]
pub struct RequestStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl RequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a record wholesale. An overwritten entry keeps its
    /// original position in capture order.
    pub async fn put(&self, record: CapturedRequest) {
        let mut inner = self.inner.lock().await;
        let id = record.id.clone();
        if inner.entries.insert(id.clone(), record).is_none() {
            inner.order.push(id);
        }
    }

    /// Apply a partial update if the id exists. Returns `false` without any
    /// effect when it does not: response and body events may race ahead of a
    /// clear, and that is not an error.
    pub async fn mutate<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut CapturedRequest),
    {
        let mut inner = self.inner.lock().await;
        match inner.entries.get_mut(id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// Snapshot of one record.
    pub async fn get(&self, id: &str) -> Option<CapturedRequest> {
        self.inner.lock().await.entries.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.lock().await.entries.contains_key(id)
    }

    /// Snapshot of one tab's records in capture order.
    pub async fn query_by_tab(&self, tab_id: &TabId) -> Vec<CapturedRequest> {
        let inner = self.inner.lock().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id))
            .filter(|record| &record.tab_id == tab_id)
            .cloned()
            .collect()
    }

    /// Remove all entries for a tab. Returns how many were removed.
    pub async fn clear_by_tab(&self, tab_id: &TabId) -> usize {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let before = inner.entries.len();
        inner.entries.retain(|_, record| &record.tab_id != tab_id);
        let entries = &inner.entries;
        inner.order.retain(|id| entries.contains_key(id));
        before - inner.entries.len()
    }

    pub async fn clear_all(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.order.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
