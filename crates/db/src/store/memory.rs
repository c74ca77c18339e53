//! In-process document store.
//!
//! Backs tests and single-process deployments. All state sits behind one
//! lock, so every operation (including [`delete_all`]) is atomic with
//! respect to readers.
//!
//! [`delete_all`]: DocumentStore::delete_all

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use avatarflow_core::types::DocId;
use tokio::sync::{broadcast, RwLock};

use super::{
    format_created_at, ChangeKind, Document, DocumentStore, Fields, Order, Query, StoreChange,
    StoreError, CHANGE_CHANNEL_CAPACITY, CREATED_AT_FIELD,
};

#[derive(Debug, Clone)]
struct StoredDocument {
    seq: u64,
    document: Document,
}

#[derive(Default)]
struct Collections {
    next_seq: u64,
    by_collection: HashMap<String, HashMap<DocId, StoredDocument>>,
}

/// Document store kept entirely in memory.
pub struct MemoryDocumentStore {
    state: RwLock<Collections>,
    change_tx: broadcast::Sender<StoreChange>,
    failing_writes: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let (change_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(Collections::default()),
            change_tx,
            failing_writes: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` writes fail with [`StoreError::Backend`]
    /// without touching any document. Used to exercise failure handling.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of documents currently in `collection`.
    pub async fn len(&self, collection: &str) -> usize {
        self.state
            .read()
            .await
            .by_collection
            .get(collection)
            .map_or(0, HashMap::len)
    }

    fn check_injected_failure(&self) -> Result<(), StoreError> {
        let consumed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(StoreError::Backend("injected write failure".into())),
            Err(_) => Ok(()),
        }
    }

    fn notify(&self, collection: &str, id: Option<&str>, kind: ChangeKind) {
        // No receivers is fine.
        let _ = self.change_tx.send(StoreChange::new(collection, id, kind));
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(&self, collection: &str, mut fields: Fields) -> Result<DocId, StoreError> {
        self.check_injected_failure()?;

        let id = uuid::Uuid::now_v7().to_string();
        let created_at = chrono::Utc::now();
        fields.insert(
            CREATED_AT_FIELD.to_string(),
            serde_json::Value::String(format_created_at(&created_at)),
        );

        {
            let mut state = self.state.write().await;
            state.next_seq += 1;
            let seq = state.next_seq;
            state
                .by_collection
                .entry(collection.to_string())
                .or_default()
                .insert(
                    id.clone(),
                    StoredDocument {
                        seq,
                        document: Document {
                            id: id.clone(),
                            created_at,
                            fields,
                        },
                    },
                );
        }

        self.notify(collection, Some(&id), ChangeKind::Created);
        Ok(id)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .by_collection
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|stored| stored.document.clone()))
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        self.check_injected_failure()?;

        {
            let mut state = self.state.write().await;
            let stored = state
                .by_collection
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| StoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })?;
            for (key, value) in fields {
                // createdAt is immutable once assigned.
                if key != CREATED_AT_FIELD {
                    stored.document.fields.insert(key, value);
                }
            }
        }

        self.notify(collection, Some(id), ChangeKind::Updated);
        Ok(())
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError> {
        let state = self.state.read().await;
        let mut matched: Vec<&StoredDocument> = state
            .by_collection
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|stored| query.matches(&stored.document.fields))
                    .collect()
            })
            .unwrap_or_default();

        matched.sort_by(|a, b| {
            let key_a = (a.document.created_at, a.seq);
            let key_b = (b.document.created_at, b.seq);
            match query.order {
                Order::NewestFirst => key_b.cmp(&key_a),
                Order::OldestFirst => key_a.cmp(&key_b),
            }
        });

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matched
            .into_iter()
            .take(limit)
            .map(|stored| stored.document.clone())
            .collect())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.check_injected_failure()?;

        let removed = {
            let mut state = self.state.write().await;
            state
                .by_collection
                .get_mut(collection)
                .and_then(|docs| docs.remove(id))
                .is_some()
        };

        if removed {
            self.notify(collection, Some(id), ChangeKind::Deleted);
        }
        Ok(removed)
    }

    async fn delete_all(&self, collection: &str) -> Result<usize, StoreError> {
        self.check_injected_failure()?;

        let removed = {
            let mut state = self.state.write().await;
            state
                .by_collection
                .remove(collection)
                .map_or(0, |docs| docs.len())
        };

        self.notify(collection, None, ChangeKind::Cleared);
        Ok(removed)
    }

    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.change_tx.subscribe()
    }
}
