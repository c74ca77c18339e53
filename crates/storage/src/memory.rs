//! In-process blob store for tests and local runs.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::blob::{BlobError, BlobStore, TransferReceipt, TransferState};

const LOCATOR_SCHEME: &str = "memory://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, StoredObject>>,
    /// States to report for the next writes, in order. A non-success state
    /// stores nothing.
    scripted_states: RwLock<VecDeque<TransferState>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `state` for the next write instead of storing the object.
    pub async fn script_next_state(&self, state: TransferState) {
        self.scripted_states.write().await.push_back(state);
    }

    pub async fn get(&self, path: &str) -> Option<StoredObject> {
        self.objects.read().await.get(path).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<TransferReceipt, BlobError> {
        let state = self
            .scripted_states
            .write()
            .await
            .pop_front()
            .unwrap_or(TransferState::Success);
        if state != TransferState::Success {
            return Ok(TransferReceipt {
                state,
                bytes_transferred: 0,
            });
        }

        let len = bytes.len();
        self.objects.write().await.insert(
            path.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(TransferReceipt::success(len))
    }

    fn locator(&self, path: &str) -> String {
        format!("{LOCATOR_SCHEME}{path}")
    }
}
