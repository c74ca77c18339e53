//! Document store abstraction.
//!
//! A document is a JSON object addressed by `(collection, id)`. The store
//! assigns `id` and `createdAt` on create, merges top-level fields on
//! update (a JSON `null` clears a field), and broadcasts a [`StoreChange`]
//! after every committed write so readers can re-query.

use async_trait::async_trait;
use avatarflow_core::error::CoreError;
use avatarflow_core::types::{DocId, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub mod memory;
pub mod postgres;

pub use memory::MemoryDocumentStore;
pub use postgres::PgDocumentStore;

/// JSON object body of a document.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Field holding the store-assigned creation timestamp.
pub const CREATED_AT_FIELD: &str = "createdAt";

/// Broadcast channel capacity for change notifications.
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Errors from document store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The addressed document does not exist.
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: DocId },

    /// The backend failed to apply the operation. Nothing was written.
    #[error("Document store error: {0}")]
    Backend(String),

    /// A stored document could not be mapped to or from its model.
    #[error("Document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The write violated a domain rule and was not attempted.
    #[error("Write rejected: {0}")]
    Rejected(#[from] CoreError),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Documents, queries, changes
// ---------------------------------------------------------------------------

/// A stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocId,
    pub created_at: Timestamp,
    pub fields: Fields,
}

/// Sort order for query results. Ties are broken by insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Field-equality filter plus ordering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub equals: Fields,
    pub order: Order,
    pub limit: Option<usize>,
}

impl Query {
    /// Every document, newest first.
    pub fn all() -> Self {
        Self::default()
    }

    /// Keep only documents whose `field` equals `value`.
    pub fn filter_eq(
        mut self,
        field: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.equals.insert(field.into(), value.into());
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a document body satisfies every equality filter.
    pub fn matches(&self, fields: &Fields) -> bool {
        self.equals
            .iter()
            .all(|(key, expected)| fields.get(key) == Some(expected))
    }
}

/// What happened to a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    /// Every document in the collection was removed at once.
    Cleared,
    /// Notifications may have been lost; re-read everything.
    Resync,
}

/// Notification emitted after a committed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreChange {
    pub collection: String,
    pub id: Option<DocId>,
    pub kind: ChangeKind,
}

impl StoreChange {
    pub fn new(collection: &str, id: Option<&str>, kind: ChangeKind) -> Self {
        Self {
            collection: collection.to_string(),
            id: id.map(str::to_string),
            kind,
        }
    }

    /// Whether a subscriber watching `collection` should react.
    pub fn affects(&self, collection: &str) -> bool {
        self.kind == ChangeKind::Resync || self.collection == collection
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Mutable-record key-value store with change notification.
///
/// Writes are all-or-nothing per call. Concurrent writers to the same
/// document are resolved last-write-wins per field.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document, assigning its id and `createdAt`.
    async fn create(&self, collection: &str, fields: Fields) -> Result<DocId, StoreError>;

    /// Fetch one document.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Merge `fields` into an existing document. Unnamed fields keep their
    /// values; `null` clears a field.
    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError>;

    /// Documents matching `query`.
    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Remove one document. Returns `false` when it did not exist.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    /// Remove every document in `collection` as one visible step.
    async fn delete_all(&self, collection: &str) -> Result<usize, StoreError>;

    /// Receive a [`StoreChange`] after every committed write, across all
    /// collections.
    fn changes(&self) -> broadcast::Receiver<StoreChange>;
}

/// Serialized form of a creation timestamp, fixed-width so it also sorts
/// lexicographically.
pub(crate) fn format_created_at(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn query_matches_all_filters() {
        let query = Query::all()
            .filter_eq("status", "pending")
            .filter_eq("attempts", 1);
        assert!(query.matches(&fields(json!({"status": "pending", "attempts": 1, "x": 2}))));
        assert!(!query.matches(&fields(json!({"status": "pending", "attempts": 2}))));
        assert!(!query.matches(&fields(json!({"attempts": 1}))));
    }

    #[test]
    fn null_filter_matches_explicit_null_only() {
        let query = Query::all().filter_eq("generatedImageUrl", serde_json::Value::Null);
        assert!(query.matches(&fields(json!({"generatedImageUrl": null}))));
        assert!(!query.matches(&fields(json!({}))));
    }

    #[test]
    fn resync_affects_every_collection() {
        let change = StoreChange::new("other", None, ChangeKind::Resync);
        assert!(change.affects("avatarGenerations"));
        let change = StoreChange::new("other", Some("1"), ChangeKind::Created);
        assert!(!change.affects("avatarGenerations"));
    }

    #[test]
    fn created_at_format_is_fixed_width() {
        let a = chrono::DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let b = a + chrono::Duration::microseconds(1_500);
        assert_eq!(format_created_at(&a), "2025-01-01T00:00:00.000000Z");
        assert!(format_created_at(&a) < format_created_at(&b));
    }
}
