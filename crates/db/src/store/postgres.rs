//! PostgreSQL-backed document store.
//!
//! Documents live in the `documents` table as JSONB. Every write commits
//! together with a `pg_notify` on [`CHANGE_CHANNEL`], and a background
//! listener task fans those notifications out to [`DocumentStore::changes`]
//! subscribers, so every process sharing the database sees every write.

use std::time::Duration;

use async_trait::async_trait;
use avatarflow_core::types::{DocId, Timestamp};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::{
    format_created_at, ChangeKind, Document, DocumentStore, Fields, Order, Query, StoreChange,
    StoreError, CHANGE_CHANNEL_CAPACITY, CREATED_AT_FIELD,
};

/// Postgres NOTIFY channel carrying JSON-encoded [`StoreChange`]s.
pub const CHANGE_CHANNEL: &str = "document_changes";

/// Pause before re-subscribing after the listener connection fails.
const LISTENER_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Document store persisted in PostgreSQL.
pub struct PgDocumentStore {
    pool: PgPool,
    change_tx: broadcast::Sender<StoreChange>,
    cancel: CancellationToken,
}

impl PgDocumentStore {
    /// Build the store and start the change listener task.
    pub async fn connect(pool: PgPool) -> Result<Self, StoreError> {
        let (change_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;

        let tx = change_tx.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            run_listener(listener, tx, token).await;
        });

        Ok(Self {
            pool,
            change_tx,
            cancel,
        })
    }

    /// Stop the change listener. Reads and writes keep working.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn notify(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        change: &StoreChange,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(change)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(CHANGE_CHANNEL)
            .bind(payload)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

impl Drop for PgDocumentStore {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Forward NOTIFY payloads into the broadcast channel until cancelled.
///
/// `PgListener` reconnects by itself on the next `recv` after a
/// connection loss; notifications sent in between are lost, so a
/// [`ChangeKind::Resync`] is emitted to make subscribers re-read.
async fn run_listener(
    mut listener: PgListener,
    tx: broadcast::Sender<StoreChange>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Document change listener stopped");
                return;
            }
            received = listener.recv() => match received {
                Ok(notification) => {
                    match serde_json::from_str::<StoreChange>(notification.payload()) {
                        Ok(change) => {
                            let _ = tx.send(change);
                        }
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                payload = notification.payload(),
                                "Ignoring malformed document change notification",
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Document change listener lost its connection");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(LISTENER_RETRY_DELAY) => {}
                    }
                    let _ = tx.send(StoreChange::new("", None, ChangeKind::Resync));
                }
            }
        }
    }
}

fn to_document((id, data, created_at): (String, serde_json::Value, Timestamp)) -> Document {
    let fields = match data {
        serde_json::Value::Object(map) => map,
        _ => Fields::new(),
    };
    Document {
        id,
        created_at,
        fields,
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn create(&self, collection: &str, mut fields: Fields) -> Result<DocId, StoreError> {
        let id = uuid::Uuid::now_v7().to_string();
        let created_at = chrono::Utc::now();
        fields.insert(
            CREATED_AT_FIELD.to_string(),
            serde_json::Value::String(format_created_at(&created_at)),
        );

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO documents (collection, id, data, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(collection)
        .bind(&id)
        .bind(serde_json::Value::Object(fields))
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
        Self::notify(&mut tx, &StoreChange::new(collection, Some(&id), ChangeKind::Created))
            .await?;
        tx.commit().await?;

        Ok(id)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query_as::<_, (String, serde_json::Value, Timestamp)>(
            "SELECT id, data, created_at FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(to_document))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        mut fields: Fields,
    ) -> Result<(), StoreError> {
        fields.remove(CREATED_AT_FIELD);

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE documents SET data = data || $3 WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .bind(serde_json::Value::Object(fields))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }

        Self::notify(&mut tx, &StoreChange::new(collection, Some(id), ChangeKind::Updated))
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError> {
        let order = match query.order {
            Order::NewestFirst => "created_at DESC, seq DESC",
            Order::OldestFirst => "created_at ASC, seq ASC",
        };
        let sql = format!(
            "SELECT id, data, created_at FROM documents \
             WHERE collection = $1 AND data @> $2 \
             ORDER BY {order} \
             LIMIT $3"
        );
        let limit = query.limit.map_or(i64::MAX, |l| l as i64);

        let rows = sqlx::query_as::<_, (String, serde_json::Value, Timestamp)>(&sql)
            .bind(collection)
            .bind(serde_json::Value::Object(query.equals.clone()))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(to_document).collect())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let removed = result.rows_affected() > 0;
        if removed {
            Self::notify(&mut tx, &StoreChange::new(collection, Some(id), ChangeKind::Deleted))
                .await?;
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn delete_all(&self, collection: &str) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        Self::notify(&mut tx, &StoreChange::new(collection, None, ChangeKind::Cleared)).await?;
        tx.commit().await?;
        Ok(result.rows_affected() as usize)
    }

    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.change_tx.subscribe()
    }
}
