//! Document store access for the avatar generation pipeline.
//!
//! - [`store`] -- the [`DocumentStore`](store::DocumentStore) seam with an
//!   in-memory and a PostgreSQL implementation.
//! - [`models`] -- the job record and its partial-update patch.
//! - [`repositories`] -- [`JobRepo`](repositories::JobRepo), the only
//!   writer of job records.

use sqlx::postgres::PgPoolOptions;

pub mod models;
pub mod repositories;
pub mod store;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify the pool is usable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
