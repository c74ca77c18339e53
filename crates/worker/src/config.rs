/// Infrastructure settings for the worker process.
///
/// Pipeline behaviour is configured separately through
/// [`PipelineConfig`](avatarflow_pipeline::PipelineConfig).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Bucket receiving source images and diagnostics checks.
    pub blob_bucket: String,
    /// Public URL prefix for stored objects; `s3://` locators when unset.
    pub blob_public_base_url: Option<String>,
}

impl WorkerConfig {
    /// | Env Var                | Default      |
    /// |------------------------|--------------|
    /// | `DATABASE_URL`         | (required)   |
    /// | `BLOB_BUCKET`          | (required)   |
    /// | `BLOB_PUBLIC_BASE_URL` | unset        |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| var(key).ok_or_else(|| anyhow::anyhow!("{key} must be set"));

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            blob_bucket: required("BLOB_BUCKET")?,
            blob_public_base_url: var("BLOB_PUBLIC_BASE_URL"),
        })
    }
}
