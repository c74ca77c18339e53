use std::time::Duration;

use avatarflow_core::error::CoreError;
use avatarflow_core::generation::{
    SubmissionStrategy, DEFAULT_MODEL_VERSION, DEFAULT_OWNER_ID, DEFAULT_PROMPT,
    DEFAULT_STORAGE_NAMESPACE, DEFAULT_SUBMIT_TIMEOUT, DEFAULT_UPLOAD_TIMEOUT,
    MAX_INLINE_PAYLOAD_BYTES,
};

use crate::poll::PollPolicy;

pub const DEFAULT_PREDICTION_API_URL: &str = "https://api.replicate.com/v1";

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Pipeline configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub prediction_api_url: String,
    /// Bearer token for the prediction service. Required by `from_env`.
    pub prediction_api_token: String,
    pub model_version: String,
    /// Prompt used when a job does not carry its own.
    pub prompt: String,
    pub submission_strategy: SubmissionStrategy,
    /// Ceiling on the encoded length of an inline payload.
    pub max_inline_payload_bytes: usize,
    pub poll: PollPolicy,
    pub upload_timeout: Duration,
    pub submit_timeout: Duration,
    /// First path segment of every uploaded object.
    pub storage_namespace: String,
    /// Owner recorded on jobs whose request names none.
    pub default_owner_id: String,
    /// How long `shutdown` waits for each in-flight job task.
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prediction_api_url: DEFAULT_PREDICTION_API_URL.into(),
            prediction_api_token: String::new(),
            model_version: DEFAULT_MODEL_VERSION.into(),
            prompt: DEFAULT_PROMPT.into(),
            submission_strategy: SubmissionStrategy::default(),
            max_inline_payload_bytes: MAX_INLINE_PAYLOAD_BYTES,
            poll: PollPolicy::default(),
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
            storage_namespace: DEFAULT_STORAGE_NAMESPACE.into(),
            default_owner_id: DEFAULT_OWNER_ID.into(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                          |
    /// |-----------------------------|----------------------------------|
    /// | `PREDICTION_API_URL`        | `https://api.replicate.com/v1`   |
    /// | `PREDICTION_API_TOKEN`      | (required)                       |
    /// | `PREDICTION_MODEL_VERSION`  | anime avatar model version       |
    /// | `PREDICTION_PROMPT`         | anime avatar portrait prompt     |
    /// | `SUBMISSION_STRATEGY`       | `inline`                         |
    /// | `MAX_INLINE_PAYLOAD_BYTES`  | `10000000`                       |
    /// | `POLL_INTERVAL_MS`          | `2000`                           |
    /// | `POLL_MAX_ATTEMPTS`         | `300`                            |
    /// | `POLL_MAX_TRANSIENT_ERRORS` | `3`                              |
    /// | `UPLOAD_TIMEOUT_SECS`       | `60`                             |
    /// | `SUBMIT_TIMEOUT_SECS`       | `30`                             |
    /// | `STORAGE_NAMESPACE`         | `uploads`                        |
    /// | `DEFAULT_OWNER_ID`          | `public-user`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`     | `5`                              |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let prediction_api_token = var("PREDICTION_API_TOKEN")
            .ok_or_else(|| CoreError::Validation("PREDICTION_API_TOKEN must be set".into()))?;

        let submission_strategy = match var("SUBMISSION_STRATEGY") {
            Some(raw) => raw.parse()?,
            None => defaults.submission_strategy,
        };

        let poll = PollPolicy {
            interval: Duration::from_millis(parse_or(
                &var,
                "POLL_INTERVAL_MS",
                defaults.poll.interval.as_millis() as u64,
            )?),
            max_attempts: parse_or(&var, "POLL_MAX_ATTEMPTS", defaults.poll.max_attempts)?,
            max_transient_errors: parse_or(
                &var,
                "POLL_MAX_TRANSIENT_ERRORS",
                defaults.poll.max_transient_errors,
            )?,
        };
        if poll.max_attempts == 0 {
            return Err(CoreError::Validation(
                "POLL_MAX_ATTEMPTS must be at least 1".into(),
            ));
        }

        Ok(Self {
            prediction_api_url: var("PREDICTION_API_URL").unwrap_or(defaults.prediction_api_url),
            prediction_api_token,
            model_version: var("PREDICTION_MODEL_VERSION").unwrap_or(defaults.model_version),
            prompt: var("PREDICTION_PROMPT").unwrap_or(defaults.prompt),
            submission_strategy,
            max_inline_payload_bytes: parse_or(
                &var,
                "MAX_INLINE_PAYLOAD_BYTES",
                defaults.max_inline_payload_bytes,
            )?,
            poll,
            upload_timeout: Duration::from_secs(parse_or(
                &var,
                "UPLOAD_TIMEOUT_SECS",
                defaults.upload_timeout.as_secs(),
            )?),
            submit_timeout: Duration::from_secs(parse_or(
                &var,
                "SUBMIT_TIMEOUT_SECS",
                defaults.submit_timeout.as_secs(),
            )?),
            storage_namespace: var("STORAGE_NAMESPACE").unwrap_or(defaults.storage_namespace),
            default_owner_id: var("DEFAULT_OWNER_ID").unwrap_or(defaults.default_owner_id),
            shutdown_timeout: Duration::from_secs(parse_or(
                &var,
                "SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout.as_secs(),
            )?),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, CoreError> {
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("{key} has an invalid value '{raw}'"))),
        None => Ok(default),
    }
}
