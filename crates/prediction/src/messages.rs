//! Wire types for the prediction HTTP API.
//!
//! Request: `{"version": "...", "input": {"image": "...", "prompt": "..."}}`.
//! Response: `{"id": "...", "status": "...", "output": ..., "error": ...}`
//! where `output` is either a URL string or an array of URL strings.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::service::PredictionStatus;

pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";

/// Body of `POST /predictions`.
#[derive(Debug, Clone, Serialize)]
pub struct CreatePrediction<'a> {
    pub version: &'a str,
    pub input: PredictionInputBody<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionInputBody<'a> {
    pub image: &'a str,
    pub prompt: &'a str,
}

/// Response of both `POST /predictions` and `GET /predictions/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictionResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl PredictionResponse {
    /// First generated image URL.
    pub fn first_output(&self) -> Option<String> {
        match self.output.as_ref()? {
            Value::String(url) => Some(url.clone()),
            Value::Array(items) => items.iter().find_map(|item| item.as_str().map(str::to_string)),
            _ => None,
        }
    }

    fn error_message(&self) -> String {
        match &self.error {
            Some(Value::String(message)) => message.clone(),
            Some(Value::Null) | None => "Prediction failed".to_string(),
            Some(other) => other.to_string(),
        }
    }

    /// Map the upstream status onto [`PredictionStatus`]. Anything other
    /// than `succeeded` or `failed` counts as still running.
    pub fn into_status(self) -> PredictionStatus {
        match self.status.as_deref() {
            Some(STATUS_SUCCEEDED) => PredictionStatus::Succeeded {
                output: self.first_output(),
            },
            Some(STATUS_FAILED) => PredictionStatus::Failed {
                error: self.error_message(),
            },
            other => PredictionStatus::Running {
                status: other.unwrap_or("unknown").to_string(),
            },
        }
    }
}

/// Error body shape used by the service for rejected requests.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// Human-readable message from a non-2xx body: the `detail` field when
/// present, otherwise the raw text.
pub fn rejection_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|parsed| parsed.detail)
        .unwrap_or_else(|_| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn response(value: Value) -> PredictionResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn array_output_yields_first_url() {
        let status = response(json!({
            "id": "H1",
            "status": "succeeded",
            "output": ["https://x/avatar.png", "https://x/other.png"]
        }))
        .into_status();
        assert_eq!(
            status,
            PredictionStatus::Succeeded {
                output: Some("https://x/avatar.png".into())
            }
        );
    }

    #[test]
    fn string_output_is_accepted() {
        let status = response(json!({"status": "succeeded", "output": "https://x/a.png"}))
            .into_status();
        assert_eq!(
            status,
            PredictionStatus::Succeeded {
                output: Some("https://x/a.png".into())
            }
        );
    }

    #[test]
    fn succeeded_without_output_has_none() {
        let status = response(json!({"status": "succeeded", "output": null})).into_status();
        assert_eq!(status, PredictionStatus::Succeeded { output: None });
    }

    #[test]
    fn unknown_statuses_count_as_running() {
        for raw in ["starting", "processing", "queued"] {
            assert!(!response(json!({"status": raw})).into_status().is_terminal());
        }
    }

    #[test]
    fn failed_carries_upstream_error() {
        let status = response(json!({"status": "failed", "error": "NSFW content"})).into_status();
        assert_eq!(
            status,
            PredictionStatus::Failed {
                error: "NSFW content".into()
            }
        );
    }

    #[test]
    fn rejection_message_prefers_detail() {
        assert_eq!(rejection_message(r#"{"detail":"Invalid version"}"#), "Invalid version");
        assert_eq!(rejection_message("Bad Gateway\n"), "Bad Gateway");
    }
}
