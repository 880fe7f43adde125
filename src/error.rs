use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ApiEnvelope;

pub const CREDENTIAL_MESSAGE: &str = "Invalid API key or API key not configured";
pub const QUOTA_MESSAGE: &str = "API quota exceeded or rate limit reached";
pub const QUOTA_USER_MESSAGE: &str = "You have exceeded your Google Gemini API quota. Please check your billing plan or wait for the quota to reset.";
pub const QUOTA_HELP_URL: &str = "https://ai.google.dev/gemini-api/docs/rate-limits";
pub const TIMEOUT_MESSAGE: &str = "Video generation timed out. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VeoError {
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("{0}")]
    Credential(String),
    #[error("{0}")]
    QuotaExceeded(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{}", TIMEOUT_MESSAGE)]
    Timeout,
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    MalformedResponse(String),
    #[error("Video generation failed: {0}")]
    OperationFailed(String),
    #[error("{0}")]
    Remote(String),
    #[error("Request cancelled")]
    Cancelled,
}

/// Machine-readable tag carried in error envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Credential,
    QuotaExceeded,
    NotFound,
    Timeout,
    Transport,
    MalformedResponse,
    OperationFailed,
    Remote,
    Cancelled,
}

/// Coarse class of a free-text vendor error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteClass {
    Quota,
    Credential,
    NotFound,
    Timeout,
    Other,
}

/// The vendor exposes no structured error codes, so failures are sorted by
/// substring. Matching is case-insensitive. Keep every such check here.
pub fn classify(message: &str) -> RemoteClass {
    let m = message.to_lowercase();
    if m.contains("quota") || m.contains("429") || m.contains("resource_exhausted") || m.contains("rate limit") {
        RemoteClass::Quota
    } else if m.contains("api key") || m.contains("api_key") || m.contains("authentication") {
        RemoteClass::Credential
    } else if m.contains("not found") || m.contains("invalid operation") {
        RemoteClass::NotFound
    } else if m.contains("timeout") || m.contains("timed out") {
        RemoteClass::Timeout
    } else {
        RemoteClass::Other
    }
}

impl VeoError {
    /// Normalize a raw vendor message into a user-facing error.
    pub fn from_remote(message: &str) -> Self {
        match classify(message) {
            RemoteClass::Quota => VeoError::QuotaExceeded(QUOTA_MESSAGE.into()),
            RemoteClass::Credential => VeoError::Credential(CREDENTIAL_MESSAGE.into()),
            RemoteClass::NotFound => VeoError::NotFound("Operation not found".into()),
            RemoteClass::Timeout => VeoError::Transport("Request timeout. Please try again.".into()),
            RemoteClass::Other => VeoError::Remote(collapse_whitespace(message)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            VeoError::Validation(_) => ErrorKind::Validation,
            VeoError::Credential(_) => ErrorKind::Credential,
            VeoError::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            VeoError::NotFound(_) => ErrorKind::NotFound,
            VeoError::Timeout => ErrorKind::Timeout,
            VeoError::Transport(_) => ErrorKind::Transport,
            VeoError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            VeoError::OperationFailed(_) => ErrorKind::OperationFailed,
            VeoError::Remote(_) => ErrorKind::Remote,
            VeoError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            VeoError::Validation(_) | VeoError::OperationFailed(_) => StatusCode::BAD_REQUEST,
            VeoError::Credential(_) => StatusCode::UNAUTHORIZED,
            VeoError::NotFound(_) => StatusCode::NOT_FOUND,
            VeoError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown in chat `error` events.
    pub fn chat_message(&self) -> String {
        match self {
            VeoError::QuotaExceeded(_) => "API quota exceeded. Please check your billing plan or try again later.".into(),
            VeoError::Credential(_) => "Invalid API key. Please check your configuration.".into(),
            other => other.to_string(),
        }
    }

    /// Rebuild an error from an envelope returned by the server.
    pub fn from_envelope(status: StatusCode, envelope: &ApiEnvelope<serde_json::Value>) -> Self {
        let message = envelope.error.clone().unwrap_or_else(|| format!("Request failed with status {}", status));
        let details = envelope.details.as_ref().map(details_text);
        let kind = envelope.kind.unwrap_or(match status {
            StatusCode::BAD_REQUEST => ErrorKind::Validation,
            StatusCode::UNAUTHORIZED => ErrorKind::Credential,
            StatusCode::NOT_FOUND => ErrorKind::NotFound,
            StatusCode::TOO_MANY_REQUESTS => ErrorKind::QuotaExceeded,
            _ => ErrorKind::Remote,
        });
        match kind {
            ErrorKind::Validation => VeoError::Validation(match envelope.details.as_ref() {
                Some(serde_json::Value::Array(items)) => items.iter().map(details_text).collect(),
                _ => vec![details.unwrap_or(message)],
            }),
            ErrorKind::Credential => VeoError::Credential(message),
            ErrorKind::QuotaExceeded => VeoError::QuotaExceeded(envelope.user_message.clone().unwrap_or(message)),
            ErrorKind::NotFound => VeoError::NotFound(message),
            ErrorKind::Timeout => VeoError::Timeout,
            ErrorKind::Transport => VeoError::Transport(message),
            ErrorKind::MalformedResponse => VeoError::MalformedResponse(message),
            ErrorKind::OperationFailed => VeoError::OperationFailed(details.unwrap_or(message)),
            ErrorKind::Remote => VeoError::Remote(match details {
                Some(d) => format!("{}: {}", message, d),
                None => message,
            }),
            ErrorKind::Cancelled => VeoError::Cancelled,
        }
    }

    fn envelope(&self) -> ApiEnvelope<serde_json::Value> {
        let mut envelope = ApiEnvelope::failure(self.kind(), self.to_string());
        match self {
            VeoError::Validation(issues) => {
                envelope.error = Some("Validation failed".into());
                envelope.details = Some(serde_json::json!(issues));
            }
            VeoError::OperationFailed(remote) => {
                envelope.error = Some("Video generation failed".into());
                envelope.details = Some(serde_json::Value::String(remote.clone()));
            }
            VeoError::QuotaExceeded(_) => {
                envelope.user_message = Some(QUOTA_USER_MESSAGE.into());
                envelope.action_items = Some(vec![
                    "Check your Google Cloud billing account".into(),
                    "Upgrade to a paid plan if using free tier".into(),
                    "Wait for quota reset (typically 24 hours)".into(),
                    "Consider using Veo 3 Fast model for lower costs".into(),
                ]);
                envelope.help_url = Some(QUOTA_HELP_URL.into());
            }
            _ => {}
        }
        envelope
    }
}

impl From<reqwest::Error> for VeoError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            VeoError::Transport("Request timeout. Please try again.".into())
        } else {
            VeoError::Transport(format!("Network error: {}", e))
        }
    }
}

impl IntoResponse for VeoError {
    fn into_response(self) -> Response {
        tracing::error!(kind = ?self.kind(), "❌ {}", self);
        (self.status(), Json(self.envelope())).into_response()
    }
}

fn details_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => map
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

pub(crate) fn collapse_whitespace(message: &str) -> String {
    message.split(['\r', '\n']).map(str::trim).filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ")
}
