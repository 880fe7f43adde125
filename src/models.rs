use base64::Engine;
use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{ErrorKind, VeoError};

pub const PROMPT_MAX_CHARS: usize = 1000;
pub const NEGATIVE_PROMPT_MAX_CHARS: usize = 500;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    #[default]
    #[serde(rename = "720p")]
    Hd,
    #[serde(rename = "1080p")]
    FullHd,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Hd => "720p",
            Resolution::FullHd => "1080p",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum VeoModel {
    #[default]
    #[serde(rename = "veo-3.0-generate-001")]
    Veo3,
    #[serde(rename = "veo-3.0-fast-generate-001")]
    Veo3Fast,
}

impl VeoModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VeoModel::Veo3 => "veo-3.0-generate-001",
            VeoModel::Veo3Fast => "veo-3.0-fast-generate-001",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageInput {
    /// Base64 encoded image bytes.
    pub image_bytes: String,
    pub mime_type: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub model: VeoModel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageInput>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            aspect_ratio: AspectRatio::default(),
            resolution: Resolution::default(),
            model: VeoModel::default(),
            image: None,
        }
    }

    /// Decode an untyped JSON body and validate it.
    pub fn parse(value: serde_json::Value) -> Result<Self, VeoError> {
        let request: Self = serde_json::from_value(value).map_err(|e| VeoError::Validation(vec![e.to_string()]))?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), VeoError> {
        let mut issues = Vec::new();
        let prompt_len = self.prompt.chars().count();
        if prompt_len == 0 {
            issues.push("prompt: Prompt is required".to_string());
        } else if prompt_len > PROMPT_MAX_CHARS {
            issues.push("prompt: Prompt must be less than 1000 characters".to_string());
        }
        if let Some(negative) = &self.negative_prompt {
            if negative.chars().count() > NEGATIVE_PROMPT_MAX_CHARS {
                issues.push("negativePrompt: Negative prompt must be less than 500 characters".to_string());
            }
        }
        if let Some(image) = &self.image {
            if base64::engine::general_purpose::STANDARD.decode(&image.image_bytes).is_err() {
                issues.push("image.imageBytes: Image must be base64 encoded".to_string());
            }
        }
        if issues.is_empty() { Ok(()) } else { Err(VeoError::Validation(issues)) }
    }
}

/// Opaque identifier of one remote generation job.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct OperationHandle(pub String);

impl OperationHandle {
    pub fn as_str(&self) -> &str { &self.0 }
}

impl std::fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct PollRequest {
    #[serde(default, alias = "operationName")]
    pub operation_handle: String,
}

impl PollRequest {
    pub fn validate(self) -> Result<OperationHandle, VeoError> {
        if self.operation_handle.trim().is_empty() {
            return Err(VeoError::Validation(vec!["operationHandle: Operation name is required".into()]));
        }
        Ok(OperationHandle(self.operation_handle))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "model")]
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub messages: Vec<ChatTurn>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), role, content: content.into(), timestamp: Utc::now(), thinking: None }
    }

    pub fn turn(&self) -> ChatTurn {
        ChatTurn { role: self.role, content: self.content.clone() }
    }
}

/// Uniform `{success, data|error, details?}` response body.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_items: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_url: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None, kind: None, details: None, user_message: None, action_items: None, help_url: None }
    }

    pub fn failure(kind: ErrorKind, error: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(error.into()), kind: Some(kind), details: None, user_message: None, action_items: None, help_url: None }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StartData {
    pub operation_handle: OperationHandle,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct VideoRef {
    pub uri: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PollData {
    pub operation_handle: OperationHandle,
    pub status: PollStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoRef>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    #[serde(default, alias = "uri")]
    pub video_uri: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}
