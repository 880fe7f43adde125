//! Remote long-running operation, as reported by one status query.

use serde::Deserialize;

use crate::error::VeoError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedVideo {
    pub uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFailure {
    pub code: Option<i64>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Succeeded {
        videos: Vec<GeneratedVideo>,
        filtered_reasons: Vec<String>,
    },
    Failed(RemoteFailure),
}

impl OperationStatus {
    /// `Ok(None)` while pending, `Ok(Some(uri))` once a playable video exists.
    pub fn resolve(&self) -> Result<Option<String>, VeoError> {
        match self {
            OperationStatus::Pending => Ok(None),
            OperationStatus::Failed(failure) => Err(VeoError::OperationFailed(failure.message.clone())),
            OperationStatus::Succeeded { videos, filtered_reasons } => match videos.first() {
                None => {
                    let mut message = "Video generation completed but no video was generated".to_string();
                    if !filtered_reasons.is_empty() {
                        message.push_str(&format!(": {}", filtered_reasons.join("; ")));
                    }
                    Err(VeoError::MalformedResponse(message))
                }
                Some(GeneratedVideo { uri: Some(uri) }) if !uri.is_empty() => Ok(Some(uri.clone())),
                Some(_) => Err(VeoError::MalformedResponse(
                    "Video generation completed but video URI is missing".into(),
                )),
            },
        }
    }
}

// --- Vendor wire shape ---

#[derive(Debug, Deserialize)]
pub(crate) struct RawOperation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub response: Option<RawResponse>,
    #[serde(default)]
    pub error: Option<RawError>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct RawResponse {
    #[serde(rename = "generateVideoResponse", default)]
    generate_video_response: Option<RawVideoResponse>,
    #[serde(rename = "generatedVideos", default)]
    generated_videos: Option<Vec<RawSample>>,
}

#[derive(Debug, Deserialize, Default)]
struct RawVideoResponse {
    #[serde(rename = "generatedSamples", alias = "generatedVideos", default)]
    generated_samples: Vec<RawSample>,
    #[serde(rename = "raiMediaFilteredReasons", default)]
    rai_media_filtered_reasons: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawSample {
    #[serde(default)]
    video: Option<RawVideo>,
}

#[derive(Debug, Deserialize)]
struct RawVideo {
    #[serde(default)]
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

impl From<RawOperation> for OperationStatus {
    fn from(raw: RawOperation) -> Self {
        if !raw.done {
            return OperationStatus::Pending;
        }
        if let Some(error) = raw.error {
            return OperationStatus::Failed(RemoteFailure { code: error.code, message: error.message });
        }
        let response = raw.response.unwrap_or_default();
        let (samples, filtered_reasons) = match (response.generate_video_response, response.generated_videos) {
            (Some(inner), _) => (inner.generated_samples, inner.rai_media_filtered_reasons),
            (None, Some(videos)) => (videos, Vec::new()),
            (None, None) => (Vec::new(), Vec::new()),
        };
        let videos = samples
            .into_iter()
            .map(|s| GeneratedVideo { uri: s.video.and_then(|v| v.uri) })
            .collect();
        OperationStatus::Succeeded { videos, filtered_reasons }
    }
}
