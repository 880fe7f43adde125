use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::{
    backend::{ChatDelta, DeltaStream, LanguageModel, VideoBackend},
    config::Config,
    error::{collapse_whitespace, VeoError, CREDENTIAL_MESSAGE},
    models::{ChatTurn, GenerationRequest, OperationHandle, Role},
    operation::{OperationStatus, RawOperation},
    sse::{truncate, EventStreamDecoder},
};

const SYSTEM_CONTEXT: &str = "You are an AI assistant helping users with Veo Studio, an application for generating videos using Google's Veo 3 API. You can help users with:

- Understanding video generation parameters (prompts, models, resolutions)
- Troubleshooting API issues and quota problems
- Best practices for creating effective video prompts
- Technical questions about the application
- Cost optimization and model selection

Be helpful, concise, and focused on video generation topics. If users ask about unrelated topics, gently redirect them back to video-related questions.";

// Shorten inline base64 payloads so request bodies stay readable in logs
fn truncate_base64_in_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "bytesBase64Encoded" || key == "imageBytes" {
                    if let serde_json::Value::String(s) = val {
                        if s.len() > 100 && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=')) {
                            *val = serde_json::Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

pub struct GeminiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    vendor: Option<Url>,
    chat_model: String,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.api_base.trim_end_matches('/').to_string(),
            vendor: Url::parse(&config.api_base).ok(),
            chat_model: config.chat_model.clone(),
        }
    }

    fn key(&self) -> Result<&str, VeoError> {
        self.api_key.as_deref().ok_or_else(|| VeoError::Credential(CREDENTIAL_MESSAGE.into()))
    }

    fn masked(&self, url: &str) -> String {
        match &self.api_key {
            Some(key) => url.replace(key.as_str(), "***"),
            None => url.to_string(),
        }
    }

    /// Whether `uri` has exactly the scheme, host and port of the API base.
    fn is_vendor_origin(&self, uri: &str) -> bool {
        let (Some(vendor), Ok(target)) = (&self.vendor, Url::parse(uri)) else { return false };
        target.scheme() == vendor.scheme()
            && target.host_str().is_some()
            && target.host_str() == vendor.host_str()
            && target.port_or_known_default() == vendor.port_or_known_default()
    }

    async fn remote_error(response: reqwest::Response) -> VeoError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!("❌ API Error response: status={} body={}", status, body);
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.error)
            .map(|e| match e.status {
                Some(s) => format!("{} ({})", e.message, s),
                None => e.message,
            })
            .unwrap_or(body);
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return VeoError::Credential(CREDENTIAL_MESSAGE.into());
        }
        match VeoError::from_remote(&format!("{} {}", status, message)) {
            VeoError::Remote(_) => VeoError::Remote(collapse_whitespace(&message)),
            classified => classified,
        }
    }

    fn contents(history: &[ChatTurn], message: &str) -> serde_json::Value {
        let mut contents = vec![json!({"role": "user", "parts": [{"text": SYSTEM_CONTEXT}]})];
        for turn in history {
            let role = match turn.role {
                Role::Assistant => "model",
                Role::User => "user",
            };
            contents.push(json!({"role": role, "parts": [{"text": turn.content}]}));
        }
        contents.push(json!({"role": "user", "parts": [{"text": message}]}));
        serde_json::Value::Array(contents)
    }
}

#[async_trait]
impl VideoBackend for GeminiClient {
    async fn start_generation(&self, request: &GenerationRequest) -> Result<OperationHandle, VeoError> {
        let key = self.key()?;
        let url = format!("{}/models/{}:predictLongRunning?key={}", self.base_url, request.model.as_str(), key);
        info!("🔗 Making request to: {}", self.masked(&url));

        let mut instance = json!({"prompt": request.prompt});
        if let Some(image) = &request.image {
            instance["image"] = json!({"bytesBase64Encoded": image.image_bytes, "mimeType": image.mime_type});
        }
        let mut parameters = json!({
            "aspectRatio": request.aspect_ratio.as_str(),
            "resolution": request.resolution.as_str(),
        });
        if let Some(negative) = request.negative_prompt.as_deref().filter(|n| !n.is_empty()) {
            parameters["negativePrompt"] = json!(negative);
        }
        let body = json!({"instances": [instance], "parameters": parameters});

        let mut logged = body.clone();
        truncate_base64_in_json(&mut logged);
        logged["instances"][0]["prompt"] = json!(truncate(&request.prompt, 100));
        info!("📤 Starting video generation: {}", logged);

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(Self::remote_error(response).await);
        }
        let started: StartedOperation = response
            .json()
            .await
            .map_err(|e| VeoError::MalformedResponse(format!("Unreadable generation response: {}", e)))?;
        match started.name {
            Some(name) if !name.is_empty() => {
                info!("✅ Video generation operation started: {}", name);
                Ok(OperationHandle(name))
            }
            _ => Err(VeoError::MalformedResponse("Video generation started but no operation name was returned".into())),
        }
    }

    async fn get_operation(&self, handle: &OperationHandle) -> Result<OperationStatus, VeoError> {
        let key = self.key()?;
        let url = format!("{}/{}?key={}", self.base_url, handle.as_str().trim_start_matches('/'), key);
        debug!("🔗 Polling operation: {}", self.masked(&url));

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Self::remote_error(response).await);
        }
        let raw: RawOperation = response
            .json()
            .await
            .map_err(|e| VeoError::MalformedResponse(format!("Unreadable operation status: {}", e)))?;
        info!(
            name = %raw.name,
            done = raw.done,
            has_response = raw.response.is_some(),
            has_error = raw.error.is_some(),
            "📥 Operation status"
        );
        Ok(raw.into())
    }

    async fn download(&self, uri: &str) -> Result<Bytes, VeoError> {
        let mut request = self.client.get(uri);
        if self.is_vendor_origin(uri) {
            request = request.query(&[("key", self.key()?)]);
        }
        info!("⬇️ Downloading video: {}", uri);
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(match Self::remote_error(response).await {
                VeoError::NotFound(_) => VeoError::NotFound("Video file not found or expired".into()),
                other => other,
            });
        }
        let bytes = response.bytes().await?;
        info!("✅ Downloaded {} bytes", bytes.len());
        Ok(bytes)
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn stream_reply(&self, history: &[ChatTurn], message: &str) -> Result<DeltaStream, VeoError> {
        let key = self.key()?;
        let url = format!("{}/models/{}:streamGenerateContent?alt=sse&key={}", self.base_url, self.chat_model, key);
        info!("🔗 Streaming chat reply from: {} ({} prior turns)", self.masked(&url), history.len());

        let response = self
            .client
            .post(&url)
            .json(&json!({"contents": Self::contents(history, message)}))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::remote_error(response).await);
        }

        let (tx, rx) = mpsc::channel::<Result<ChatDelta, VeoError>>(32);
        let mut bytes = response.bytes_stream();
        tokio::spawn(async move {
            let mut decoder = EventStreamDecoder::new();
            let mut pending = Vec::new();
            loop {
                match bytes.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
                    Some(Err(e)) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                    None => {
                        pending.extend(decoder.finish());
                        if !forward_chunks(&tx, pending.drain(..)).await {
                            return;
                        }
                        break;
                    }
                }
                if !forward_chunks(&tx, pending.drain(..)).await {
                    return;
                }
            }
            debug!("Chat upstream stream finished");
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn probe(&self) -> Result<usize, VeoError> {
        let key = self.key()?;
        let url = format!("{}/models?key={}", self.base_url, key);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Self::remote_error(response).await);
        }
        let listed: ModelList = response
            .json()
            .await
            .map_err(|e| VeoError::MalformedResponse(format!("Unreadable model list: {}", e)))?;
        Ok(listed.models.len())
    }
}

/// Forward the deltas of each vendor payload. Returns false once the stream should stop.
async fn forward_chunks(
    tx: &mpsc::Sender<Result<ChatDelta, VeoError>>,
    payloads: impl Iterator<Item = String>,
) -> bool {
    for payload in payloads {
        if payload.is_empty() {
            continue;
        }
        let chunk: StreamChunk = match serde_json::from_str(&payload) {
            Ok(c) => c,
            Err(e) => {
                warn!("⚠️ Skipping unreadable upstream chunk ({}): {}", e, truncate(&payload, 100));
                continue;
            }
        };
        if let Some(err) = chunk.error {
            let _ = tx.send(Err(VeoError::from_remote(&err.message))).await;
            return false;
        }
        for candidate in chunk.candidates {
            for part in candidate.content.parts {
                let Some(text) = part.text.filter(|t| !t.trim().is_empty()) else { continue };
                let delta = if part.thought { ChatDelta::Thinking(text) } else { ChatDelta::Content(text) };
                if tx.send(Ok(delta)).await.is_err() {
                    return false;
                }
            }
        }
    }
    true
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct StartedOperation {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct Candidate { #[serde(default)] content: Content }

#[derive(Debug, Deserialize, Default)]
struct Content { #[serde(default)] parts: Vec<Part> }

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn client(key: Option<&str>) -> GeminiClient {
        let mut config = Config::default();
        config.api_key = key.map(str::to_string);
        config.api_base = "https://generativelanguage.googleapis.com/v1beta/".into();
        GeminiClient::new(&config)
    }

    #[test]
    fn key_is_only_sent_to_the_api_host() {
        let c = client(None);
        assert!(c.is_vendor_origin("https://generativelanguage.googleapis.com/v1beta/files/abc:download?alt=media"));
        assert!(c.is_vendor_origin("https://generativelanguage.googleapis.com:443/files/abc"));
        assert!(!c.is_vendor_origin("https://generativelanguage.googleapis.com.attacker.example/steal"));
        assert!(!c.is_vendor_origin("https://generativelanguage.googleapis.com:8443/files/abc"));
        assert!(!c.is_vendor_origin("http://generativelanguage.googleapis.com/files/abc"));
        assert!(!c.is_vendor_origin("https://user@evil.example/generativelanguage.googleapis.com"));
        assert!(!c.is_vendor_origin("not a url"));
    }

    #[test]
    fn masks_key_in_urls() {
        let c = client(Some("secret-key-123"));
        assert_eq!(c.masked("https://x/models?key=secret-key-123"), "https://x/models?key=***");
    }

    #[tokio::test]
    async fn missing_key_is_a_credential_error() {
        let c = client(None);
        let err = c.start_generation(&GenerationRequest::new("a")).await.unwrap_err();
        assert_eq!(err, VeoError::Credential(CREDENTIAL_MESSAGE.into()));
        assert!(matches!(c.probe().await, Err(VeoError::Credential(_))));
    }

    #[test]
    fn history_roles_map_to_vendor_roles() {
        let history = vec![
            ChatTurn { role: Role::User, content: "hi".into() },
            ChatTurn { role: Role::Assistant, content: "hello".into() },
        ];
        let contents = GeminiClient::contents(&history, "next");
        let roles: Vec<_> = contents.as_array().unwrap().iter().map(|c| c["role"].as_str().unwrap().to_string()).collect();
        assert_eq!(roles, vec!["user", "user", "model", "user"]);
        assert_eq!(contents[3]["parts"][0]["text"], "next");
    }

    #[test]
    fn base64_is_truncated_for_logs() {
        let mut body = json!({"instances": [{"image": {"bytesBase64Encoded": "A".repeat(200)}}]});
        truncate_base64_in_json(&mut body);
        let logged = body["instances"][0]["image"]["bytesBase64Encoded"].as_str().unwrap();
        assert!(logged.ends_with("[truncated 150 chars]"));
    }

    #[test]
    fn non_base64_values_are_logged_untouched() {
        let raw = format!("{}é{}", "A".repeat(49), "B".repeat(100));
        let mut body = json!({"image": {"imageBytes": raw.clone()}});
        truncate_base64_in_json(&mut body);
        assert_eq!(body["image"]["imageBytes"], raw);
    }

    #[tokio::test]
    async fn vendor_chunks_become_deltas() {
        let (tx, rx) = mpsc::channel(8);
        let payloads = vec![
            r#"{"candidates":[{"content":{"parts":[{"text":"plan","thought":true},{"text":"Hi"}]}}]}"#.to_string(),
            r#"{"candidates":[{"content":{"parts":[{"text":"  "}]}}]}"#.to_string(),
            "garbage".to_string(),
            r#"{"error":{"message":"Resource has been exhausted (e.g. check quota)."}}"#.to_string(),
        ];
        assert!(!forward_chunks(&tx, payloads.into_iter()).await);
        drop(tx);
        let got: Vec<_> = ReceiverStream::new(rx).collect().await;
        assert_eq!(
            got,
            vec![
                Ok(ChatDelta::Thinking("plan".into())),
                Ok(ChatDelta::Content("Hi".into())),
                Err(VeoError::QuotaExceeded(crate::error::QUOTA_MESSAGE.into())),
            ]
        );
    }
}
