//! HTTP adapter to the server's own `/api` routes.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::{
    backend::{ByteStream, ChatTransport, VideoBackend},
    error::VeoError,
    models::{ApiEnvelope, ChatRequest, ChatTurn, GenerationRequest, OperationHandle, PollData, PollStatus, StartData},
    operation::{GeneratedVideo, OperationStatus},
};

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Self {
        Self { client: Client::new(), base_url: base_url.trim_end_matches('/').to_string() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn envelope_error(response: Response) -> VeoError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&text) {
            Ok(envelope) => VeoError::from_envelope(status, &envelope),
            Err(_) => VeoError::Remote(format!("Request failed with status {}", status)),
        }
    }

    async fn data<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, VeoError> {
        if !response.status().is_success() {
            return Err(Self::envelope_error(response).await);
        }
        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| VeoError::MalformedResponse(format!("Invalid response from server: {}", e)))?;
        match envelope {
            ApiEnvelope { success: true, data: Some(data), .. } => Ok(data),
            other => Err(VeoError::MalformedResponse(
                other.error.unwrap_or_else(|| format!("Invalid response from server ({})", what)),
            )),
        }
    }
}

#[async_trait]
impl VideoBackend for HttpBackend {
    async fn start_generation(&self, request: &GenerationRequest) -> Result<OperationHandle, VeoError> {
        let response = self.client.post(self.url("/api/veo/generate")).json(request).send().await?;
        let started: StartData = Self::data(response, "start").await?;
        info!("Video generation started, operation: {}", started.operation_handle);
        Ok(started.operation_handle)
    }

    async fn get_operation(&self, handle: &OperationHandle) -> Result<OperationStatus, VeoError> {
        let response = self
            .client
            .post(self.url("/api/veo/operation"))
            .json(&serde_json::json!({"operationHandle": handle}))
            .send()
            .await?;
        let polled: PollData = Self::data(response, "poll").await?;
        debug!(status = ?polled.status, "Polled {}", handle);
        Ok(match polled.status {
            PollStatus::InProgress => OperationStatus::Pending,
            PollStatus::Completed => OperationStatus::Succeeded {
                videos: polled.video.into_iter().map(|v| GeneratedVideo { uri: Some(v.uri) }).collect(),
                filtered_reasons: Vec::new(),
            },
        })
    }

    async fn download(&self, uri: &str) -> Result<Bytes, VeoError> {
        let response = self
            .client
            .get(self.url("/api/veo/download"))
            .query(&[("uri", uri)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::envelope_error(response).await);
        }
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl ChatTransport for HttpBackend {
    async fn open_stream(&self, message: &str, history: &[ChatTurn]) -> Result<ByteStream, VeoError> {
        let body = ChatRequest { message: message.to_string(), messages: history.to_vec() };
        let response = self.client.post(self.url("/api/chat")).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(Self::envelope_error(response).await);
        }
        Ok(Box::pin(response.bytes_stream().map(|chunk| chunk.map_err(VeoError::from))))
    }
}
