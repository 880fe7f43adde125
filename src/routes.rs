use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, StatusCode},
    response::{sse::{Event, Sse}, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{convert::Infallible, sync::Arc};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::{
    backend::{ChatDelta, LanguageModel, VideoBackend},
    config::Config,
    error::VeoError,
    gemini::GeminiClient,
    models::{
        ApiEnvelope, ChatRequest, ChatTurn, DownloadRequest, GenerationRequest, OperationHandle, PollData,
        PollRequest, PollStatus, StartData, VideoRef,
    },
    sse::{truncate, StreamEvent},
};

pub const DEFAULT_VIDEO_FILENAME: &str = "generated-video.mp4";

#[derive(Clone)]
pub struct AppState {
    pub video: Arc<dyn VideoBackend>,
    pub model: Arc<dyn LanguageModel>,
    pub has_api_key: bool,
    pub environment: String,
}

impl AppState {
    pub fn from_config(config: &Config) -> Self {
        let gemini = Arc::new(GeminiClient::new(config));
        Self {
            video: gemini.clone(),
            model: gemini,
            has_api_key: config.has_api_key(),
            environment: config.environment.clone(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/veo/generate", post(start_generation))
        .route("/api/veo/operation", post(poll_operation).get(poll_operation_query))
        .route("/api/veo/download", post(describe_download).get(download_video))
        .route("/api/veo/quota", get(check_quota))
        .route("/api/chat", post(chat).get(chat_query))
        .route("/api/health", get(health))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

fn rejected(rejection: JsonRejection) -> VeoError {
    VeoError::Validation(vec![rejection.body_text()])
}

pub async fn start_generation(
    State(state): State<AppState>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<ApiEnvelope<StartData>>, VeoError> {
    let Json(body) = body.map_err(rejected)?;
    let request = GenerationRequest::parse(body)?;

    info!(
        model = request.model.as_str(),
        aspect_ratio = request.aspect_ratio.as_str(),
        resolution = request.resolution.as_str(),
        has_image = request.image.is_some(),
        "🚀 Starting video generation: {}",
        truncate(&request.prompt, 100)
    );

    let operation_handle = state.video.start_generation(&request).await?;
    Ok(Json(ApiEnvelope::ok(StartData {
        operation_handle,
        status: "started".into(),
        message: "Video generation started successfully".into(),
    })))
}

#[axum::debug_handler]
pub async fn poll_operation(
    State(state): State<AppState>,
    body: Result<Json<PollRequest>, JsonRejection>,
) -> Result<Json<ApiEnvelope<PollData>>, VeoError> {
    let Json(body) = body.map_err(rejected)?;
    poll(&state, body.validate()?).await
}

#[derive(Debug, Deserialize)]
pub struct OperationQuery {
    operation: Option<String>,
}

pub async fn poll_operation_query(
    State(state): State<AppState>,
    Query(query): Query<OperationQuery>,
) -> Result<Json<ApiEnvelope<PollData>>, VeoError> {
    let handle = PollRequest { operation_handle: query.operation.unwrap_or_default() }.validate()?;
    poll(&state, handle).await
}

async fn poll(state: &AppState, handle: OperationHandle) -> Result<Json<ApiEnvelope<PollData>>, VeoError> {
    info!("🔄 Polling operation status: {}", handle);
    let status = state.video.get_operation(&handle).await?;
    let data = match status.resolve()? {
        Some(uri) => {
            info!("✅ Video generation completed successfully");
            PollData {
                operation_handle: handle,
                status: PollStatus::Completed,
                video: Some(VideoRef { uri }),
                message: "Video generation completed successfully".into(),
            }
        }
        None => PollData {
            operation_handle: handle,
            status: PollStatus::InProgress,
            video: None,
            message: "Video generation is still in progress".into(),
        },
    };
    Ok(Json(ApiEnvelope::ok(data)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadInfo {
    video_uri: String,
    filename: String,
    message: String,
}

pub async fn describe_download(
    body: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Json<ApiEnvelope<DownloadInfo>>, VeoError> {
    let Json(body) = body.map_err(rejected)?;
    let video_uri = required_uri(body.video_uri)?;
    info!("Preparing video download for: {}", video_uri);
    Ok(Json(ApiEnvelope::ok(DownloadInfo {
        video_uri,
        filename: body.filename.unwrap_or_else(|| DEFAULT_VIDEO_FILENAME.into()),
        message: "Video URI ready for download".into(),
    })))
}

pub async fn download_video(
    State(state): State<AppState>,
    Query(query): Query<DownloadRequest>,
) -> Result<Response, VeoError> {
    let video_uri = required_uri(query.video_uri)?;
    let filename = safe_filename(query.filename.as_deref().unwrap_or(DEFAULT_VIDEO_FILENAME));
    let bytes = state.video.download(&video_uri).await?;
    let headers = [
        (header::CONTENT_TYPE, "video/mp4".to_string()),
        (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", filename)),
    ];
    Ok((StatusCode::OK, headers, bytes).into_response())
}

fn required_uri(uri: Option<String>) -> Result<String, VeoError> {
    uri.filter(|u| !u.trim().is_empty())
        .ok_or_else(|| VeoError::Validation(vec!["Video URI is required".into()]))
}

fn safe_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    if cleaned.is_empty() { DEFAULT_VIDEO_FILENAME.to_string() } else { cleaned }
}

#[derive(Debug, Serialize)]
pub struct QuotaStatus {
    status: &'static str,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub async fn check_quota(State(state): State<AppState>) -> Response {
    let (code, data) = match state.model.probe().await {
        Ok(models) => {
            info!("Quota check passed ({} models visible)", models);
            (StatusCode::OK, QuotaStatus { status: "available", message: "API quota appears to be available", error: None })
        }
        Err(e @ VeoError::QuotaExceeded(_)) => {
            error!("Quota check error: {}", e);
            (StatusCode::TOO_MANY_REQUESTS, QuotaStatus { status: "exceeded", message: "API quota exceeded", error: Some(e.to_string()) })
        }
        Err(e) => {
            error!("Quota check error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, QuotaStatus { status: "error", message: "Unable to check quota status", error: Some(e.to_string()) })
        }
    };
    let mut envelope = ApiEnvelope::ok(data);
    envelope.success = code.is_success();
    (code, Json(envelope)).into_response()
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "configuration": {
            "hasApiKey": state.has_api_key,
            "environment": state.environment,
        }
    }))
}

pub async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, VeoError> {
    let Json(body) = body.map_err(rejected)?;
    stream_chat(state.model, body.message, body.messages)
}

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    message: Option<String>,
}

pub async fn chat_query(State(state): State<AppState>, Query(query): Query<ChatQuery>) -> Result<Response, VeoError> {
    stream_chat(state.model, query.message.unwrap_or_default(), Vec::new())
}

fn stream_chat(model: Arc<dyn LanguageModel>, message: String, history: Vec<ChatTurn>) -> Result<Response, VeoError> {
    if message.trim().is_empty() {
        return Err(VeoError::Validation(vec!["Message is required".into()]));
    }
    info!("💬 Chat message ({} prior turns): {}", history.len(), truncate(&message, 100));

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(32);
    tokio::spawn(async move {
        let send = |event: StreamEvent| {
            let tx = tx.clone();
            async move { tx.send(Ok(Event::default().data(event.payload()))).await.is_ok() }
        };
        match model.stream_reply(&history, &message).await {
            Ok(mut deltas) => {
                while let Some(delta) = deltas.next().await {
                    let event = match delta {
                        Ok(ChatDelta::Content(text)) => StreamEvent::Content { text },
                        Ok(ChatDelta::Thinking(text)) => StreamEvent::Thinking { text },
                        Err(e) => {
                            error!("Chat streaming error: {}", e);
                            send(StreamEvent::Error { message: e.chat_message() }).await;
                            break;
                        }
                    };
                    if !send(event).await {
                        return;
                    }
                }
            }
            Err(e) => {
                error!("Chat streaming error: {}", e);
                send(StreamEvent::Error { message: e.chat_message() }).await;
            }
        }
        send(StreamEvent::Done).await;
    });

    Ok((
        [(header::CONNECTION, "keep-alive")],
        Sse::new(ReceiverStream::new(rx)),
    )
        .into_response())
}
