#![allow(dead_code)]

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use parking_lot::Mutex;

use veo_studio::{
    backend::{ChatDelta, DeltaStream, LanguageModel, VideoBackend},
    models::{ChatTurn, GenerationRequest, OperationHandle},
    operation::{GeneratedVideo, OperationStatus},
    routes::AppState,
    VeoError,
};

#[derive(Default)]
pub struct FakeVeo {
    pub start: Mutex<VecDeque<Result<OperationHandle, VeoError>>>,
    pub reports: Mutex<VecDeque<Result<OperationStatus, VeoError>>>,
    pub started: Mutex<Vec<GenerationRequest>>,
    pub polled: Mutex<Vec<OperationHandle>>,
}

impl FakeVeo {
    pub fn starting(handle: &str) -> Self {
        let fake = Self::default();
        fake.start.lock().push_back(Ok(OperationHandle(handle.into())));
        fake
    }

    pub fn start_fails(err: VeoError) -> Self {
        let fake = Self::default();
        fake.start.lock().push_back(Err(err));
        fake
    }

    pub fn reporting(self, reports: Vec<Result<OperationStatus, VeoError>>) -> Self {
        self.reports.lock().extend(reports);
        self
    }
}

pub fn video(uri: &str) -> Result<OperationStatus, VeoError> {
    Ok(OperationStatus::Succeeded { videos: vec![GeneratedVideo { uri: Some(uri.into()) }], filtered_reasons: vec![] })
}

#[async_trait]
impl VideoBackend for FakeVeo {
    async fn start_generation(&self, request: &GenerationRequest) -> Result<OperationHandle, VeoError> {
        self.started.lock().push(request.clone());
        self.start.lock().pop_front().unwrap_or_else(|| Err(VeoError::Remote("unscripted start".into())))
    }

    async fn get_operation(&self, handle: &OperationHandle) -> Result<OperationStatus, VeoError> {
        self.polled.lock().push(handle.clone());
        self.reports.lock().pop_front().unwrap_or(Ok(OperationStatus::Pending))
    }

    async fn download(&self, uri: &str) -> Result<Bytes, VeoError> {
        if uri.contains("missing") {
            return Err(VeoError::NotFound("Video file not found or expired".into()));
        }
        Ok(Bytes::from_static(b"\x00\x00\x00\x18ftypmp42"))
    }
}

#[derive(Default)]
pub struct FakeModel {
    pub replies: Mutex<VecDeque<Result<Vec<Result<ChatDelta, VeoError>>, VeoError>>>,
    pub probe: Mutex<Option<VeoError>>,
    pub seen: Mutex<Vec<(Vec<ChatTurn>, String)>>,
}

impl FakeModel {
    pub fn replying(deltas: Vec<Result<ChatDelta, VeoError>>) -> Self {
        let fake = Self::default();
        fake.replies.lock().push_back(Ok(deltas));
        fake
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn stream_reply(&self, history: &[ChatTurn], message: &str) -> Result<DeltaStream, VeoError> {
        self.seen.lock().push((history.to_vec(), message.to_string()));
        let deltas = self.replies.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))?;
        Ok(Box::pin(stream::iter(deltas)))
    }

    async fn probe(&self) -> Result<usize, VeoError> {
        match self.probe.lock().clone() {
            Some(err) => Err(err),
            None => Ok(3),
        }
    }
}

pub fn state(veo: Arc<FakeVeo>, model: Arc<FakeModel>) -> AppState {
    AppState { video: veo, model, has_api_key: false, environment: "test".into() }
}
