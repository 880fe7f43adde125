//! Client-side driver of one video generation attempt.
//!
//! `idle -> generating -> polling -> {completed | error}`. Terminal states stay
//! put until [`GenerationOrchestrator::reset`] or a new submission. Every
//! attempt owns a [`CancellationToken`]; starting new work cancels the old
//! token first, and state changes from a cancelled attempt are dropped, so
//! polls for a stale handle can never land.

use std::{ops::ControlFlow, path::Path, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    backend::VideoBackend,
    config::OrchestratorConfig,
    error::{ErrorKind, VeoError},
    models::{GenerationRequest, OperationHandle},
    operation::OperationStatus,
};

pub const BASELINE_PROGRESS: u8 = 5;
pub const POLLING_PROGRESS_CAP: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    #[default]
    Idle,
    Generating,
    Polling,
    Completed,
    Error,
}

impl GenerationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationState {
    pub status: GenerationStatus,
    pub progress: u8,
    pub operation_handle: Option<OperationHandle>,
    pub video_uri: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub estimated_time_remaining_ms: Option<u64>,
}

impl GenerationState {
    fn generating(config: &OrchestratorConfig) -> Self {
        Self {
            status: GenerationStatus::Generating,
            estimated_time_remaining_ms: Some(millis(config.estimated_total)),
            ..Self::default()
        }
    }

    fn fail(&mut self, err: &VeoError) {
        self.status = GenerationStatus::Error;
        self.error = Some(err.to_string());
        self.error_kind = Some(err.kind());
        self.estimated_time_remaining_ms = None;
    }

    fn record_progress(&mut self, elapsed: Duration, config: &OrchestratorConfig) {
        let total = config.estimated_total.as_millis().max(1) as f64;
        let estimate = (elapsed.as_millis() as f64 / total * f64::from(POLLING_PROGRESS_CAP))
            .min(f64::from(POLLING_PROGRESS_CAP))
            .round() as u8;
        self.progress = self.progress.max(estimate);
        let remaining = config.estimated_total.saturating_sub(elapsed);
        self.estimated_time_remaining_ms = (!remaining.is_zero()).then(|| millis(remaining));
    }

    /// Fold one status report into the state; `Break` ends the poll loop.
    fn record_poll(
        &mut self,
        report: Result<OperationStatus, VeoError>,
        elapsed: Duration,
        config: &OrchestratorConfig,
    ) -> ControlFlow<()> {
        match report.and_then(|status| status.resolve()) {
            Ok(Some(uri)) => {
                info!("✅ Video ready: {}", uri);
                self.status = GenerationStatus::Completed;
                self.progress = 100;
                self.video_uri = Some(uri);
                self.estimated_time_remaining_ms = None;
                ControlFlow::Break(())
            }
            Ok(None) => {
                self.record_progress(elapsed, config);
                if elapsed > config.max_polling {
                    error!("❌ Gave up after {:?} without a result", elapsed);
                    self.fail(&VeoError::Timeout);
                    return ControlFlow::Break(());
                }
                ControlFlow::Continue(())
            }
            Err(VeoError::Cancelled) => ControlFlow::Break(()),
            Err(e) => {
                error!("❌ Polling error: {}", e);
                self.fail(&e);
                ControlFlow::Break(())
            }
        }
    }
}

struct Shared {
    backend: Arc<dyn VideoBackend>,
    config: OrchestratorConfig,
    state: watch::Sender<GenerationState>,
}

impl Shared {
    /// Apply `f` unless the attempt behind `token` has been superseded.
    fn apply(&self, token: &CancellationToken, f: impl FnOnce(&mut GenerationState)) -> bool {
        self.state.send_if_modified(|state| {
            if token.is_cancelled() {
                return false;
            }
            f(state);
            true
        })
    }
}

struct Attempt {
    id: u64,
    token: CancellationToken,
    poller: Option<JoinHandle<()>>,
}

impl Attempt {
    fn cancel(self) {
        self.token.cancel();
        if let Some(poller) = self.poller {
            poller.abort();
        }
    }
}

pub struct GenerationOrchestrator {
    shared: Arc<Shared>,
    attempt: Mutex<Option<Attempt>>,
    next_id: Mutex<u64>,
}

impl GenerationOrchestrator {
    pub fn new(backend: Arc<dyn VideoBackend>) -> Self {
        Self::with_config(backend, OrchestratorConfig::default())
    }

    pub fn with_config(backend: Arc<dyn VideoBackend>, config: OrchestratorConfig) -> Self {
        let (state, _) = watch::channel(GenerationState::default());
        Self {
            shared: Arc::new(Shared { backend, config, state }),
            attempt: Mutex::new(None),
            next_id: Mutex::new(0),
        }
    }

    pub fn state(&self) -> GenerationState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GenerationState> {
        self.shared.state.subscribe()
    }

    /// Whether a poll timer is currently live.
    pub fn is_polling(&self) -> bool {
        self.attempt
            .lock()
            .as_ref()
            .and_then(|a| a.poller.as_ref())
            .is_some_and(|p| !p.is_finished())
    }

    /// Start a new attempt, replacing (and cancelling) any previous one.
    pub async fn submit(&self, request: GenerationRequest) {
        let (id, token) = self.begin_attempt();

        if let Err(e) = request.validate() {
            self.shared.apply(&token, |s| s.fail(&e));
            return;
        }

        info!("🎬 Starting video generation with model {}", request.model.as_str());
        let started = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Start request abandoned by a newer attempt");
                return;
            }
            started = self.shared.backend.start_generation(&request) => started,
        };

        let handle = match started {
            Ok(handle) => handle,
            Err(VeoError::Cancelled) => return,
            Err(e) => {
                error!("❌ Video generation error: {}", e);
                self.shared.apply(&token, |s| s.fail(&e));
                return;
            }
        };

        let started_at = Instant::now();
        let estimate = millis(self.shared.config.estimated_total);
        let accepted = self.shared.apply(&token, |s| {
            s.status = GenerationStatus::Polling;
            s.operation_handle = Some(handle.clone());
            s.progress = BASELINE_PROGRESS;
            s.estimated_time_remaining_ms = Some(estimate);
        });
        if !accepted {
            return;
        }

        let poller = tokio::spawn(poll_loop(self.shared.clone(), token, handle, started_at));
        let mut slot = self.attempt.lock();
        match slot.as_mut() {
            Some(attempt) if attempt.id == id => attempt.poller = Some(poller),
            _ => poller.abort(),
        }
    }

    /// Cancel everything and return to `idle`.
    pub fn reset(&self) {
        let mut slot = self.attempt.lock();
        if let Some(attempt) = slot.take() {
            attempt.cancel();
        }
        self.shared.state.send_replace(GenerationState::default());
    }

    /// Fetch the finished video and write it to `dest`, returning its size.
    pub async fn download_video(&self, dest: &Path) -> Result<u64, VeoError> {
        let uri = self
            .state()
            .video_uri
            .ok_or_else(|| VeoError::NotFound("No video available for download".into()))?;
        let bytes = self.shared.backend.download(&uri).await?;
        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| VeoError::Transport(format!("Failed to save video: {}", e)))?;
        info!("💾 Saved {} bytes to {}", bytes.len(), dest.display());
        Ok(bytes.len() as u64)
    }

    fn begin_attempt(&self) -> (u64, CancellationToken) {
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        };
        let token = CancellationToken::new();
        let mut slot = self.attempt.lock();
        if let Some(previous) = slot.replace(Attempt { id, token: token.clone(), poller: None }) {
            debug!("Cancelling attempt {}", previous.id);
            previous.cancel();
        }
        self.shared.state.send_replace(GenerationState::generating(&self.shared.config));
        (id, token)
    }
}

impl Drop for GenerationOrchestrator {
    fn drop(&mut self) {
        if let Some(attempt) = self.attempt.get_mut().take() {
            attempt.cancel();
        }
    }
}

async fn poll_loop(shared: Arc<Shared>, token: CancellationToken, handle: OperationHandle, started_at: Instant) {
    let mut ticker = tokio::time::interval(shared.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let report = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            report = shared.backend.get_operation(&handle) => report,
        };
        let elapsed = started_at.elapsed();
        let mut flow = ControlFlow::Break(());
        shared.apply(&token, |s| flow = s.record_poll(report, elapsed, &shared.config));
        if flow.is_break() {
            break;
        }
    }
    debug!("Stopped polling {}", handle);
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{GeneratedVideo, RemoteFailure};
    use async_trait::async_trait;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct FakeBackend {
        handles: Mutex<VecDeque<Result<OperationHandle, VeoError>>>,
        reports: Mutex<VecDeque<Result<OperationStatus, VeoError>>>,
        polls: Mutex<Vec<OperationHandle>>,
        starts: Mutex<usize>,
        start_delay: Option<Duration>,
    }

    impl FakeBackend {
        fn with_handles(names: &[&str]) -> Self {
            let fake = Self::default();
            fake.handles.lock().extend(names.iter().map(|n| Ok(OperationHandle(n.to_string()))));
            fake
        }

        fn script(self, reports: Vec<Result<OperationStatus, VeoError>>) -> Self {
            self.reports.lock().extend(reports);
            self
        }

        fn poll_count(&self) -> usize {
            self.polls.lock().len()
        }
    }

    #[async_trait]
    impl VideoBackend for FakeBackend {
        async fn start_generation(&self, _request: &GenerationRequest) -> Result<OperationHandle, VeoError> {
            *self.starts.lock() += 1;
            if let Some(delay) = self.start_delay {
                tokio::time::sleep(delay).await;
            }
            self.handles.lock().pop_front().unwrap_or_else(|| Err(VeoError::Remote("no handle scripted".into())))
        }

        async fn get_operation(&self, handle: &OperationHandle) -> Result<OperationStatus, VeoError> {
            self.polls.lock().push(handle.clone());
            self.reports.lock().pop_front().unwrap_or(Ok(OperationStatus::Pending))
        }

        async fn download(&self, uri: &str) -> Result<Bytes, VeoError> {
            Ok(Bytes::from(format!("video from {}", uri)))
        }
    }

    fn success(uri: &str) -> Result<OperationStatus, VeoError> {
        Ok(OperationStatus::Succeeded {
            videos: vec![GeneratedVideo { uri: Some(uri.to_string()) }],
            filtered_reasons: vec![],
        })
    }

    fn orchestrator(fake: FakeBackend) -> (Arc<FakeBackend>, GenerationOrchestrator) {
        let fake = Arc::new(fake);
        let orch = GenerationOrchestrator::new(fake.clone());
        (fake, orch)
    }

    async fn wait(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn submit_then_reset_returns_to_idle() {
        let (fake, orch) = orchestrator(FakeBackend::with_handles(&["operations/1"]));
        orch.submit(GenerationRequest::new("a fox in snow")).await;
        assert_eq!(orch.state().status, GenerationStatus::Polling);
        assert_eq!(orch.state().progress, BASELINE_PROGRESS);

        orch.reset();
        assert_eq!(orch.state(), GenerationState::default());
        assert!(!orch.is_polling());

        let polls = fake.poll_count();
        wait(60).await;
        assert_eq!(fake.poll_count(), polls);
        assert_eq!(orch.state(), GenerationState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn completes_with_video_uri() {
        let fake = FakeBackend::with_handles(&["operations/1"])
            .script(vec![Ok(OperationStatus::Pending), Ok(OperationStatus::Pending), success("https://v/1.mp4")]);
        let (fake, orch) = orchestrator(fake);
        orch.submit(GenerationRequest::new("waves")).await;
        wait(12).await;

        let state = orch.state();
        assert_eq!(state.status, GenerationStatus::Completed);
        assert_eq!(state.progress, 100);
        assert_eq!(state.video_uri.as_deref(), Some("https://v/1.mp4"));
        assert_eq!(state.estimated_time_remaining_ms, None);
        assert_eq!(state.operation_handle, Some(OperationHandle("operations/1".into())));
        assert_eq!(fake.poll_count(), 3);

        wait(30).await;
        assert_eq!(fake.poll_count(), 3);
        assert!(!orch.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_monotonic_and_capped() {
        let (_fake, orch) = orchestrator(FakeBackend::with_handles(&["operations/1"]));
        orch.submit(GenerationRequest::new("slow clouds")).await;

        let mut last = orch.state().progress;
        for _ in 0..60 {
            wait(5).await;
            let state = orch.state();
            assert!(state.progress >= last, "progress went from {} to {}", last, state.progress);
            assert!(state.progress <= POLLING_PROGRESS_CAP);
            last = state.progress;
        }
        let state = orch.state();
        assert_eq!(state.status, GenerationStatus::Polling);
        assert_eq!(state.progress, POLLING_PROGRESS_CAP);
        assert_eq!(state.estimated_time_remaining_ms, None);
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_time_counts_down() {
        let (_fake, orch) = orchestrator(FakeBackend::with_handles(&["operations/1"]));
        orch.submit(GenerationRequest::new("clock")).await;
        assert_eq!(orch.state().estimated_time_remaining_ms, Some(180_000));
        wait(61).await;
        let state = orch.state();
        assert_eq!(state.estimated_time_remaining_ms, Some(120_000));
        assert_eq!(state.progress, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_ceiling() {
        let (fake, orch) = orchestrator(FakeBackend::with_handles(&["operations/1"]));
        orch.submit(GenerationRequest::new("never finishes")).await;
        wait(400).await;

        let state = orch.state();
        assert_eq!(state.status, GenerationStatus::Error);
        assert_eq!(state.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(state.error.as_deref(), Some(crate::error::TIMEOUT_MESSAGE));

        let polls = fake.poll_count();
        wait(120).await;
        assert_eq!(fake.poll_count(), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_result_list_is_an_error() {
        let fake = FakeBackend::with_handles(&["operations/1"])
            .script(vec![Ok(OperationStatus::Succeeded { videos: vec![], filtered_reasons: vec![] })]);
        let (_fake, orch) = orchestrator(fake);
        orch.submit(GenerationRequest::new("empty")).await;
        wait(1).await;

        let state = orch.state();
        assert_eq!(state.status, GenerationStatus::Error);
        assert_eq!(state.error_kind, Some(ErrorKind::MalformedResponse));
        assert_eq!(state.video_uri, None);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_failure_is_reported() {
        let fake = FakeBackend::with_handles(&["operations/1"]).script(vec![Ok(OperationStatus::Failed(RemoteFailure {
            code: Some(3),
            message: "prompt rejected".into(),
        }))]);
        let (_fake, orch) = orchestrator(fake);
        orch.submit(GenerationRequest::new("bad")).await;
        wait(1).await;
        assert_eq!(orch.state().error.as_deref(), Some("Video generation failed: prompt rejected"));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_stops_polling() {
        let fake = FakeBackend::with_handles(&["operations/1"])
            .script(vec![Ok(OperationStatus::Pending), Err(VeoError::Transport("Network error: reset".into()))]);
        let (fake, orch) = orchestrator(fake);
        orch.submit(GenerationRequest::new("x")).await;
        wait(30).await;
        assert_eq!(orch.state().status, GenerationStatus::Error);
        assert_eq!(orch.state().error.as_deref(), Some("Network error: reset"));
        assert_eq!(fake.poll_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_poll_is_silent() {
        let fake = FakeBackend::with_handles(&["operations/1"]).script(vec![Err(VeoError::Cancelled)]);
        let (fake, orch) = orchestrator(fake);
        orch.submit(GenerationRequest::new("x")).await;
        wait(30).await;
        assert_eq!(orch.state().status, GenerationStatus::Polling);
        assert_eq!(orch.state().error, None);
        assert_eq!(fake.poll_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_failure_does_not_poll() {
        let fake = FakeBackend::default();
        fake.handles.lock().push_back(Err(VeoError::QuotaExceeded("API quota exceeded or rate limit reached".into())));
        let (fake, orch) = orchestrator(fake);
        orch.submit(GenerationRequest::new("x")).await;
        wait(30).await;

        let state = orch.state();
        assert_eq!(state.status, GenerationStatus::Error);
        assert_eq!(state.error_kind, Some(ErrorKind::QuotaExceeded));
        assert_eq!(state.operation_handle, None);
        assert_eq!(fake.poll_count(), 0);
        assert!(!orch.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_request_never_reaches_backend() {
        let (fake, orch) = orchestrator(FakeBackend::with_handles(&["operations/1"]));
        orch.submit(GenerationRequest::new("")).await;
        let state = orch.state();
        assert_eq!(state.status, GenerationStatus::Error);
        assert_eq!(state.error_kind, Some(ErrorKind::Validation));
        assert_eq!(*fake.starts.lock(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resubmitting_leaves_one_timer_for_the_new_handle() {
        let (fake, orch) = orchestrator(FakeBackend::with_handles(&["operations/old", "operations/new"]));
        orch.submit(GenerationRequest::new("first")).await;
        wait(7).await;
        assert!(fake.polls.lock().iter().all(|h| h.as_str() == "operations/old"));

        orch.submit(GenerationRequest::new("second")).await;
        fake.polls.lock().clear();
        wait(30).await;

        let polls = fake.polls.lock().clone();
        assert!(!polls.is_empty());
        assert!(polls.iter().all(|h| h.as_str() == "operations/new"), "stale polls: {:?}", polls);
        assert!((6..=7).contains(&polls.len()), "expected one timer, saw {} polls", polls.len());
        assert_eq!(orch.state().operation_handle, Some(OperationHandle("operations/new".into())));
        assert!(orch.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_abandons_in_flight_start() {
        let mut fake = FakeBackend::with_handles(&["operations/1"]);
        fake.start_delay = Some(Duration::from_secs(10));
        let (fake, orch) = orchestrator(fake);
        let orch = Arc::new(orch);

        let submitting = tokio::spawn({
            let orch = orch.clone();
            async move { orch.submit(GenerationRequest::new("slow start")).await }
        });
        wait(1).await;
        assert_eq!(orch.state().status, GenerationStatus::Generating);

        orch.reset();
        submitting.await.unwrap();
        wait(30).await;
        assert_eq!(orch.state(), GenerationState::default());
        assert_eq!(fake.poll_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn downloads_completed_video() {
        let fake = FakeBackend::with_handles(&["operations/1"]).script(vec![success("https://v/2.mp4")]);
        let (_fake, orch) = orchestrator(fake);

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.mp4");
        assert!(matches!(orch.download_video(&dest).await, Err(VeoError::NotFound(_))));

        orch.submit(GenerationRequest::new("x")).await;
        wait(1).await;
        let written = orch.download_video(&dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"video from https://v/2.mp4");
        assert_eq!(written, 26);
    }
}
