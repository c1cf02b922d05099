//! Camera/scan lifecycle controller.
//!
//! Runs as an actor on a dedicated OS thread with a current-thread runtime
//! and a `LocalSet`. Requests arrive over an mpsc queue with oneshot replies;
//! camera acquisition, model loading and inference run as local tasks that
//! post their completions back into the same loop, so every state change
//! happens in one place.

use crate::gate::{AcquireGate, AcquireToken};
use chrono::Utc;
use emoscan_core::{
    EmotionEngine, EngineError, FaceResult, Frame, ModelLoadError, ModelProvider, ScanResult,
};
use emoscan_hw::{CameraDevice, CameraError, CaptureConstraints, VideoStream};
use serde::Serialize;
use std::ops::ControlFlow;
use std::rc::Rc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    #[error("models are still loading")]
    ModelsNotReady,
    #[error("model loading failed: {0}")]
    ModelsFailed(String),
    #[error("camera: {0}")]
    Camera(#[from] CameraError),
    #[error("camera is not on")]
    CameraNotOn,
    #[error("camera has not buffered enough frames")]
    CameraNotReady,
    #[error("a scan is already in progress")]
    ScanInProgress,
    #[error("no face detected")]
    NoFaceDetected,
    #[error("scan engine error: {0}")]
    ScanEngine(String),
    #[error("camera start cancelled")]
    StartCancelled,
    #[error("scan cancelled: camera stopped")]
    ScanCancelled,
    #[error("failed to spawn controller thread: {0}")]
    Spawn(String),
    #[error("controller thread exited")]
    ChannelClosed,
}

impl ControllerError {
    /// Notice shown to the user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            ControllerError::ModelsNotReady => "AI models are still loading. Please wait...".into(),
            ControllerError::ModelsFailed(_) => {
                "Failed to load AI models. Please check the model directory and restart.".into()
            }
            ControllerError::Camera(e) => e.user_message(),
            ControllerError::CameraNotOn => "Start the camera before scanning.".into(),
            ControllerError::CameraNotReady => {
                "Camera is not ready yet. Please wait a moment.".into()
            }
            ControllerError::ScanInProgress => "A scan is already in progress.".into(),
            ControllerError::NoFaceDetected => {
                "No face detected! Please position your face in front of the camera and try again."
                    .into()
            }
            ControllerError::ScanEngine(_) => "Error during scan. Please try again.".into(),
            ControllerError::StartCancelled => "Camera start was cancelled.".into(),
            ControllerError::ScanCancelled => "Scan cancelled because the camera stopped.".into(),
            ControllerError::Spawn(_) | ControllerError::ChannelClosed => {
                "The scanner is not running.".into()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Idle,
    ModelsLoading,
    ModelsReady,
    ModelsFailed,
    CameraStarting,
    CameraOn,
    Scanning,
    CameraStopped,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::ModelsLoading => "models_loading",
            LifecycleState::ModelsReady => "models_ready",
            LifecycleState::ModelsFailed => "models_failed",
            LifecycleState::CameraStarting => "camera_starting",
            LifecycleState::CameraOn => "camera_on",
            LifecycleState::Scanning => "scanning",
            LifecycleState::CameraStopped => "camera_stopped",
        }
    }
}

/// Everything a UI needs to render the scanner.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub state: LifecycleState,
    pub scan_result: Option<ScanResult>,
    pub scan_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

impl NotificationLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationLevel::Info => "info",
            NotificationLevel::Warning => "warning",
            NotificationLevel::Error => "error",
        }
    }
}

/// User-facing notice, emitted the moment something happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    /// This request acquired the camera and it is now live.
    Started,
    /// Another start is in flight; nothing was acquired.
    AlreadyStarting,
    AlreadyOn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Passed to the model provider (a directory for the ONNX backend).
    pub model_base: String,
    pub constraints: CaptureConstraints,
    /// Wait this long for the readiness signal before polling frame size.
    pub ready_timeout: Duration,
    pub min_buffered_frames: usize,
    /// Informational only; low-confidence results are logged, not dropped.
    pub confidence_threshold: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            model_base: emoscan_core::default_model_dir().to_string_lossy().into_owned(),
            constraints: CaptureConstraints::default(),
            ready_timeout: Duration::from_secs(2),
            min_buffered_frames: 2,
            confidence_threshold: 0.5,
        }
    }
}

/// Messages sent from handles to the controller thread.
enum ControllerRequest {
    Start {
        reply: oneshot::Sender<Result<StartOutcome, ControllerError>>,
    },
    Stop {
        reply: oneshot::Sender<StopOutcome>,
    },
    Scan {
        reply: oneshot::Sender<Result<ScanResult, ControllerError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Results posted back by local tasks.
enum Completion<E, S> {
    ModelsLoaded(Result<E, ModelLoadError>),
    CameraStarted {
        attempt: u64,
        result: Result<S, CameraError>,
    },
    ScanFinished {
        attempt: u64,
        frame_width: u32,
        frame_height: u32,
        result: Result<Option<FaceResult>, EngineError>,
    },
    /// Capture stopped on its own after the camera went live.
    StreamFailed {
        attempt: u64,
        error: CameraError,
    },
}

/// Clone-safe handle to the controller thread.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<ControllerRequest>,
    snapshot: watch::Receiver<Snapshot>,
    notifications: broadcast::Sender<Notification>,
}

impl ControllerHandle {
    /// Request the camera. Resolves once it is live, or immediately if a
    /// start is already in flight or the camera is already on.
    pub async fn start(&self) -> Result<StartOutcome, ControllerError> {
        self.request(|reply| ControllerRequest::Start { reply }).await?
    }

    /// Release the camera and clear the current result.
    pub async fn stop(&self) -> Result<StopOutcome, ControllerError> {
        self.request(|reply| ControllerRequest::Stop { reply }).await
    }

    /// Classify the current frame.
    pub async fn scan(&self) -> Result<ScanResult, ControllerError> {
        self.request(|reply| ControllerRequest::Scan { reply }).await?
    }

    /// Release everything and stop the controller thread.
    pub async fn shutdown(&self) {
        let _ = self.request(|reply| ControllerRequest::Shutdown { reply }).await;
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ControllerRequest,
    ) -> Result<T, ControllerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| ControllerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ControllerError::ChannelClosed)
    }
}

/// Spawn the controller on a dedicated OS thread.
///
/// Model loading begins immediately; camera and scan requests are refused
/// until it completes.
pub fn spawn_controller<P, C>(
    provider: P,
    camera: C,
    config: ControllerConfig,
) -> Result<ControllerHandle, ControllerError>
where
    P: ModelProvider + Send + 'static,
    C: CameraDevice + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<ControllerRequest>(16);
    let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
    let (notify_tx, _) = broadcast::channel(64);
    let notifications = notify_tx.clone();

    std::thread::Builder::new()
        .name("emoscan-controller".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::error!(error = %e, "failed to build controller runtime");
                    return;
                }
            };
            let local = tokio::task::LocalSet::new();
            local.block_on(&runtime, async move {
                let (completions_tx, completions_rx) = mpsc::unbounded_channel();
                let controller = Controller {
                    provider: Rc::new(provider),
                    camera: Rc::new(camera),
                    config,
                    state: LifecycleState::Idle,
                    models_error: None,
                    engine: None,
                    stream: None,
                    stream_watch: None,
                    stream_attempt: 0,
                    scan_result: None,
                    scan_count: 0,
                    start_gate: AcquireGate::new(),
                    scan_gate: AcquireGate::new(),
                    pending_start: None,
                    pending_scan: None,
                    attempts: 0,
                    completions: completions_tx,
                    snapshot: snapshot_tx,
                    notifications,
                };
                controller.run(rx, completions_rx).await;
            });
            tracing::info!("controller thread exiting");
        })
        .map_err(|e| ControllerError::Spawn(e.to_string()))?;

    Ok(ControllerHandle {
        tx,
        snapshot: snapshot_rx,
        notifications: notify_tx,
    })
}

struct PendingStart {
    attempt: u64,
    _token: AcquireToken,
    task: JoinHandle<()>,
    reply: oneshot::Sender<Result<StartOutcome, ControllerError>>,
}

struct PendingScan {
    attempt: u64,
    _token: AcquireToken,
    reply: oneshot::Sender<Result<ScanResult, ControllerError>>,
}

struct Controller<P: ModelProvider, C: CameraDevice> {
    provider: Rc<P>,
    camera: Rc<C>,
    config: ControllerConfig,
    state: LifecycleState,
    models_error: Option<String>,
    engine: Option<Rc<P::Engine>>,
    stream: Option<C::Stream>,
    /// Local task waiting on the live stream's failure signal.
    stream_watch: Option<JoinHandle<()>>,
    /// Start attempt that produced the live stream.
    stream_attempt: u64,
    scan_result: Option<ScanResult>,
    scan_count: u64,
    start_gate: AcquireGate,
    scan_gate: AcquireGate,
    pending_start: Option<PendingStart>,
    pending_scan: Option<PendingScan>,
    /// Tags start/scan tasks so late completions from cancelled work are ignored.
    attempts: u64,
    completions: mpsc::UnboundedSender<Completion<P::Engine, C::Stream>>,
    snapshot: watch::Sender<Snapshot>,
    notifications: broadcast::Sender<Notification>,
}

impl<P: ModelProvider + 'static, C: CameraDevice + 'static> Controller<P, C> {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<ControllerRequest>,
        mut completions: mpsc::UnboundedReceiver<Completion<P::Engine, C::Stream>>,
    ) {
        tracing::info!("controller started");
        self.begin_model_load();

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => {
                        if self.handle_request(request).is_break() {
                            break;
                        }
                    }
                    None => {
                        self.teardown();
                        break;
                    }
                },
                Some(done) = completions.recv() => self.handle_completion(done),
            }
        }
    }

    fn handle_request(&mut self, request: ControllerRequest) -> ControlFlow<()> {
        match request {
            ControllerRequest::Start { reply } => self.start(reply),
            ControllerRequest::Stop { reply } => {
                let _ = reply.send(self.stop());
            }
            ControllerRequest::Scan { reply } => self.scan(reply),
            ControllerRequest::Shutdown { reply } => {
                self.teardown();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn handle_completion(&mut self, done: Completion<P::Engine, C::Stream>) {
        match done {
            Completion::ModelsLoaded(result) => self.finish_model_load(result),
            Completion::CameraStarted { attempt, result } => self.finish_start(attempt, result),
            Completion::ScanFinished {
                attempt,
                frame_width,
                frame_height,
                result,
            } => self.finish_scan(attempt, frame_width, frame_height, result),
            Completion::StreamFailed { attempt, error } => self.finish_stream_failure(attempt, error),
        }
    }

    // --- Models ---

    fn begin_model_load(&mut self) {
        self.set_state(LifecycleState::ModelsLoading);
        tracing::info!(model_base = %self.config.model_base, "loading models");

        let provider = Rc::clone(&self.provider);
        let model_base = self.config.model_base.clone();
        let completions = self.completions.clone();
        tokio::task::spawn_local(async move {
            let result = provider.load_models(&model_base).await;
            let _ = completions.send(Completion::ModelsLoaded(result));
        });
    }

    fn finish_model_load(&mut self, result: Result<P::Engine, ModelLoadError>) {
        match result {
            Ok(engine) => {
                self.engine = Some(Rc::new(engine));
                self.set_state(LifecycleState::ModelsReady);
                self.notify(NotificationLevel::Info, "AI models loaded. Ready to start the camera.");
            }
            Err(e) => {
                tracing::error!(error = %e, "model loading failed; camera features disabled");
                let err = ControllerError::ModelsFailed(e.to_string());
                self.models_error = Some(e.to_string());
                self.set_state(LifecycleState::ModelsFailed);
                self.notify(NotificationLevel::Error, err.user_message());
            }
        }
    }

    fn models_unavailable(&self) -> ControllerError {
        match &self.models_error {
            Some(msg) => ControllerError::ModelsFailed(msg.clone()),
            None => ControllerError::ModelsNotReady,
        }
    }

    // --- Camera start/stop ---

    fn start(&mut self, reply: oneshot::Sender<Result<StartOutcome, ControllerError>>) {
        let outcome = match self.state {
            LifecycleState::Idle | LifecycleState::ModelsLoading | LifecycleState::ModelsFailed => {
                let err = self.models_unavailable();
                self.notify(NotificationLevel::Warning, err.user_message());
                Err(err)
            }
            LifecycleState::CameraStarting => Ok(StartOutcome::AlreadyStarting),
            LifecycleState::CameraOn | LifecycleState::Scanning => Ok(StartOutcome::AlreadyOn),
            LifecycleState::ModelsReady | LifecycleState::CameraStopped => {
                return self.begin_start(reply);
            }
        };
        tracing::debug!(state = self.state.as_str(), ?outcome, "start request not admitted");
        let _ = reply.send(outcome);
    }

    fn begin_start(&mut self, reply: oneshot::Sender<Result<StartOutcome, ControllerError>>) {
        let Some(token) = self.start_gate.try_acquire() else {
            let _ = reply.send(Ok(StartOutcome::AlreadyStarting));
            return;
        };

        self.attempts += 1;
        let attempt = self.attempts;
        let camera = Rc::clone(&self.camera);
        let constraints = self.config.constraints.clone();
        let ready_timeout = self.config.ready_timeout;
        let completions = self.completions.clone();

        tracing::info!(
            attempt,
            width = constraints.width,
            height = constraints.height,
            fps = constraints.frame_rate,
            "starting camera"
        );

        let task = tokio::task::spawn_local(async move {
            let result = match camera.acquire(&constraints).await {
                // A stream that dies while starting is dropped, which releases it.
                Ok(mut stream) => wait_until_live(&mut stream, ready_timeout)
                    .await
                    .map(|()| stream),
                Err(e) => Err(e),
            };
            let _ = completions.send(Completion::CameraStarted { attempt, result });
        });

        self.pending_start = Some(PendingStart {
            attempt,
            _token: token,
            task,
            reply,
        });
        self.set_state(LifecycleState::CameraStarting);
    }

    fn finish_start(&mut self, attempt: u64, result: Result<C::Stream, CameraError>) {
        if !matches!(&self.pending_start, Some(p) if p.attempt == attempt) {
            // Dropping a stale stream releases it.
            tracing::debug!(attempt, "discarding completion of a cancelled camera start");
            return;
        }
        let Some(pending) = self.pending_start.take() else {
            return;
        };

        match result {
            Ok(stream) => {
                self.watch_stream(attempt, &stream);
                self.stream = Some(stream);
                self.scan_result = None;
                self.set_state(LifecycleState::CameraOn);
                tracing::info!(attempt, "camera ready");
                self.notify(NotificationLevel::Info, "Camera ready. Position your face and scan.");
                let _ = pending.reply.send(Ok(StartOutcome::Started));
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "camera acquisition failed");
                self.set_state(LifecycleState::ModelsReady);
                let err = ControllerError::Camera(e);
                self.notify(NotificationLevel::Error, err.user_message());
                let _ = pending.reply.send(Err(err));
            }
        }
    }

    fn stop(&mut self) -> StopOutcome {
        match self.state {
            LifecycleState::CameraStarting => {
                if let Some(pending) = self.pending_start.take() {
                    pending.task.abort();
                    let _ = pending.reply.send(Err(ControllerError::StartCancelled));
                }
            }
            LifecycleState::CameraOn | LifecycleState::Scanning => {
                self.release_stream();
                if let Some(pending) = self.pending_scan.take() {
                    let _ = pending.reply.send(Err(ControllerError::ScanCancelled));
                }
            }
            _ => return StopOutcome::NotRunning,
        }

        self.scan_result = None;
        self.set_state(LifecycleState::CameraStopped);
        self.notify(NotificationLevel::Info, "Camera stopped.");
        StopOutcome::Stopped
    }

    fn watch_stream(&mut self, attempt: u64, stream: &C::Stream) {
        let failure = stream.failure_signal();
        let completions = self.completions.clone();
        self.stream_attempt = attempt;
        self.stream_watch = Some(tokio::task::spawn_local(async move {
            let error = failure.failed().await;
            let _ = completions.send(Completion::StreamFailed { attempt, error });
        }));
    }

    /// Capture died under a live camera: release it and stop, keeping the
    /// scan count.
    fn finish_stream_failure(&mut self, attempt: u64, error: CameraError) {
        let live = matches!(
            self.state,
            LifecycleState::CameraOn | LifecycleState::Scanning
        );
        if !live || attempt != self.stream_attempt {
            tracing::debug!(attempt, error = %error, "ignoring failure of a released stream");
            return;
        }

        tracing::warn!(attempt, error = %error, "camera capture failed; stopping camera");
        self.release_stream();
        let err = ControllerError::Camera(error);
        if let Some(pending) = self.pending_scan.take() {
            let _ = pending.reply.send(Err(err.clone()));
        }
        self.scan_result = None;
        self.set_state(LifecycleState::CameraStopped);
        self.notify(NotificationLevel::Error, err.user_message());
    }

    fn release_stream(&mut self) {
        if let Some(watch) = self.stream_watch.take() {
            watch.abort();
        }
        if let Some(mut stream) = self.stream.take() {
            stream.release();
            tracing::info!("camera stream released");
        }
    }

    fn teardown(&mut self) {
        tracing::info!(
            state = self.state.as_str(),
            start_in_flight = self.start_gate.is_busy(),
            scan_in_flight = self.scan_gate.is_busy(),
            "controller shutting down"
        );
        if let Some(pending) = self.pending_start.take() {
            pending.task.abort();
            let _ = pending.reply.send(Err(ControllerError::StartCancelled));
        }
        if let Some(pending) = self.pending_scan.take() {
            let _ = pending.reply.send(Err(ControllerError::ScanCancelled));
        }
        self.release_stream();
    }

    // --- Scanning ---

    fn scan(&mut self, reply: oneshot::Sender<Result<ScanResult, ControllerError>>) {
        match self.prepare_scan() {
            Ok((engine, frame, token)) => self.begin_scan(engine, frame, token, reply),
            Err(err) => {
                tracing::debug!(state = self.state.as_str(), error = %err, "scan refused");
                self.notify(NotificationLevel::Warning, err.user_message());
                let _ = reply.send(Err(err));
            }
        }
    }

    /// Check every scan precondition without touching any state.
    fn prepare_scan(&self) -> Result<(Rc<P::Engine>, Frame, AcquireToken), ControllerError> {
        match self.state {
            LifecycleState::CameraOn => {}
            LifecycleState::Scanning => return Err(ControllerError::ScanInProgress),
            LifecycleState::Idle | LifecycleState::ModelsLoading | LifecycleState::ModelsFailed => {
                return Err(self.models_unavailable());
            }
            LifecycleState::ModelsReady
            | LifecycleState::CameraStarting
            | LifecycleState::CameraStopped => return Err(ControllerError::CameraNotOn),
        }

        let engine = self.engine.as_ref().ok_or_else(|| self.models_unavailable())?;
        let stream = self.stream.as_ref().ok_or(ControllerError::CameraNotOn)?;

        let buffered = stream.buffered_frames();
        if buffered < self.config.min_buffered_frames {
            tracing::debug!(buffered, required = self.config.min_buffered_frames, "not enough frames");
            return Err(ControllerError::CameraNotReady);
        }
        let frame = stream.latest_frame().ok_or(ControllerError::CameraNotReady)?;
        let token = self
            .scan_gate
            .try_acquire()
            .ok_or(ControllerError::ScanInProgress)?;

        Ok((Rc::clone(engine), frame, token))
    }

    fn begin_scan(
        &mut self,
        engine: Rc<P::Engine>,
        frame: Frame,
        token: AcquireToken,
        reply: oneshot::Sender<Result<ScanResult, ControllerError>>,
    ) {
        self.attempts += 1;
        let attempt = self.attempts;
        let completions = self.completions.clone();

        tracing::info!(
            attempt,
            seq = frame.sequence,
            width = frame.width,
            height = frame.height,
            age_ms = frame.captured_at.elapsed().as_millis() as u64,
            "scanning"
        );

        tokio::task::spawn_local(async move {
            let result = engine.detect(&frame).await;
            let _ = completions.send(Completion::ScanFinished {
                attempt,
                frame_width: frame.width,
                frame_height: frame.height,
                result,
            });
        });

        self.pending_scan = Some(PendingScan {
            attempt,
            _token: token,
            reply,
        });
        self.set_state(LifecycleState::Scanning);
    }

    fn finish_scan(
        &mut self,
        attempt: u64,
        frame_width: u32,
        frame_height: u32,
        result: Result<Option<FaceResult>, EngineError>,
    ) {
        if !matches!(&self.pending_scan, Some(p) if p.attempt == attempt) {
            tracing::debug!(attempt, "discarding result of a cancelled scan");
            return;
        }
        let Some(pending) = self.pending_scan.take() else {
            return;
        };

        let reply = match result {
            Ok(Some(face)) => {
                let scan = ScanResult::from_face(&face, frame_width, frame_height, Utc::now());
                if scan.confidence < self.config.confidence_threshold {
                    tracing::info!(
                        confidence = scan.confidence,
                        threshold = self.config.confidence_threshold,
                        "low-confidence result reported anyway"
                    );
                }
                self.scan_result = Some(scan.clone());
                self.scan_count += 1;
                tracing::info!(
                    attempt,
                    emotion = %scan.emotion,
                    confidence = scan.confidence,
                    quality = scan.quality.as_str(),
                    scan_count = self.scan_count,
                    "scan complete"
                );
                self.set_state(LifecycleState::CameraOn);
                Ok(scan)
            }
            Ok(None) => {
                tracing::info!(attempt, "no face detected");
                self.set_state(LifecycleState::CameraOn);
                let err = ControllerError::NoFaceDetected;
                self.notify(NotificationLevel::Warning, err.user_message());
                Err(err)
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "scan engine failed");
                self.set_state(LifecycleState::CameraOn);
                let err = ControllerError::ScanEngine(e.to_string());
                self.notify(NotificationLevel::Error, err.user_message());
                Err(err)
            }
        };
        let _ = pending.reply.send(reply);
    }

    // --- Publishing ---

    fn set_state(&mut self, state: LifecycleState) {
        if self.state != state {
            tracing::debug!(from = self.state.as_str(), to = state.as_str(), "state transition");
        }
        self.state = state;
        self.snapshot.send_replace(Snapshot {
            state: self.state,
            scan_result: self.scan_result.clone(),
            scan_count: self.scan_count,
        });
    }

    fn notify(&self, level: NotificationLevel, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(level = level.as_str(), %message, "notification");
        // No subscribers is fine.
        let _ = self.notifications.send(Notification { level, message });
    }
}

/// Wait for the stream's readiness signal; if none arrives within
/// `ready_timeout`, promote anyway when a non-empty frame is already present.
/// Fails if capture stops before the stream goes live.
async fn wait_until_live<S: VideoStream>(
    stream: &mut S,
    ready_timeout: Duration,
) -> Result<(), CameraError> {
    if let Ok(ready) = tokio::time::timeout(ready_timeout, stream.ready()).await {
        return ready;
    }
    if let Some(error) = stream.failure_signal().current() {
        return Err(error);
    }

    let (width, height) = stream.frame_dimensions();
    let timeout_ms = ready_timeout.as_millis() as u64;
    if width > 0 && height > 0 {
        // Possible false-ready on slow hardware; the buffered-frame check
        // still gates scans.
        tracing::warn!(width, height, timeout_ms, "no readiness signal; promoting on polled frame size");
        return Ok(());
    }

    tracing::warn!(timeout_ms, "no readiness signal and no frame yet; still waiting");
    stream.ready().await
}
