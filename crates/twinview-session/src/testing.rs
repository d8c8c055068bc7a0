//! Fakes shared by the session tests

use futures_util::future::{BoxFuture, FutureExt};
use glam::{Mat4, Vec3};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use twinview_client::{ApiError, ModelApi};
use twinview_core::{
    FragmentId, ModelRef, ModelSummary, ModelUpload, ObjectId, ScreenPoint, StatusPayload,
    Viewport,
};

use crate::controls::ControlGroup;
use crate::engine::{MarkerBatch, SceneEngine, SceneError};
use crate::memory::MemoryScene;
use crate::notify::{Notice, Notifier};
use crate::xr::{
    Eye, FramebufferId, GraphicsContext, ReferenceSpace, ReferenceSpaceKind, SessionMode, View,
    ViewerPose, XrError, XrFrame, XrSession, XrSystem,
};

pub fn model(urn: &str) -> ModelRef {
    ModelRef::new(urn).unwrap()
}

pub fn not_started() -> StatusPayload {
    StatusPayload {
        status: "n/a".to_string(),
        ..StatusPayload::default()
    }
}

pub fn in_progress(progress: &str) -> StatusPayload {
    StatusPayload {
        status: "inprogress".to_string(),
        progress: Some(progress.to_string()),
        messages: Vec::new(),
    }
}

pub fn failed(codes: &[&str]) -> StatusPayload {
    StatusPayload {
        status: "failed".to_string(),
        progress: None,
        messages: codes.iter().map(|c| json!({ "code": c })).collect(),
    }
}

pub fn ready() -> StatusPayload {
    StatusPayload {
        status: "success".to_string(),
        progress: Some("complete".to_string()),
        messages: Vec::new(),
    }
}

/// Wait until `condition` holds, yielding to other tasks in between
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached");
}

type Scripted = Result<StatusPayload, String>;

/// Model API answering from per-model status scripts; the last entry repeats
#[derive(Default)]
pub struct ScriptedApi {
    models: Mutex<Option<Vec<ModelSummary>>>,
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    status_calls: Mutex<HashMap<String, usize>>,
    uploads: Mutex<Vec<ModelUpload>>,
    upload_result: Mutex<Option<String>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_models(self, models: &[(&str, &str)]) -> Self {
        *self.models.lock().unwrap() = Some(
            models
                .iter()
                .map(|(urn, name)| ModelSummary {
                    urn: model(urn),
                    name: name.to_string(),
                })
                .collect(),
        );
        self
    }

    pub fn script(self, urn: &str, statuses: Vec<StatusPayload>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(urn.to_string(), statuses.into_iter().map(Ok).collect());
        self
    }

    pub fn script_error(self, urn: &str, body: &str) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(urn.to_string(), VecDeque::from([Err(body.to_string())]));
        self
    }

    /// Uploads succeed with this urn
    pub fn accept_uploads_as(self, urn: &str) -> Self {
        *self.upload_result.lock().unwrap() = Some(urn.to_string());
        self
    }

    pub fn add_model(&self, urn: &str, name: &str) {
        self.models
            .lock()
            .unwrap()
            .get_or_insert_with(Vec::new)
            .push(ModelSummary {
                urn: model(urn),
                name: name.to_string(),
            });
    }

    pub fn status_calls(&self, urn: &str) -> usize {
        self.status_calls
            .lock()
            .unwrap()
            .get(urn)
            .copied()
            .unwrap_or(0)
    }

    pub fn uploads(&self) -> Vec<ModelUpload> {
        self.uploads.lock().unwrap().clone()
    }

    fn next_status(&self, urn: &str) -> Result<StatusPayload, ApiError> {
        *self
            .status_calls
            .lock()
            .unwrap()
            .entry(urn.to_string())
            .or_insert(0) += 1;

        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts.get_mut(urn);
        let next = match script {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        match next {
            Some(Ok(payload)) => Ok(payload),
            Some(Err(body)) => Err(ApiError::Status { status: 503, body }),
            None => Err(ApiError::Status {
                status: 404,
                body: format!("unknown model {}", urn),
            }),
        }
    }
}

impl ModelApi for ScriptedApi {
    fn list_models(&self) -> BoxFuture<'_, Result<Vec<ModelSummary>, ApiError>> {
        let result = self.models.lock().unwrap().clone().ok_or(ApiError::Status {
            status: 500,
            body: "listing unavailable".to_string(),
        });
        futures_util::future::ready(result).boxed()
    }

    fn upload_model(&self, upload: ModelUpload) -> BoxFuture<'_, Result<ModelRef, ApiError>> {
        self.uploads.lock().unwrap().push(upload.clone());
        let result = match self.upload_result.lock().unwrap().clone() {
            Some(urn) => {
                self.add_model(&urn, &upload.file_name);
                Ok(model(&urn))
            }
            None => Err(ApiError::Status {
                status: 413,
                body: "upload rejected".to_string(),
            }),
        };
        futures_util::future::ready(result).boxed()
    }

    fn model_status<'a>(
        &'a self,
        model: &'a ModelRef,
    ) -> BoxFuture<'a, Result<StatusPayload, ApiError>> {
        futures_util::future::ready(self.next_status(model.as_str())).boxed()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shown {
    Notice(Notice),
    Cleared,
    Alert(String),
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub log: Mutex<Vec<Shown>>,
}

impl RecordingNotifier {
    pub fn entries(&self) -> Vec<Shown> {
        self.log.lock().unwrap().clone()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|s| match s {
                Shown::Alert(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.entries()
            .into_iter()
            .filter_map(|s| match s {
                Shown::Notice(notice) => Some(notice),
                _ => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn show(&self, notice: &Notice) {
        self.log.lock().unwrap().push(Shown::Notice(notice.clone()));
    }

    fn clear(&self) {
        self.log.lock().unwrap().push(Shown::Cleared);
    }

    fn alert(&self, message: &str) {
        self.log.lock().unwrap().push(Shown::Alert(message.to_string()));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlCall {
    Bind(FramebufferId),
    Viewport(Viewport),
    Clear([f32; 4]),
    DepthTest,
    Redraw,
}

#[derive(Default)]
pub struct RecordingGraphics {
    pub calls: Mutex<Vec<GlCall>>,
}

impl RecordingGraphics {
    pub fn calls(&self) -> Vec<GlCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn redraws(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, GlCall::Redraw))
            .count()
    }
}

impl GraphicsContext for RecordingGraphics {
    fn bind_framebuffer(&self, framebuffer: FramebufferId) {
        self.calls.lock().unwrap().push(GlCall::Bind(framebuffer));
    }

    fn set_viewport(&self, viewport: Viewport) {
        self.calls.lock().unwrap().push(GlCall::Viewport(viewport));
    }

    fn clear(&self, color: [f32; 4]) {
        self.calls.lock().unwrap().push(GlCall::Clear(color));
    }

    fn enable_depth_test(&self) {
        self.calls.lock().unwrap().push(GlCall::DepthTest);
    }

    fn redraw(&self) {
        self.calls.lock().unwrap().push(GlCall::Redraw);
    }
}

/// Stereo pose with side-by-side eyes on a 2000x1000 target
pub fn stereo_pose() -> ViewerPose {
    ViewerPose {
        views: vec![
            View {
                eye: Eye::Left,
                viewport: Viewport::new(0, 0, 1000, 1000),
            },
            View {
                eye: Eye::Right,
                viewport: Viewport::new(1000, 0, 1000, 1000),
            },
        ],
    }
}

pub struct FakeFrame {
    time: f64,
    pose: Option<ViewerPose>,
}

impl XrFrame for FakeFrame {
    fn time(&self) -> f64 {
        self.time
    }

    fn viewer_pose(&self, _space: &ReferenceSpace) -> Option<ViewerPose> {
        self.pose.clone()
    }
}

pub struct FakeSession {
    pub id: u64,
    frames_tx: mpsc::UnboundedSender<FakeFrame>,
    frames_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FakeFrame>>,
    ended_tx: watch::Sender<bool>,
    end_calls: AtomicUsize,
    frame_clock: AtomicU64,
    reference_space: Result<(), String>,
    hang_reference_space: bool,
}

impl FakeSession {
    fn new(id: u64, reference_space: Result<(), String>, hang_reference_space: bool) -> Self {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (ended_tx, _) = watch::channel(false);
        Self {
            id,
            frames_tx,
            frames_rx: tokio::sync::Mutex::new(frames_rx),
            ended_tx,
            end_calls: AtomicUsize::new(0),
            frame_clock: AtomicU64::new(0),
            reference_space,
            hang_reference_space,
        }
    }

    pub fn push_frame(&self, pose: Option<ViewerPose>) {
        let tick = self.frame_clock.fetch_add(1, Ordering::SeqCst);
        let _ = self.frames_tx.send(FakeFrame {
            time: tick as f64 * 11.1,
            pose,
        });
    }

    /// End the session from the device side
    pub fn device_end(&self) {
        self.ended_tx.send_replace(true);
    }

    pub fn is_ended(&self) -> bool {
        *self.ended_tx.borrow()
    }

    pub fn end_calls(&self) -> usize {
        self.end_calls.load(Ordering::SeqCst)
    }
}

impl XrSession for FakeSession {
    fn request_reference_space(
        &self,
        kind: ReferenceSpaceKind,
    ) -> BoxFuture<'_, Result<ReferenceSpace, XrError>> {
        if self.hang_reference_space {
            return futures_util::future::pending().boxed();
        }
        let result = self
            .reference_space
            .clone()
            .map(|_| ReferenceSpace {
                kind,
                handle: self.id,
            })
            .map_err(XrError::Rejected);
        futures_util::future::ready(result).boxed()
    }

    fn next_frame(&self) -> BoxFuture<'_, Option<Box<dyn XrFrame>>> {
        async move {
            let mut ended = self.ended_tx.subscribe();
            let mut frames = self.frames_rx.lock().await;
            tokio::select! {
                frame = frames.recv() => frame.map(|f| Box::new(f) as Box<dyn XrFrame>),
                _ = ended.wait_for(|ended| *ended) => None,
            }
        }
        .boxed()
    }

    fn ended(&self) -> BoxFuture<'_, ()> {
        async move {
            let mut ended = self.ended_tx.subscribe();
            let _ = ended.wait_for(|ended| *ended).await;
        }
        .boxed()
    }

    fn end(&self) -> BoxFuture<'_, Result<(), XrError>> {
        self.end_calls.fetch_add(1, Ordering::SeqCst);
        let was_ended = self.ended_tx.send_replace(true);
        let result = if was_ended { Err(XrError::AlreadyEnded) } else { Ok(()) };
        futures_util::future::ready(result).boxed()
    }

    fn framebuffer(&self) -> FramebufferId {
        FramebufferId(self.id as u32)
    }
}

/// Scriptable immersive device
pub struct FakeXr {
    pub available: bool,
    pub supported: Result<bool, String>,
    pub grant: Result<(), String>,
    pub hang_request: bool,
    pub reference_space: Result<(), String>,
    pub hang_reference_space: bool,
    pub sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl Default for FakeXr {
    fn default() -> Self {
        Self {
            available: true,
            supported: Ok(true),
            grant: Ok(()),
            hang_request: false,
            reference_space: Ok(()),
            hang_reference_space: false,
            sessions: Mutex::new(Vec::new()),
        }
    }
}

impl FakeXr {
    pub fn sessions(&self) -> Vec<Arc<FakeSession>> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn live_sessions(&self) -> usize {
        self.sessions().iter().filter(|s| !s.is_ended()).count()
    }
}

impl XrSystem for FakeXr {
    fn is_available(&self) -> bool {
        self.available
    }

    fn is_session_supported(&self, _mode: SessionMode) -> BoxFuture<'_, Result<bool, XrError>> {
        futures_util::future::ready(self.supported.clone().map_err(XrError::Rejected)).boxed()
    }

    fn request_session(
        &self,
        _mode: SessionMode,
    ) -> BoxFuture<'_, Result<Arc<dyn XrSession>, XrError>> {
        if self.hang_request {
            return futures_util::future::pending().boxed();
        }
        let result = match &self.grant {
            Ok(()) => {
                let mut sessions = self.sessions.lock().unwrap();
                let session = Arc::new(FakeSession::new(
                    sessions.len() as u64 + 1,
                    self.reference_space.clone(),
                    self.hang_reference_space,
                ));
                sessions.push(session.clone());
                Ok(session as Arc<dyn XrSession>)
            }
            Err(reason) => Err(XrError::Rejected(reason.clone())),
        };
        futures_util::future::ready(result).boxed()
    }
}

/// Scene engine whose loads of selected models take a while
pub struct SlowScene {
    scene: Arc<MemoryScene>,
    delays: HashMap<ModelRef, Duration>,
}

impl SlowScene {
    pub fn new(scene: Arc<MemoryScene>) -> Self {
        Self {
            scene,
            delays: HashMap::new(),
        }
    }

    pub fn delay(mut self, urn: &str, delay: Duration) -> Self {
        self.delays.insert(model(urn), delay);
        self
    }
}

impl SceneEngine for SlowScene {
    fn load_model<'a>(&'a self, model: &'a ModelRef) -> BoxFuture<'a, Result<(), SceneError>> {
        let delay = self.delays.get(model).copied();
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.scene.load_model(model).await
        }
        .boxed()
    }

    fn search<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<ObjectId>, SceneError>> {
        self.scene.search(name)
    }

    fn enumerate_fragments(
        &self,
        object: ObjectId,
        recursive: bool,
    ) -> BoxFuture<'_, Result<Vec<FragmentId>, SceneError>> {
        self.scene.enumerate_fragments(object, recursive)
    }

    fn world_matrix(&self, fragment: FragmentId) -> Option<Mat4> {
        self.scene.world_matrix(fragment)
    }

    fn world_to_screen(&self, world: Vec3) -> Option<ScreenPoint> {
        self.scene.world_to_screen(world)
    }

    fn load_extension<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), SceneError>> {
        self.scene.load_extension(name)
    }

    fn commit_markers(&self, batch: MarkerBatch) -> BoxFuture<'_, Result<(), SceneError>> {
        self.scene.commit_markers(batch)
    }

    fn set_marker_visible(&self, object: ObjectId, visible: bool) {
        self.scene.set_marker_visible(object, visible)
    }

    fn subscribe_selection(&self) -> broadcast::Receiver<Vec<ObjectId>> {
        self.scene.subscribe_selection()
    }

    fn install_controls(&self, group: &ControlGroup) -> bool {
        self.scene.install_controls(group)
    }
}
