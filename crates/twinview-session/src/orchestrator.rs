//! Viewer session orchestration
//!
//! Selecting a model polls its translation status until it is ready, then
//! loads the scene, discovers the catalog sensors, places their markers and
//! tooltips and brings back the auxiliary panels. The orchestrator also owns
//! the toolbar actions (panels, immersive mode), model listing and upload.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use twinview_client::{ApiError, ModelApi};
use twinview_core::{
    Diagnostic, ModelRef, ModelSummary, ModelUpload, ObjectId, SensorCatalog, TranslationStatus,
};

use crate::controls::{ControlGroup, ViewerAction};
use crate::engine::{SceneEngine, SceneError};
use crate::immersive::{ImmersiveConfig, ImmersiveController, ImmersiveError, ImmersiveState};
use crate::notify::{AddressBar, Notice, Notifier};
use crate::overlay::{OverlayConfig, OverlayMarker, OverlayPlacer, TooltipPanel};
use crate::panels::{AuxPanels, PanelKind, PanelSettings, PanelView};
use crate::poller::{PollError, PollOutcome, PollerConfig, StatusPoller};
use crate::scene_query::{QueryMiss, SceneQuery};
use crate::xr::{GraphicsContext, XrSystem};

const LIST_FAILED: &str = "Could not list models. See the log for more details.";
const LOAD_FAILED: &str = "Could not load model. See the log for more details.";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Immersive(#[from] ImmersiveError),
    #[error("Archive {0} needs the path of its main design")]
    MissingArchiveEntry(String),
    #[error("An upload is already in progress")]
    UploadInProgress,
}

/// External collaborators of a session
#[derive(Clone)]
pub struct Collaborators {
    pub api: Arc<dyn ModelApi>,
    pub engine: Arc<dyn SceneEngine>,
    pub xr: Arc<dyn XrSystem>,
    pub graphics: Arc<dyn GraphicsContext>,
    pub notifier: Arc<dyn Notifier>,
    pub address: Arc<dyn AddressBar>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub poller: PollerConfig,
    pub overlay: OverlayConfig,
    pub immersive: ImmersiveConfig,
    pub catalog: SensorCatalog,
    pub dashboard: PanelSettings,
    pub sri: PanelSettings,
    /// Delay between toolbar installation attempts
    pub toolbar_retry: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poller: PollerConfig::default(),
            overlay: OverlayConfig::default(),
            immersive: ImmersiveConfig::default(),
            catalog: SensorCatalog::default(),
            dashboard: PanelSettings::dashboard(),
            sri: PanelSettings::sri(),
            toolbar_retry: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    Idle,
    Polling,
    Loading,
    Ready,
    NotTranslated,
    Failed,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ModelsListed(Vec<ModelSummary>),
    ModelSelected(ModelRef),
    Status {
        model: ModelRef,
        status: TranslationStatus,
    },
    SceneReady {
        model: ModelRef,
        sensors: usize,
    },
    PanelsChanged(Vec<PanelView>),
    TooltipChanged(Option<TooltipPanel>),
    UploadStateChanged {
        uploading: bool,
    },
}

/// How a model selection ended
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOutcome {
    Loaded {
        sensors: usize,
        misses: Vec<QueryMiss>,
    },
    TranslationFailed(Vec<Diagnostic>),
    NotTranslated,
    /// A newer selection took over
    Superseded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub models: Vec<ModelSummary>,
    pub selected: Option<ModelRef>,
    pub phase: SessionPhase,
    pub panels: Vec<PanelView>,
    pub uploading: bool,
    pub tooltip: Option<TooltipPanel>,
    pub markers: Vec<OverlayMarker>,
    pub immersive: ImmersiveState,
}

struct SessionState {
    models: Vec<ModelSummary>,
    selected: Option<ModelRef>,
    phase: SessionPhase,
    panels: AuxPanels,
    uploading: bool,
    /// Bumped on every selection; stale loads compare against it
    load_generation: u64,
}

pub struct SessionOrchestrator {
    api: Arc<dyn ModelApi>,
    engine: Arc<dyn SceneEngine>,
    notifier: Arc<dyn Notifier>,
    address: Arc<dyn AddressBar>,
    toolbar_retry: Duration,
    poller: StatusPoller,
    query: SceneQuery,
    overlay: OverlayPlacer,
    immersive: ImmersiveController,
    state: RwLock<SessionState>,
    /// Held for a whole scene load; the engine shows one model at a time
    loading: AsyncMutex<()>,
    events: broadcast::Sender<SessionEvent>,
    controls_requested: AtomicBool,
    controls_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionOrchestrator {
    pub fn new(collaborators: Collaborators, config: SessionConfig) -> Self {
        let Collaborators {
            api,
            engine,
            xr,
            graphics,
            notifier,
            address,
        } = collaborators;
        let (events, _) = broadcast::channel(100);

        Self {
            poller: StatusPoller::new(api.clone(), config.poller),
            query: SceneQuery::new(engine.clone()),
            overlay: OverlayPlacer::new(engine.clone(), config.catalog, config.overlay),
            immersive: ImmersiveController::new(xr, graphics, notifier.clone(), config.immersive),
            state: RwLock::new(SessionState {
                models: Vec::new(),
                selected: None,
                phase: SessionPhase::Idle,
                panels: AuxPanels::new(config.dashboard, config.sri),
                uploading: false,
                load_generation: 0,
            }),
            loading: AsyncMutex::new(()),
            events,
            controls_requested: AtomicBool::new(false),
            controls_task: Mutex::new(None),
            toolbar_retry: config.toolbar_retry,
            api,
            engine,
            notifier,
            address,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn immersive(&self) -> &ImmersiveController {
        &self.immersive
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// List models and select the one named by the address bar, if listed
    pub async fn start(&self) -> Result<Option<SelectionOutcome>, SessionError> {
        let preferred = self
            .address
            .fragment()
            .and_then(|f| ModelRef::from_url_fragment(&f));
        if let Some(model) = &preferred {
            info!(model = %model, "Restoring selection from address bar");
        }
        self.ensure_controls();
        self.refresh_models(preferred).await
    }

    /// Re-list models, then select `preferred` if listed, else the first model
    pub async fn refresh_models(
        &self,
        preferred: Option<ModelRef>,
    ) -> Result<Option<SelectionOutcome>, SessionError> {
        let models = match self.api.list_models().await {
            Ok(models) => models,
            Err(e) => {
                error!("Failed to list models: {}", e);
                self.notifier.alert(LIST_FAILED);
                return Err(e.into());
            }
        };
        info!(count = models.len(), "Models listed");

        let choice = preferred
            .filter(|p| models.iter().any(|m| &m.urn == p))
            .or_else(|| models.first().map(|m| m.urn.clone()));
        self.state.write().await.models = models.clone();
        self.emit(SessionEvent::ModelsListed(models));

        match choice {
            Some(model) => self.select_model(model).await.map(Some),
            None => {
                debug!("No models to select");
                Ok(None)
            }
        }
    }

    /// Select a model: poll until translated, then load its scene
    pub async fn select_model(&self, model: ModelRef) -> Result<SelectionOutcome, SessionError> {
        let generation = {
            let mut state = self.state.write().await;
            if state.uploading {
                return Err(SessionError::UploadInProgress);
            }
            state.panels.unmount();
            state.selected = Some(model.clone());
            state.phase = SessionPhase::Polling;
            state.load_generation += 1;
            state.load_generation
        };
        self.emit(SessionEvent::PanelsChanged(Vec::new()));
        self.emit(SessionEvent::ModelSelected(model.clone()));
        self.address.set_fragment(&model.to_url_fragment());
        info!(model = %model, "Model selected");

        let result = self
            .poller
            .poll_until_terminal(&model, |status| {
                if let Some(notice) = Notice::for_status(status) {
                    self.notifier.show(&notice);
                }
                self.emit(SessionEvent::Status {
                    model: model.clone(),
                    status: status.clone(),
                });
            })
            .await;

        match result {
            Ok(PollOutcome::Ready) => {
                self.notifier.clear();
                self.emit(SessionEvent::Status {
                    model: model.clone(),
                    status: TranslationStatus::Ready,
                });
                self.load_scene(&model, generation).await
            }
            Ok(PollOutcome::Failed(messages)) => {
                self.set_phase(generation, SessionPhase::Failed).await;
                Ok(SelectionOutcome::TranslationFailed(messages))
            }
            Ok(PollOutcome::NotStarted) => {
                self.set_phase(generation, SessionPhase::NotTranslated).await;
                Ok(SelectionOutcome::NotTranslated)
            }
            Ok(PollOutcome::Superseded) => Ok(SelectionOutcome::Superseded),
            Err(e) => {
                error!(model = %model, "Could not poll model status: {}", e);
                if self.set_phase(generation, SessionPhase::Error).await {
                    self.notifier.alert(LOAD_FAILED);
                }
                Err(e.into())
            }
        }
    }

    /// Update the phase if `generation` is still the current selection
    async fn set_phase(&self, generation: u64, phase: SessionPhase) -> bool {
        let mut state = self.state.write().await;
        if state.load_generation != generation {
            return false;
        }
        state.phase = phase;
        true
    }

    async fn is_current(&self, generation: u64) -> bool {
        self.state.read().await.load_generation == generation
    }

    async fn load_scene(
        &self,
        model: &ModelRef,
        generation: u64,
    ) -> Result<SelectionOutcome, SessionError> {
        let _loading = self.loading.lock().await;
        if !self.set_phase(generation, SessionPhase::Loading).await {
            debug!(model = %model, "Skipping scene load of a replaced selection");
            return Ok(SelectionOutcome::Superseded);
        }
        if let Err(e) = self.engine.load_model(model).await {
            error!(model = %model, "Could not load scene: {}", e);
            if self.set_phase(generation, SessionPhase::Error).await {
                self.notifier.alert(LOAD_FAILED);
            }
            return Err(e.into());
        }
        if !self.is_current(generation).await {
            return Ok(SelectionOutcome::Superseded);
        }

        let scope = self.overlay.begin_scope().await;
        self.emit(SessionEvent::TooltipChanged(None));
        let report = self.query.discover(&self.overlay.catalog().queries()).await;
        if !self.is_current(generation).await {
            return Ok(SelectionOutcome::Superseded);
        }
        for sensor in &report.resolved {
            self.overlay.place_sensor(scope, sensor).await;
        }
        let shown = self.overlay.commit(scope).await;

        let views = {
            let mut state = self.state.write().await;
            if state.load_generation != generation {
                return Ok(SelectionOutcome::Superseded);
            }
            state.panels.mount();
            state.phase = SessionPhase::Ready;
            state.panels.views()
        };
        self.emit(SessionEvent::PanelsChanged(views));
        self.emit(SessionEvent::SceneReady {
            model: model.clone(),
            sensors: report.resolved.len(),
        });
        info!(
            model = %model,
            sensors = report.resolved.len(),
            markers = shown,
            misses = report.misses.len(),
            "Scene ready"
        );
        self.ensure_controls();

        Ok(SelectionOutcome::Loaded {
            sensors: report.resolved.len(),
            misses: report.misses,
        })
    }

    /// Upload a model, then list models again and select the new one
    pub async fn upload(
        &self,
        upload: ModelUpload,
    ) -> Result<Option<SelectionOutcome>, SessionError> {
        if upload.needs_archive_entry() {
            warn!(file = %upload.file_name, "Archive upload without main design path");
            return Err(SessionError::MissingArchiveEntry(upload.file_name));
        }
        {
            let mut state = self.state.write().await;
            if state.uploading {
                return Err(SessionError::UploadInProgress);
            }
            state.uploading = true;
        }
        self.emit(SessionEvent::UploadStateChanged { uploading: true });

        let file_name = upload.file_name.clone();
        self.notifier.show(&Notice::Uploading {
            file_name: file_name.clone(),
        });
        info!(file = %file_name, bytes = upload.bytes.len(), "Uploading model");
        let result = self.api.upload_model(upload).await;

        self.notifier.clear();
        self.state.write().await.uploading = false;
        self.emit(SessionEvent::UploadStateChanged { uploading: false });

        match result {
            Ok(model) => {
                info!(file = %file_name, model = %model, "Model uploaded");
                self.refresh_models(Some(model)).await
            }
            Err(e) => {
                error!(file = %file_name, "Upload failed: {}", e);
                self.notifier.alert(&format!(
                    "Could not upload model {}. See the log for more details.",
                    file_name
                ));
                Err(e.into())
            }
        }
    }

    /// Toolbar button handler
    pub async fn handle_action(&self, action: ViewerAction) -> Result<(), SessionError> {
        let kind = match action {
            ViewerAction::ToggleDashboard => PanelKind::Dashboard,
            ViewerAction::ToggleSri => PanelKind::SriPlatform,
            ViewerAction::ToggleImmersive => {
                return match self.immersive.toggle().await {
                    Ok(state) => {
                        debug!(state = ?state, "Immersive toggled");
                        Ok(())
                    }
                    Err(ImmersiveError::Superseded) => Ok(()),
                    Err(e) => Err(e.into()),
                };
            }
        };

        let views = {
            let mut state = self.state.write().await;
            state.panels.toggle(kind).map(|_| state.panels.views())
        };
        if let Some(views) = views {
            self.emit(SessionEvent::PanelsChanged(views));
        }
        Ok(())
    }

    /// Selection-changed event from the engine
    pub async fn handle_selection(&self, selected: &[ObjectId]) {
        if let Some(panel) = self.overlay.handle_selection(selected).await {
            self.emit(SessionEvent::TooltipChanged(Some(panel)));
        }
    }

    /// Click anywhere in the document
    pub async fn handle_document_click(&self, inside_tooltip: bool) {
        if self.overlay.handle_document_click(inside_tooltip).await {
            self.emit(SessionEvent::TooltipChanged(None));
        }
    }

    /// Forward engine selection events to [`Self::handle_selection`].
    /// The task stops at the first event after the session is dropped.
    pub fn spawn_selection_forwarder(self: &Arc<Self>) -> JoinHandle<()> {
        let mut selections = self.engine.subscribe_selection();
        let session = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match selections.recv().await {
                    Ok(selected) => {
                        let Some(session) = session.upgrade() else {
                            debug!("Session dropped, stopping selection forwarder");
                            break;
                        };
                        session.handle_selection(&selected).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Selection forwarder lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Install the toolbar controls, retrying until the toolbar exists.
    /// Only the first call has an effect.
    fn ensure_controls(&self) {
        if self.controls_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        let engine = self.engine.clone();
        let retry = self.toolbar_retry;
        let task = tokio::spawn(async move {
            let group = ControlGroup::viewer_controls();
            let mut attempts = 1u32;
            while !engine.install_controls(&group) {
                debug!(attempts, "Toolbar not available yet");
                tokio::time::sleep(retry).await;
                attempts += 1;
            }
            info!(group = %group.id, attempts, "Toolbar controls installed");
        });
        *self
            .controls_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let (models, selected, phase, panels, uploading) = {
            let state = self.state.read().await;
            (
                state.models.clone(),
                state.selected.clone(),
                state.phase,
                state.panels.views(),
                state.uploading,
            )
        };
        SessionSnapshot {
            models,
            selected,
            phase,
            panels,
            uploading,
            tooltip: self.overlay.tooltip().await,
            markers: self.overlay.markers().await,
            immersive: self.immersive.state().await,
        }
    }

    /// Selection listeners of the current model load
    pub async fn listener_count(&self) -> usize {
        self.overlay.listener_count().await
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        if let Some(task) = self
            .controls_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FragmentNode, MemoryScene, ObjectNode, SceneManifest};
    use crate::notify::MemoryAddressBar;
    use crate::testing::{
        failed, in_progress, model, not_started, ready, wait_until, FakeXr, RecordingGraphics,
        RecordingNotifier, ScriptedApi, Shown, SlowScene,
    };
    use twinview_core::{FragmentId, TooltipTemplate};

    struct Harness {
        api: Arc<ScriptedApi>,
        scene: Arc<MemoryScene>,
        notifier: Arc<RecordingNotifier>,
        address: Arc<MemoryAddressBar>,
        xr: Arc<FakeXr>,
        session: Arc<SessionOrchestrator>,
    }

    fn sensors_manifest(offset: f32) -> SceneManifest {
        let object = |id: u32, name: &str, fragments: &[(u32, f32)]| ObjectNode {
            id: ObjectId(id),
            name: name.to_string(),
            fragments: fragments
                .iter()
                .map(|(f, x)| FragmentNode {
                    id: FragmentId(*f),
                    translation: Some([*x + offset, 0.0, 0.0]),
                    matrix: None,
                })
                .collect(),
            children: vec![],
        };
        SceneManifest {
            object: vec![
                object(1, "Milesight Air quality sensor", &[(10, 1.0)]),
                object(2, "Milesight Air quality sensor", &[(20, 2.0), (21, 3.0)]),
                object(3, "Onset [688241]", &[(30, 4.0)]),
                object(471651, "Onset [689637]", &[(40, 5.0)]),
            ],
            ..SceneManifest::default()
        }
    }

    fn harness(api: ScriptedApi, fragment: Option<&str>) -> Harness {
        let api = Arc::new(api);
        let scene = Arc::new(MemoryScene::new());
        scene.insert(model("a"), sensors_manifest(0.0));
        scene.insert(model("b"), sensors_manifest(100.0));
        let notifier = Arc::new(RecordingNotifier::default());
        let address = Arc::new(MemoryAddressBar::new(fragment.map(str::to_string)));
        let xr = Arc::new(FakeXr::default());
        let session = Arc::new(SessionOrchestrator::new(
            Collaborators {
                api: api.clone(),
                engine: scene.clone(),
                xr: xr.clone(),
                graphics: Arc::new(RecordingGraphics::default()),
                notifier: notifier.clone(),
                address: address.clone(),
            },
            SessionConfig::default(),
        ));
        Harness {
            api,
            scene,
            notifier,
            address,
            xr,
            session,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_start_restores_address_fragment() {
        let h = harness(
            ScriptedApi::new()
                .with_models(&[("a", "Office"), ("b", "Campus")])
                .script("b", vec![ready()]),
            Some("#b"),
        );

        let outcome = h.session.start().await.unwrap().unwrap();
        match outcome {
            SelectionOutcome::Loaded { sensors, misses } => {
                assert_eq!(sensors, 5);
                assert_eq!(misses.len(), 2);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(h.scene.loaded_model(), Some(model("b")));
        assert_eq!(h.address.fragment().as_deref(), Some("#b"));
        assert_eq!(h.api.status_calls("a"), 0);

        let snapshot = h.session.snapshot().await;
        assert_eq!(snapshot.selected, Some(model("b")));
        assert_eq!(snapshot.phase, SessionPhase::Ready);
        assert_eq!(snapshot.models.len(), 2);
        assert_eq!(snapshot.panels.len(), 2);
        assert_eq!(snapshot.markers.len(), 5);
        let hidden = snapshot
            .markers
            .iter()
            .find(|m| m.object_id == ObjectId(471651))
            .unwrap();
        assert!(!hidden.visible);
        assert_eq!(h.scene.commits().len(), 1);
    }

    #[tokio::test]
    async fn test_unlisted_fragment_selects_first_model() {
        let h = harness(
            ScriptedApi::new()
                .with_models(&[("a", "Office"), ("b", "Campus")])
                .script("a", vec![ready()]),
            Some("#gone"),
        );
        h.session.start().await.unwrap();
        assert_eq!(h.scene.loaded_model(), Some(model("a")));
        assert_eq!(h.address.fragment().as_deref(), Some("#a"));
    }

    #[tokio::test]
    async fn test_list_failure_alerts() {
        let h = harness(ScriptedApi::new(), None);
        let err = h.session.start().await.unwrap_err();
        assert!(matches!(err, SessionError::Api(_)));
        assert_eq!(h.notifier.alerts(), vec![LIST_FAILED.to_string()]);
        assert_eq!(h.session.snapshot().await.phase, SessionPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_notices_then_load() {
        let h = harness(
            ScriptedApi::new()
                .with_models(&[("a", "Office")])
                .script("a", vec![in_progress("10%"), in_progress("60%"), ready()]),
            None,
        );
        let mut events = h.session.subscribe();

        h.session.start().await.unwrap();

        assert_eq!(
            h.notifier.entries(),
            vec![
                Shown::Notice(Notice::Translating {
                    progress: "10%".to_string()
                }),
                Shown::Notice(Notice::Translating {
                    progress: "60%".to_string()
                }),
                Shown::Cleared,
            ]
        );
        let statuses: Vec<TranslationStatus> = drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Status { status, .. } => Some(status),
                _ => None,
            })
            .collect();
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses[2], TranslationStatus::Ready);
        assert_eq!(h.api.status_calls("a"), 3);
        assert_eq!(h.session.snapshot().await.phase, SessionPhase::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_translation_does_not_load() {
        let h = harness(
            ScriptedApi::new()
                .with_models(&[("a", "Office")])
                .script("a", vec![failed(&["E1"])]),
            None,
        );
        let outcome = h.session.start().await.unwrap().unwrap();
        assert!(matches!(outcome, SelectionOutcome::TranslationFailed(ref m) if m.len() == 1));
        assert_eq!(h.scene.loaded_model(), None);
        assert_eq!(h.session.snapshot().await.phase, SessionPhase::Failed);
        assert!(matches!(
            h.notifier.notices()[0],
            Notice::TranslationFailed { .. }
        ));
        assert!(h.notifier.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_not_translated_is_reported() {
        let h = harness(
            ScriptedApi::new()
                .with_models(&[("a", "Office")])
                .script("a", vec![not_started()]),
            None,
        );
        let outcome = h.session.start().await.unwrap().unwrap();
        assert_eq!(outcome, SelectionOutcome::NotTranslated);
        assert_eq!(h.notifier.notices(), vec![Notice::NotTranslated]);
        assert_eq!(h.session.snapshot().await.phase, SessionPhase::NotTranslated);
    }

    #[tokio::test]
    async fn test_status_failure_alerts() {
        let h = harness(
            ScriptedApi::new()
                .with_models(&[("a", "Office")])
                .script_error("a", "backend down"),
            None,
        );
        let err = h.session.start().await.unwrap_err();
        assert!(matches!(err, SessionError::Poll(PollError::Transport(_))));
        assert_eq!(h.notifier.alerts(), vec![LOAD_FAILED.to_string()]);
        assert_eq!(h.session.snapshot().await.phase, SessionPhase::Error);
    }

    #[tokio::test]
    async fn test_scene_load_failure_alerts() {
        let h = harness(
            ScriptedApi::new()
                .with_models(&[("c", "Unregistered")])
                .script("c", vec![ready()]),
            None,
        );
        let err = h.session.start().await.unwrap_err();
        assert!(matches!(err, SessionError::Scene(SceneError::LoadFailed { .. })));
        assert_eq!(h.notifier.alerts(), vec![LOAD_FAILED.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_selection_supersedes_pending_poll() {
        let h = harness(
            ScriptedApi::new()
                .with_models(&[("a", "Office"), ("b", "Campus")])
                .script("a", vec![in_progress("10%")])
                .script("b", vec![ready()]),
            None,
        );
        let pending = {
            let session = h.session.clone();
            tokio::spawn(async move { session.select_model(model("a")).await })
        };
        wait_until(|| h.api.status_calls("a") == 1).await;

        let outcome = h.session.select_model(model("b")).await.unwrap();
        assert!(matches!(outcome, SelectionOutcome::Loaded { .. }));
        assert_eq!(pending.await.unwrap().unwrap(), SelectionOutcome::Superseded);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.api.status_calls("a"), 1);
        assert_eq!(h.scene.loaded_model(), Some(model("b")));
        let snapshot = h.session.snapshot().await;
        assert_eq!(snapshot.selected, Some(model("b")));
        assert_eq!(snapshot.phase, SessionPhase::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_stale_load_does_not_replace_newer_scene() {
        let scene = Arc::new(MemoryScene::new());
        scene.insert(model("a"), sensors_manifest(0.0));
        scene.insert(model("b"), sensors_manifest(100.0));
        let session = Arc::new(SessionOrchestrator::new(
            Collaborators {
                api: Arc::new(
                    ScriptedApi::new()
                        .with_models(&[("a", "Office"), ("b", "Campus")])
                        .script("a", vec![ready()])
                        .script("b", vec![ready()]),
                ),
                engine: Arc::new(
                    SlowScene::new(scene.clone()).delay("a", Duration::from_secs(10)),
                ),
                xr: Arc::new(FakeXr::default()),
                graphics: Arc::new(RecordingGraphics::default()),
                notifier: Arc::new(RecordingNotifier::default()),
                address: Arc::new(MemoryAddressBar::new(None)),
            },
            SessionConfig::default(),
        ));

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.select_model(model("a")).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        let outcome = session.select_model(model("b")).await.unwrap();
        assert!(matches!(outcome, SelectionOutcome::Loaded { sensors: 5, .. }));
        assert_eq!(pending.await.unwrap().unwrap(), SelectionOutcome::Superseded);

        assert_eq!(scene.loaded_model(), Some(model("b")));
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.selected, Some(model("b")));
        assert_eq!(snapshot.phase, SessionPhase::Ready);
        assert_eq!(snapshot.markers.len(), 5);
        assert!(snapshot.markers.iter().all(|m| m.world_position.x > 100.0));
    }

    #[tokio::test]
    async fn test_selection_forwarder_does_not_keep_session_alive() {
        let h = harness(ScriptedApi::new(), None);
        let forwarder = h.session.spawn_selection_forwarder();
        let weak = Arc::downgrade(&h.session);

        let Harness { session, scene, .. } = h;
        drop(session);
        assert!(weak.upgrade().is_none());

        scene.select(vec![ObjectId(1)]);
        tokio::time::timeout(Duration::from_secs(2), forwarder)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_panel_visibility_survives_model_change() {
        let h = harness(
            ScriptedApi::new()
                .with_models(&[("a", "Office"), ("b", "Campus")])
                .script("a", vec![ready()])
                .script("b", vec![ready()]),
            None,
        );
        let mut events = h.session.subscribe();

        h.session.handle_action(ViewerAction::ToggleDashboard).await.unwrap();
        assert!(drain(&mut events).is_empty());

        h.session.start().await.unwrap();
        h.session.handle_action(ViewerAction::ToggleDashboard).await.unwrap();
        let panels = h.session.snapshot().await.panels;
        assert!(panels[0].visible);
        assert!(!panels[1].visible);

        drain(&mut events);
        h.session.select_model(model("b")).await.unwrap();
        let panel_events: Vec<Vec<PanelView>> = drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::PanelsChanged(views) => Some(views),
                _ => None,
            })
            .collect();
        assert_eq!(panel_events.len(), 2);
        assert!(panel_events[0].is_empty());
        assert!(panel_events[1][0].visible);
        assert!(!panel_events[1][1].visible);
    }

    #[tokio::test]
    async fn test_listeners_scoped_to_model_load() {
        let h = harness(
            ScriptedApi::new()
                .with_models(&[("a", "Office"), ("b", "Campus")])
                .script("a", vec![ready()])
                .script("b", vec![ready()]),
            None,
        );
        h.session.select_model(model("a")).await.unwrap();
        assert_eq!(h.session.listener_count().await, 5);
        h.session.select_model(model("b")).await.unwrap();
        assert_eq!(h.session.listener_count().await, 5);
    }

    #[tokio::test]
    async fn test_selection_events_drive_tooltip() {
        let h = harness(
            ScriptedApi::new()
                .with_models(&[("a", "Office")])
                .script("a", vec![ready()]),
            None,
        );
        h.session.start().await.unwrap();
        let forwarder = h.session.spawn_selection_forwarder();
        let mut events = h.session.subscribe();

        h.scene.select(vec![ObjectId(3)]);
        let session = h.session.clone();
        tokio::time::timeout(Duration::from_secs(2), async {
            while session.snapshot().await.tooltip.is_none() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let tooltip = h.session.snapshot().await.tooltip.unwrap();
        assert_eq!(tooltip.label, "Onset [688241]");
        assert_eq!(tooltip.content, Some(TooltipTemplate::EnergyMeter.content()));

        h.session.handle_document_click(false).await;
        assert_eq!(h.session.snapshot().await.tooltip, None);
        let tooltip_events: Vec<Option<TooltipPanel>> = drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::TooltipChanged(panel) => Some(panel),
                _ => None,
            })
            .collect();
        assert_eq!(tooltip_events.len(), 2);
        assert!(tooltip_events[0].is_some());
        assert!(tooltip_events[1].is_none());
        forwarder.abort();
    }

    #[tokio::test]
    async fn test_upload_selects_new_model() {
        let h = harness(
            ScriptedApi::new()
                .with_models(&[("a", "Office")])
                .accept_uploads_as("b")
                .script("b", vec![ready()]),
            None,
        );

        let outcome = h
            .session
            .upload(ModelUpload::new("campus.rvt", vec![1, 2, 3]))
            .await
            .unwrap();
        assert!(matches!(outcome, Some(SelectionOutcome::Loaded { .. })));
        assert_eq!(h.scene.loaded_model(), Some(model("b")));
        assert_eq!(
            h.notifier.entries()[..2],
            [
                Shown::Notice(Notice::Uploading {
                    file_name: "campus.rvt".to_string()
                }),
                Shown::Cleared,
            ]
        );
        assert!(!h.session.snapshot().await.uploading);
    }

    #[tokio::test]
    async fn test_upload_failures() {
        let h = harness(ScriptedApi::new().with_models(&[("a", "Office")]), None);

        let err = h
            .session
            .upload(ModelUpload::new("site.zip", vec![0]))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::MissingArchiveEntry(ref f) if f == "site.zip"));
        assert!(h.api.uploads().is_empty());

        let err = h
            .session
            .upload(ModelUpload::new("site.zip", vec![0]).with_archive_entry("main.rvt"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Api(_)));
        assert_eq!(h.api.uploads().len(), 1);
        assert_eq!(
            h.notifier.alerts(),
            vec!["Could not upload model site.zip. See the log for more details.".to_string()]
        );
        assert_eq!(
            h.notifier.entries().last(),
            Some(&Shown::Alert(
                "Could not upload model site.zip. See the log for more details.".to_string()
            ))
        );
        assert!(!h.session.snapshot().await.uploading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_controls_installed_once_after_toolbar_appears() {
        let h = harness(
            ScriptedApi::new()
                .with_models(&[("a", "Office")])
                .script("a", vec![ready()]),
            None,
        );
        h.scene.insert(
            model("a"),
            SceneManifest {
                toolbar_ready: false,
                ..sensors_manifest(0.0)
            },
        );

        h.session.start().await.unwrap();
        tokio::task::yield_now().await;
        assert!(h.scene.installed_controls().is_empty());

        h.scene.set_toolbar_ready(true);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(h.scene.installed_controls().len(), 1);

        h.session.select_model(model("a")).await.unwrap();
        h.scene.set_toolbar_ready(true);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.scene.installed_controls().len(), 1);
    }

    #[tokio::test]
    async fn test_immersive_toggle_action() {
        let h = harness(ScriptedApi::new(), None);

        h.session.handle_action(ViewerAction::ToggleImmersive).await.unwrap();
        assert_eq!(h.session.snapshot().await.immersive, ImmersiveState::Active);
        h.session.handle_action(ViewerAction::ToggleImmersive).await.unwrap();
        assert_eq!(h.session.snapshot().await.immersive, ImmersiveState::Idle);
        h.session.handle_action(ViewerAction::ToggleImmersive).await.unwrap();

        assert_eq!(h.xr.sessions().len(), 2);
        assert_eq!(h.xr.live_sessions(), 1);
    }
}
