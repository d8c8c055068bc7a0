//! Immersive (VR) session lifecycle
//!
//! State machine `Idle -> Requesting -> Active -> Ending -> Idle`. Every start
//! bumps a generation counter; negotiation steps that complete for an older
//! generation end whatever they obtained and report `Superseded`. Ending is
//! serialized behind the state lock, so a new start always observes the
//! previous session fully torn down.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::notify::Notifier;
use crate::xr::{
    FramebufferId, GraphicsContext, ReferenceSpace, ReferenceSpaceKind, SessionMode, XrError,
    XrFrame, XrSession, XrSystem,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImmersiveState {
    Idle,
    Requesting,
    Active,
    Ending,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImmersiveError {
    #[error("WebXR not supported by your browser.")]
    CapabilityUnavailable,
    #[error("Immersive VR not supported on this device.")]
    Unsupported,
    #[error("Failed to check XR support. {0}")]
    SupportCheck(XrError),
    #[error("Failed to start XR session. {0}")]
    Negotiation(XrError),
    #[error("Failed to start XR session. {0}")]
    ReferenceSpace(XrError),
    #[error("Failed to start XR session. The {step} did not complete within {timeout:?}")]
    NegotiationTimeout {
        step: &'static str,
        timeout: Duration,
    },
    #[error("Immersive session request was superseded")]
    Superseded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImmersiveConfig {
    /// Upper bound for each negotiation step
    pub negotiation_timeout: Duration,
    pub clear_color: [f32; 4],
    /// How often the frame loop logs its frame rate
    pub stats_interval: Duration,
}

impl Default for ImmersiveConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: Duration::from_secs(15),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            stats_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndCause {
    /// Toggle, replacement or failed negotiation
    Requested,
    /// The device ended the session
    DeviceEnded,
}

struct Inner {
    state: ImmersiveState,
    generation: u64,
    session: Option<Arc<dyn XrSession>>,
    reference_space: Option<ReferenceSpace>,
    frame_task: Option<JoinHandle<()>>,
    end_task: Option<JoinHandle<()>>,
}

struct Shared {
    inner: Mutex<Inner>,
    events: broadcast::Sender<ImmersiveState>,
    end_timeout: Duration,
}

impl Shared {
    fn set_state(&self, inner: &mut Inner, state: ImmersiveState) {
        if inner.state != state {
            debug!(from = ?inner.state, to = ?state, "Immersive state changed");
            inner.state = state;
            let _ = self.events.send(state);
        }
    }

    /// Tear down the session of `generation`; a no-op for any other generation
    async fn shutdown(&self, generation: u64, cause: EndCause) {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation
            || matches!(inner.state, ImmersiveState::Idle | ImmersiveState::Ending)
        {
            return;
        }

        self.set_state(&mut inner, ImmersiveState::Ending);
        inner.generation += 1;
        inner.reference_space = None;
        if let Some(task) = inner.frame_task.take() {
            task.abort();
        }
        let session = inner.session.take();
        let end_task = inner.end_task.take();

        if cause == EndCause::Requested {
            if let Some(task) = end_task {
                task.abort();
            }
            if let Some(session) = session {
                match tokio::time::timeout(self.end_timeout, session.end()).await {
                    Ok(Ok(())) => info!("XR session ended successfully"),
                    Ok(Err(e)) => debug!("Ending XR session: {}", e),
                    Err(_) => warn!("XR session did not acknowledge end request"),
                }
            }
        } else {
            info!("XR session ended");
        }

        self.set_state(&mut inner, ImmersiveState::Idle);
    }
}

/// What one frame did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered { views: usize },
    /// No viewer pose this frame
    Skipped,
}

/// Render one device frame into the session framebuffer, one pass per view
pub fn render_frame(
    graphics: &dyn GraphicsContext,
    framebuffer: FramebufferId,
    frame: &dyn XrFrame,
    space: &ReferenceSpace,
    clear_color: [f32; 4],
) -> FrameOutcome {
    let Some(pose) = frame.viewer_pose(space) else {
        trace!(time = frame.time(), "No viewer pose");
        return FrameOutcome::Skipped;
    };

    graphics.bind_framebuffer(framebuffer);
    for view in &pose.views {
        graphics.set_viewport(view.viewport);
        graphics.clear(clear_color);
        graphics.enable_depth_test();
        graphics.redraw();
    }
    FrameOutcome::Rendered {
        views: pose.views.len(),
    }
}

struct FrameStats {
    interval: Duration,
    window_start: Instant,
    rendered: u64,
    skipped: u64,
}

impl FrameStats {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            window_start: Instant::now(),
            rendered: 0,
            skipped: 0,
        }
    }

    fn record(&mut self, outcome: FrameOutcome) {
        match outcome {
            FrameOutcome::Rendered { .. } => self.rendered += 1,
            FrameOutcome::Skipped => self.skipped += 1,
        }

        let elapsed = self.window_start.elapsed();
        if elapsed >= self.interval {
            let fps = (self.rendered as f64 / elapsed.as_secs_f64() * 10.0).round() / 10.0;
            info!(
                fps,
                rendered = self.rendered,
                skipped = self.skipped,
                "Immersive frame rate"
            );
            self.window_start = Instant::now();
            self.rendered = 0;
            self.skipped = 0;
        }
    }
}

async fn run_frames(
    session: Arc<dyn XrSession>,
    space: ReferenceSpace,
    graphics: Arc<dyn GraphicsContext>,
    config: ImmersiveConfig,
) {
    let framebuffer = session.framebuffer();
    let mut stats = FrameStats::new(config.stats_interval);
    while let Some(frame) = session.next_frame().await {
        let outcome = render_frame(
            graphics.as_ref(),
            framebuffer,
            frame.as_ref(),
            &space,
            config.clear_color,
        );
        stats.record(outcome);
    }
    debug!("Frame loop finished");
}

async fn bounded<T>(
    step: &'static str,
    timeout: Duration,
    future: impl Future<Output = T>,
) -> Result<T, ImmersiveError> {
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| ImmersiveError::NegotiationTimeout { step, timeout })
}

/// Owner of the single immersive session of a viewer
pub struct ImmersiveController {
    xr: Arc<dyn XrSystem>,
    graphics: Arc<dyn GraphicsContext>,
    notifier: Arc<dyn Notifier>,
    config: ImmersiveConfig,
    shared: Arc<Shared>,
}

impl ImmersiveController {
    pub fn new(
        xr: Arc<dyn XrSystem>,
        graphics: Arc<dyn GraphicsContext>,
        notifier: Arc<dyn Notifier>,
        config: ImmersiveConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(32);
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: ImmersiveState::Idle,
                generation: 0,
                session: None,
                reference_space: None,
                frame_task: None,
                end_task: None,
            }),
            events,
            end_timeout: config.negotiation_timeout,
        });
        Self {
            xr,
            graphics,
            notifier,
            config,
            shared,
        }
    }

    pub async fn state(&self) -> ImmersiveState {
        self.shared.inner.lock().await.state
    }

    pub async fn reference_space(&self) -> Option<ReferenceSpace> {
        self.shared.inner.lock().await.reference_space.clone()
    }

    /// State transitions, in order
    pub fn subscribe(&self) -> broadcast::Receiver<ImmersiveState> {
        self.shared.events.subscribe()
    }

    /// Start when idle, end when requesting or active
    pub async fn toggle(&self) -> Result<ImmersiveState, ImmersiveError> {
        match self.state().await {
            ImmersiveState::Idle => {
                self.start().await?;
                Ok(ImmersiveState::Active)
            }
            ImmersiveState::Requesting | ImmersiveState::Active => {
                self.end().await;
                Ok(ImmersiveState::Idle)
            }
            ImmersiveState::Ending => {
                debug!("Toggle ignored while the session is ending");
                Ok(ImmersiveState::Ending)
            }
        }
    }

    /// Negotiate a new session, ending any existing one first.
    ///
    /// Failures are alerted and leave the controller idle.
    pub async fn start(&self) -> Result<(), ImmersiveError> {
        if self.state().await != ImmersiveState::Idle {
            self.end().await;
        }

        let generation = {
            let mut inner = self.shared.inner.lock().await;
            inner.generation += 1;
            self.shared.set_state(&mut inner, ImmersiveState::Requesting);
            inner.generation
        };
        info!(mode = SessionMode::ImmersiveVr.as_str(), "Requesting XR session");

        match self.negotiate(generation).await {
            Ok(()) => Ok(()),
            Err(ImmersiveError::Superseded) => {
                debug!(generation, "XR session request superseded");
                Err(ImmersiveError::Superseded)
            }
            Err(e) => {
                error!("Could not start XR session: {}", e);
                self.notifier.alert(&e.to_string());
                self.shared.shutdown(generation, EndCause::Requested).await;
                Err(e)
            }
        }
    }

    /// End the current session; a no-op when idle
    pub async fn end(&self) {
        let generation = self.shared.inner.lock().await.generation;
        self.shared.shutdown(generation, EndCause::Requested).await;
    }

    async fn is_current(&self, generation: u64) -> bool {
        self.shared.inner.lock().await.generation == generation
    }

    async fn negotiate(&self, generation: u64) -> Result<(), ImmersiveError> {
        let timeout = self.config.negotiation_timeout;
        let mode = SessionMode::ImmersiveVr;

        if !self.xr.is_available() {
            return Err(ImmersiveError::CapabilityUnavailable);
        }

        let supported = bounded("support check", timeout, self.xr.is_session_supported(mode)).await;
        if !self.is_current(generation).await {
            return Err(ImmersiveError::Superseded);
        }
        if !supported?.map_err(ImmersiveError::SupportCheck)? {
            return Err(ImmersiveError::Unsupported);
        }

        let granted = bounded("session request", timeout, self.xr.request_session(mode)).await;
        let session = {
            let mut inner = self.shared.inner.lock().await;
            if inner.generation != generation {
                drop(inner);
                if let Ok(Ok(session)) = granted {
                    let _ = session.end().await;
                }
                return Err(ImmersiveError::Superseded);
            }
            let session = granted?.map_err(ImmersiveError::Negotiation)?;

            let watched = session.clone();
            let shared = self.shared.clone();
            inner.end_task = Some(tokio::spawn(async move {
                watched.ended().await;
                shared.shutdown(generation, EndCause::DeviceEnded).await;
            }));
            inner.session = Some(session.clone());
            session
        };

        let space = bounded(
            "reference space request",
            timeout,
            session.request_reference_space(ReferenceSpaceKind::Local),
        )
        .await;
        let mut inner = self.shared.inner.lock().await;
        if inner.generation != generation {
            return Err(ImmersiveError::Superseded);
        }
        let space = space?.map_err(ImmersiveError::ReferenceSpace)?;

        inner.reference_space = Some(space.clone());
        inner.frame_task = Some(tokio::spawn(run_frames(
            session,
            space,
            self.graphics.clone(),
            self.config.clone(),
        )));
        self.shared.set_state(&mut inner, ImmersiveState::Active);
        info!("XR session started");
        Ok(())
    }
}
