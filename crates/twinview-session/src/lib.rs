//! Twinview Session - Viewer session orchestration
//!
//! This crate drives one interactive viewer session:
//! - Polling the model API until a model's translation is ready
//! - Resolving catalog sensors to world positions in the loaded scene
//! - Placing markers and selection tooltips for the resolved sensors
//! - Running the immersive (VR) session lifecycle next to the main render loop
//!
//! The scene engine, immersive device, graphics context and user-facing
//! surfaces are consumed through the capability traits in [`engine`],
//! [`xr`] and [`notify`].

pub mod controls;
pub mod engine;
pub mod immersive;
pub mod memory;
pub mod notify;
pub mod orchestrator;
pub mod overlay;
pub mod panels;
pub mod poller;
pub mod scene_query;
pub mod xr;

#[cfg(test)]
mod testing;

pub use controls::{ControlButton, ControlGroup, ViewerAction};
pub use engine::{MarkerBatch, MarkerSpec, SceneEngine, SceneError, MARKER_EXTENSION};
pub use immersive::{ImmersiveConfig, ImmersiveController, ImmersiveError, ImmersiveState};
pub use memory::{MemoryScene, SceneManifest};
pub use notify::{AddressBar, LogNotifier, MemoryAddressBar, Notice, Notifier};
pub use orchestrator::{
    Collaborators, SelectionOutcome, SessionConfig, SessionError, SessionEvent, SessionOrchestrator,
    SessionPhase, SessionSnapshot,
};
pub use overlay::{OverlayConfig, OverlayMarker, OverlayPlacer, TooltipPanel};
pub use panels::{AuxPanels, PanelKind, PanelSettings, PanelView};
pub use poller::{PollError, PollOutcome, PollerConfig, StatusPoller};
pub use scene_query::{DiscoveryReport, QueryMiss, SceneQuery};
pub use xr::{GraphicsContext, UnavailableXr, XrError, XrFrame, XrSession, XrSystem};
