//! Immersive device and graphics capability interfaces

use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use twinview_core::Viewport;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XrError {
    #[error("{0}")]
    Rejected(String),
    #[error("Session has already ended")]
    AlreadyEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionMode {
    ImmersiveVr,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImmersiveVr => "immersive-vr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceSpaceKind {
    /// Origin near the viewer at session start
    Local,
}

/// Frame-of-reference handle granted by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSpace {
    pub kind: ReferenceSpaceKind,
    pub handle: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Eye {
    Left,
    Right,
    None,
}

/// One eye (or monoscopic view) of a viewer pose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct View {
    pub eye: Eye,
    /// Sub-viewport of the session render target
    pub viewport: Viewport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerPose {
    pub views: Vec<View>,
}

/// Framebuffer of the session render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u32);

/// A frame delivered by the device
pub trait XrFrame: Send {
    /// Frame timestamp, milliseconds
    fn time(&self) -> f64;

    /// Viewer pose relative to `space`; `None` while tracking is lost
    fn viewer_pose(&self, space: &ReferenceSpace) -> Option<ViewerPose>;
}

/// A granted immersive session
pub trait XrSession: Send + Sync {
    fn request_reference_space(
        &self,
        kind: ReferenceSpaceKind,
    ) -> BoxFuture<'_, Result<ReferenceSpace, XrError>>;

    /// Next animation frame; `None` once the session is over
    fn next_frame(&self) -> BoxFuture<'_, Option<Box<dyn XrFrame>>>;

    /// Resolves when the session ends, whoever ended it
    fn ended(&self) -> BoxFuture<'_, ()>;

    fn end(&self) -> BoxFuture<'_, Result<(), XrError>>;

    fn framebuffer(&self) -> FramebufferId;
}

/// Device capability and session negotiation
pub trait XrSystem: Send + Sync {
    /// Whether the runtime exposes immersive rendering at all
    fn is_available(&self) -> bool;

    fn is_session_supported(&self, mode: SessionMode) -> BoxFuture<'_, Result<bool, XrError>>;

    fn request_session(
        &self,
        mode: SessionMode,
    ) -> BoxFuture<'_, Result<Arc<dyn XrSession>, XrError>>;
}

/// Low-level graphics operations of the primary renderer
pub trait GraphicsContext: Send + Sync {
    fn bind_framebuffer(&self, framebuffer: FramebufferId);

    fn set_viewport(&self, viewport: Viewport);

    /// Clear color and depth
    fn clear(&self, color: [f32; 4]);

    fn enable_depth_test(&self);

    /// Force a full redraw of the scene into the current viewport
    fn redraw(&self);
}

/// Runtime without immersive support
pub struct UnavailableXr;

impl XrSystem for UnavailableXr {
    fn is_available(&self) -> bool {
        false
    }

    fn is_session_supported(&self, _mode: SessionMode) -> BoxFuture<'_, Result<bool, XrError>> {
        futures_util::future::ready(Ok(false)).boxed()
    }

    fn request_session(
        &self,
        mode: SessionMode,
    ) -> BoxFuture<'_, Result<Arc<dyn XrSession>, XrError>> {
        let reason = format!("{} sessions are not available", mode.as_str());
        futures_util::future::ready(Err(XrError::Rejected(reason))).boxed()
    }
}
