//! Scene engine capability interface
//!
//! The 3D engine (scene graph, fragments, rendering) is an external
//! collaborator. The session only needs the operations below.

use futures_util::future::BoxFuture;
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use twinview_core::{FragmentId, ModelRef, ObjectId, ScreenPoint};

use crate::controls::ControlGroup;

/// Engine extension that renders marker sprites
pub const MARKER_EXTENSION: &str = "DataVisualization";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("No model is loaded")]
    NoModel,
    #[error("Failed to load model {model}: {reason}")]
    LoadFailed { model: String, reason: String },
    #[error("Search for {name:?} failed: {reason}")]
    SearchFailed { name: String, reason: String },
    #[error("Object {0} not found")]
    ObjectNotFound(ObjectId),
    #[error("Fragment {0} has no world transform")]
    FragmentNotFound(FragmentId),
    #[error("Extension {0} is not available")]
    ExtensionUnavailable(String),
    #[error("Marker commit failed: {0}")]
    CommitFailed(String),
}

/// One marker in a batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerSpec {
    pub object_id: ObjectId,
    pub position: Vec3,
}

/// Markers accumulated for a single commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerBatch {
    /// Sprite size in pixels
    pub sprite_size: u32,
    /// Sprite image
    pub icon: String,
    pub markers: Vec<MarkerSpec>,
}

/// Operations the session consumes from the 3D engine
pub trait SceneEngine: Send + Sync {
    /// Load the translated scene of a model, replacing the current one
    fn load_model<'a>(&'a self, model: &'a ModelRef) -> BoxFuture<'a, Result<(), SceneError>>;

    /// Objects whose searchable properties match `name`
    fn search<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<ObjectId>, SceneError>>;

    /// Fragments of an object; `recursive` includes nested/grouped instances
    fn enumerate_fragments(
        &self,
        object: ObjectId,
        recursive: bool,
    ) -> BoxFuture<'_, Result<Vec<FragmentId>, SceneError>>;

    fn world_matrix(&self, fragment: FragmentId) -> Option<Mat4>;

    /// Project a world point with the current camera; `None` behind the camera
    fn world_to_screen(&self, world: Vec3) -> Option<ScreenPoint>;

    fn load_extension<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), SceneError>>;

    /// Build and add a batch of marker sprites in one call
    fn commit_markers(&self, batch: MarkerBatch) -> BoxFuture<'_, Result<(), SceneError>>;

    fn set_marker_visible(&self, object: ObjectId, visible: bool);

    /// Selection-changed events carrying the selected object ids
    fn subscribe_selection(&self) -> broadcast::Receiver<Vec<ObjectId>>;

    /// Add a control group to the toolbar; `false` while the toolbar does not exist yet
    fn install_controls(&self, group: &ControlGroup) -> bool;
}
