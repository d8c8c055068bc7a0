//! Headless scene engine backed by TOML scene manifests
//!
//! A manifest describes the object tree of a translated model: named objects,
//! their fragments with world transforms, and nested child objects. Manifests
//! are registered in memory or read from `<dir>/<urn>.toml` on load.

use futures_util::future::{BoxFuture, FutureExt};
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use twinview_core::{FragmentId, ModelRef, ObjectId, OrbitCamera, ScreenPoint, Viewport};

use crate::controls::ControlGroup;
use crate::engine::{MarkerBatch, SceneEngine, SceneError, MARKER_EXTENSION};
use crate::xr::{FramebufferId, GraphicsContext};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentNode {
    pub id: FragmentId,
    /// World translation; shorthand for a pure translation matrix
    #[serde(default)]
    pub translation: Option<[f32; 3]>,
    /// Column-major world matrix, takes precedence over `translation`
    #[serde(default)]
    pub matrix: Option<[f32; 16]>,
}

impl FragmentNode {
    fn world_matrix(&self) -> Option<Mat4> {
        match (self.matrix, self.translation) {
            (Some(m), _) => Some(Mat4::from_cols_array(&m)),
            (None, Some(t)) => Some(Mat4::from_translation(Vec3::from_array(t))),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectNode {
    pub id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub fragments: Vec<FragmentNode>,
    #[serde(default)]
    pub children: Vec<ObjectNode>,
}

impl ObjectNode {
    fn find(&self, id: ObjectId) -> Option<&ObjectNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    fn collect_fragments(&self, recursive: bool, out: &mut Vec<FragmentId>) {
        out.extend(self.fragments.iter().map(|f| f.id));
        if recursive {
            for child in &self.children {
                child.collect_fragments(true, out);
            }
        }
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a ObjectNode)) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }
}

/// Scene of one translated model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneManifest {
    #[serde(default)]
    pub camera: OrbitCamera,
    /// Whether the viewer toolbar exists right after load
    #[serde(default = "default_toolbar_ready")]
    pub toolbar_ready: bool,
    #[serde(default)]
    pub object: Vec<ObjectNode>,
}

fn default_toolbar_ready() -> bool {
    true
}

impl Default for SceneManifest {
    fn default() -> Self {
        Self {
            camera: OrbitCamera::default(),
            toolbar_ready: default_toolbar_ready(),
            object: Vec::new(),
        }
    }
}

impl SceneManifest {
    pub fn from_file(path: &Path) -> Result<Self, SceneError> {
        let failed = |reason: String| SceneError::LoadFailed {
            model: path.display().to_string(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| failed(e.to_string()))?;
        toml::from_str(&content).map_err(|e| failed(e.to_string()))
    }

    fn find(&self, id: ObjectId) -> Option<&ObjectNode> {
        self.object.iter().find_map(|o| o.find(id))
    }

    fn fragment(&self, id: FragmentId) -> Option<&FragmentNode> {
        let mut found = None;
        for root in &self.object {
            root.visit(&mut |node| {
                if found.is_none() {
                    found = node.fragments.iter().find(|f| f.id == id);
                }
            });
        }
        found
    }
}

struct LoadedScene {
    model: ModelRef,
    manifest: SceneManifest,
}

/// In-process [`SceneEngine`] and [`GraphicsContext`]
pub struct MemoryScene {
    dir: Option<PathBuf>,
    manifests: RwLock<HashMap<ModelRef, SceneManifest>>,
    loaded: RwLock<Option<LoadedScene>>,
    unavailable_extensions: RwLock<HashSet<String>>,
    loaded_extensions: RwLock<HashSet<String>>,
    commits: Mutex<Vec<MarkerBatch>>,
    fail_commits: AtomicBool,
    hidden_markers: Mutex<HashSet<ObjectId>>,
    controls: Mutex<Vec<ControlGroup>>,
    toolbar_ready: AtomicBool,
    selection: broadcast::Sender<Vec<ObjectId>>,
    redraws: AtomicUsize,
}

impl Default for MemoryScene {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryScene {
    pub fn new() -> Self {
        let (selection, _) = broadcast::channel(16);
        Self {
            dir: None,
            manifests: RwLock::new(HashMap::new()),
            loaded: RwLock::new(None),
            unavailable_extensions: RwLock::new(HashSet::new()),
            loaded_extensions: RwLock::new(HashSet::new()),
            commits: Mutex::new(Vec::new()),
            fail_commits: AtomicBool::new(false),
            hidden_markers: Mutex::new(HashSet::new()),
            controls: Mutex::new(Vec::new()),
            toolbar_ready: AtomicBool::new(false),
            selection,
            redraws: AtomicUsize::new(0),
        }
    }

    /// Read manifests from `<dir>/<urn>.toml` when not registered in memory
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Self::new()
        }
    }

    pub fn insert(&self, model: ModelRef, manifest: SceneManifest) {
        self.manifests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model, manifest);
    }

    pub fn loaded_model(&self) -> Option<ModelRef> {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.model.clone())
    }

    /// Emit a selection-changed event, as a click in the viewer would
    pub fn select(&self, objects: Vec<ObjectId>) {
        let _ = self.selection.send(objects);
    }

    pub fn set_camera(&self, camera: OrbitCamera) {
        if let Some(scene) = self
            .loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            scene.manifest.camera = camera;
        }
    }

    pub fn set_toolbar_ready(&self, ready: bool) {
        self.toolbar_ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_extension_available(&self, name: &str, available: bool) {
        let mut unavailable = self
            .unavailable_extensions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if available {
            unavailable.remove(name);
        } else {
            unavailable.insert(name.to_string());
        }
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Marker batches committed since the last load
    pub fn commits(&self) -> Vec<MarkerBatch> {
        self.commits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_marker_visible(&self, object: ObjectId) -> bool {
        !self
            .hidden_markers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&object)
    }

    pub fn installed_controls(&self) -> Vec<ControlGroup> {
        self.controls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn redraws(&self) -> usize {
        self.redraws.load(Ordering::SeqCst)
    }

    fn manifest_for(&self, model: &ModelRef) -> Result<SceneManifest, SceneError> {
        if let Some(manifest) = self
            .manifests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model)
        {
            return Ok(manifest.clone());
        }
        match &self.dir {
            Some(dir) => SceneManifest::from_file(&dir.join(format!("{}.toml", model))),
            None => Err(SceneError::LoadFailed {
                model: model.to_string(),
                reason: "no scene registered for model".to_string(),
            }),
        }
    }

    fn with_scene<T>(
        &self,
        f: impl FnOnce(&SceneManifest) -> Result<T, SceneError>,
    ) -> Result<T, SceneError> {
        let loaded = self.loaded.read().unwrap_or_else(PoisonError::into_inner);
        match loaded.as_ref() {
            Some(scene) => f(&scene.manifest),
            None => Err(SceneError::NoModel),
        }
    }

    fn load(&self, model: &ModelRef) -> Result<(), SceneError> {
        let manifest = self.manifest_for(model)?;
        info!(model = %model, objects = manifest.object.len(), "Scene loaded");
        self.toolbar_ready.store(manifest.toolbar_ready, Ordering::SeqCst);
        *self.loaded.write().unwrap_or_else(PoisonError::into_inner) = Some(LoadedScene {
            model: model.clone(),
            manifest,
        });
        self.loaded_extensions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.commits.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.hidden_markers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }

    fn search_sync(&self, name: &str) -> Result<Vec<ObjectId>, SceneError> {
        let needle = name.to_lowercase();
        self.with_scene(|manifest| {
            let mut ids = Vec::new();
            for root in &manifest.object {
                root.visit(&mut |node| {
                    if node.name.to_lowercase().contains(&needle) {
                        ids.push(node.id);
                    }
                });
            }
            Ok(ids)
        })
    }

    fn commit(&self, batch: MarkerBatch) -> Result<(), SceneError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(SceneError::CommitFailed("renderer rejected the batch".to_string()));
        }
        let extension_loaded = self
            .loaded_extensions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(MARKER_EXTENSION);
        if !extension_loaded {
            return Err(SceneError::ExtensionUnavailable(MARKER_EXTENSION.to_string()));
        }
        debug!(markers = batch.markers.len(), "Markers committed");
        self.commits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(batch);
        Ok(())
    }
}

impl SceneEngine for MemoryScene {
    fn load_model<'a>(&'a self, model: &'a ModelRef) -> BoxFuture<'a, Result<(), SceneError>> {
        futures_util::future::ready(self.load(model)).boxed()
    }

    fn search<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<ObjectId>, SceneError>> {
        futures_util::future::ready(self.search_sync(name)).boxed()
    }

    fn enumerate_fragments(
        &self,
        object: ObjectId,
        recursive: bool,
    ) -> BoxFuture<'_, Result<Vec<FragmentId>, SceneError>> {
        let result = self.with_scene(|manifest| {
            let node = manifest.find(object).ok_or(SceneError::ObjectNotFound(object))?;
            let mut fragments = Vec::new();
            node.collect_fragments(recursive, &mut fragments);
            Ok(fragments)
        });
        futures_util::future::ready(result).boxed()
    }

    fn world_matrix(&self, fragment: FragmentId) -> Option<Mat4> {
        self.with_scene(|manifest| {
            Ok(manifest.fragment(fragment).and_then(FragmentNode::world_matrix))
        })
        .ok()
        .flatten()
    }

    fn world_to_screen(&self, world: Vec3) -> Option<ScreenPoint> {
        self.with_scene(|manifest| Ok(manifest.camera))
            .unwrap_or_default()
            .project(world)
    }

    fn load_extension<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), SceneError>> {
        let unavailable = self
            .unavailable_extensions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name);
        let result = if unavailable {
            Err(SceneError::ExtensionUnavailable(name.to_string()))
        } else {
            self.loaded_extensions
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(name.to_string());
            Ok(())
        };
        futures_util::future::ready(result).boxed()
    }

    fn commit_markers(&self, batch: MarkerBatch) -> BoxFuture<'_, Result<(), SceneError>> {
        futures_util::future::ready(self.commit(batch)).boxed()
    }

    fn set_marker_visible(&self, object: ObjectId, visible: bool) {
        let mut hidden = self
            .hidden_markers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if visible {
            hidden.remove(&object);
        } else {
            hidden.insert(object);
        }
    }

    fn subscribe_selection(&self) -> broadcast::Receiver<Vec<ObjectId>> {
        self.selection.subscribe()
    }

    fn install_controls(&self, group: &ControlGroup) -> bool {
        if !self.toolbar_ready.load(Ordering::SeqCst) {
            return false;
        }
        let mut controls = self.controls.lock().unwrap_or_else(PoisonError::into_inner);
        if controls.iter().any(|g| g.id == group.id) {
            warn!(group = %group.id, "Control group already installed");
        } else {
            controls.push(group.clone());
        }
        true
    }
}

impl GraphicsContext for MemoryScene {
    fn bind_framebuffer(&self, framebuffer: FramebufferId) {
        debug!(framebuffer = framebuffer.0, "Bind framebuffer");
    }

    fn set_viewport(&self, viewport: Viewport) {
        debug!(
            x = viewport.x,
            y = viewport.y,
            width = viewport.width,
            height = viewport.height,
            "Set viewport"
        );
    }

    fn clear(&self, _color: [f32; 4]) {}

    fn enable_depth_test(&self) {}

    fn redraw(&self) {
        self.redraws.fetch_add(1, Ordering::SeqCst);
    }
}
