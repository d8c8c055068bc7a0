//! Sensor markers and selection tooltips
//!
//! Markers are queued per model load and committed to the engine in a single
//! batch. Tooltip bindings live in an arena scoped to the model load: starting
//! a new scope drops every binding, marker and panel of the previous one.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use twinview_core::{ObjectId, ResolvedSensor, ScreenPoint, SensorCatalog, TooltipContent};

use crate::engine::{MarkerBatch, MarkerSpec, SceneEngine, MARKER_EXTENSION};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Marker sprite size in pixels
    pub sprite_size: u32,
    pub icon: String,
    /// Tooltip offset from the projected anchor, pixels
    pub tooltip_offset: (f32, f32),
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            sprite_size: 32,
            icon: "/sensor-colored.png".to_string(),
            tooltip_offset: (20.0, -20.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayMarker {
    pub object_id: ObjectId,
    pub world_position: Vec3,
    pub visible: bool,
}

/// The single live tooltip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TooltipPanel {
    pub object_id: ObjectId,
    pub label: String,
    pub anchor: Vec3,
    /// Screen position of the panel's top-left corner
    pub position: ScreenPoint,
    /// `None` for labels without a template
    pub content: Option<TooltipContent>,
}

#[derive(Debug, Clone)]
struct Binding {
    object_id: ObjectId,
    anchor: Vec3,
    label: String,
}

#[derive(Debug, Default)]
struct OverlayState {
    scope: u64,
    extension_loaded: bool,
    pending: Vec<MarkerSpec>,
    markers: Vec<OverlayMarker>,
    bindings: Vec<Binding>,
    tooltip: Option<TooltipPanel>,
}

pub struct OverlayPlacer {
    engine: Arc<dyn SceneEngine>,
    catalog: SensorCatalog,
    config: OverlayConfig,
    state: Mutex<OverlayState>,
}

impl OverlayPlacer {
    pub fn new(
        engine: Arc<dyn SceneEngine>,
        catalog: SensorCatalog,
        config: OverlayConfig,
    ) -> Self {
        Self {
            engine,
            catalog,
            config,
            state: Mutex::new(OverlayState::default()),
        }
    }

    pub fn catalog(&self) -> &SensorCatalog {
        &self.catalog
    }

    /// Start the overlay of a new model load, dropping everything from the previous one
    pub async fn begin_scope(&self) -> u64 {
        let mut state = self.state.lock().await;
        let dropped = state.bindings.len();
        state.scope += 1;
        state.extension_loaded = false;
        state.pending.clear();
        state.markers.clear();
        state.bindings.clear();
        state.tooltip = None;
        debug!(scope = state.scope, dropped_listeners = dropped, "Overlay scope started");
        state.scope
    }

    /// Queue a marker for the next commit; ignored for a stale scope
    pub async fn place_marker(
        &self,
        scope: u64,
        world_position: Vec3,
        object_id: ObjectId,
    ) -> bool {
        let mut state = self.state.lock().await;
        if state.scope != scope {
            return false;
        }
        state.pending.push(MarkerSpec {
            object_id,
            position: world_position,
        });
        true
    }

    /// Queue a marker and bind its tooltip
    pub async fn place_sensor(&self, scope: u64, sensor: &ResolvedSensor) -> bool {
        self.place_marker(scope, sensor.world_position, sensor.object_id)
            .await
            && self
                .bind_selection_tooltip(
                    scope,
                    sensor.object_id,
                    sensor.world_position,
                    sensor.query.as_str(),
                )
                .await
    }

    /// Commit the queued markers in one batch; returns the number now shown.
    ///
    /// A failed commit is logged and leaves no markers behind.
    pub async fn commit(&self, scope: u64) -> usize {
        let (batch, load_extension) = {
            let mut state = self.state.lock().await;
            if state.scope != scope || state.pending.is_empty() {
                return 0;
            }
            let batch = MarkerBatch {
                sprite_size: self.config.sprite_size,
                icon: self.config.icon.clone(),
                markers: std::mem::take(&mut state.pending),
            };
            (batch, !state.extension_loaded)
        };

        if load_extension {
            if let Err(e) = self.engine.load_extension(MARKER_EXTENSION).await {
                warn!("Markers not shown: {}", e);
                return 0;
            }
        }

        let specs = batch.markers.clone();
        if let Err(e) = self.engine.commit_markers(batch).await {
            warn!(markers = specs.len(), "Markers not shown: {}", e);
            return 0;
        }

        let mut state = self.state.lock().await;
        if state.scope != scope {
            debug!(scope, "Dropping markers of a replaced model");
            return 0;
        }
        state.extension_loaded = true;
        state.markers.extend(specs.iter().map(|m| OverlayMarker {
            object_id: m.object_id,
            world_position: m.position,
            visible: true,
        }));
        drop(state);

        for object_id in self.catalog.hidden_markers.clone() {
            self.hide_marker(object_id).await;
        }
        info!(markers = specs.len(), "Sensor markers placed");
        specs.len()
    }

    /// Hide every marker of `object_id`
    pub async fn hide_marker(&self, object_id: ObjectId) {
        let mut state = self.state.lock().await;
        let mut found = false;
        for marker in state.markers.iter_mut().filter(|m| m.object_id == object_id) {
            marker.visible = false;
            found = true;
        }
        if found {
            self.engine.set_marker_visible(object_id, false);
            debug!(object = %object_id, "Marker hidden");
        }
    }

    /// Show a tooltip for `label` whenever `object_id` is part of the selection
    pub async fn bind_selection_tooltip(
        &self,
        scope: u64,
        object_id: ObjectId,
        anchor: Vec3,
        label: &str,
    ) -> bool {
        let mut state = self.state.lock().await;
        if state.scope != scope {
            return false;
        }
        state.bindings.push(Binding {
            object_id,
            anchor,
            label: label.to_string(),
        });
        true
    }

    /// React to a selection change; returns the panel now shown, if it changed
    pub async fn handle_selection(&self, selected: &[ObjectId]) -> Option<TooltipPanel> {
        let mut state = self.state.lock().await;
        let binding = state
            .bindings
            .iter()
            .rev()
            .find(|b| selected.contains(&b.object_id))?
            .clone();

        let Some(projected) = self.engine.world_to_screen(binding.anchor) else {
            debug!(object = %binding.object_id, "Tooltip anchor is behind the camera");
            return None;
        };
        let (dx, dy) = self.config.tooltip_offset;
        let content = self.catalog.template_for(&binding.label).map(|t| t.content());
        if content.is_none() {
            debug!(label = %binding.label, "No tooltip template for label");
        }

        let panel = TooltipPanel {
            object_id: binding.object_id,
            label: binding.label,
            anchor: binding.anchor,
            position: projected.offset(dx, dy),
            content,
        };
        info!(object = %panel.object_id, label = %panel.label, "Sensor selected");
        state.tooltip = Some(panel.clone());
        Some(panel)
    }

    /// Document click; hides the panel unless the click landed inside it.
    /// Returns whether a panel was hidden.
    pub async fn handle_document_click(&self, inside_tooltip: bool) -> bool {
        if inside_tooltip {
            return false;
        }
        self.dismiss_tooltip().await
    }

    pub async fn dismiss_tooltip(&self) -> bool {
        self.state.lock().await.tooltip.take().is_some()
    }

    pub async fn tooltip(&self) -> Option<TooltipPanel> {
        self.state.lock().await.tooltip.clone()
    }

    pub async fn markers(&self) -> Vec<OverlayMarker> {
        self.state.lock().await.markers.clone()
    }

    /// Selection listeners registered in the current scope
    pub async fn listener_count(&self) -> usize {
        self.state.lock().await.bindings.len()
    }
}
