//! Toolbar controls added to the viewer

use serde::{Deserialize, Serialize};

/// Identifier of the custom control group
pub const CONTROL_GROUP_ID: &str = "customControls";

/// What a toolbar button does when clicked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewerAction {
    ToggleDashboard,
    ToggleSri,
    ToggleImmersive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlButton {
    pub id: String,
    /// Icon class name
    pub icon: String,
    pub tooltip: String,
    pub action: ViewerAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlGroup {
    pub id: String,
    pub buttons: Vec<ControlButton>,
}

impl ControlGroup {
    /// Dashboard, SRI and VR toggles
    pub fn viewer_controls() -> Self {
        let button = |id: &str, icon: &str, tooltip: &str, action| ControlButton {
            id: id.to_string(),
            icon: icon.to_string(),
            tooltip: tooltip.to_string(),
            action,
        };
        Self {
            id: CONTROL_GROUP_ID.to_string(),
            buttons: vec![
                button(
                    "dashboardButton",
                    "fas fa-chart-line",
                    "Open Dashboard",
                    ViewerAction::ToggleDashboard,
                ),
                button(
                    "sriButton",
                    "fas fa-tachometer-alt",
                    "Open SRI",
                    ViewerAction::ToggleSri,
                ),
                button(
                    "vrButton",
                    "fas fa-vr-cardboard",
                    "Enter VR",
                    ViewerAction::ToggleImmersive,
                ),
            ],
        }
    }
}
