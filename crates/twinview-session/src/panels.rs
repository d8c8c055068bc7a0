//! Auxiliary side panels (dashboard and SRI platform)
//!
//! Panels are unmounted while a model is being selected and mounted again
//! once its scene is loaded, keeping the visibility they had before.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelKind {
    Dashboard,
    SriPlatform,
}

impl std::fmt::Display for PanelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dashboard => write!(f, "dashboard"),
            Self::SriPlatform => write!(f, "SRI platform"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelSettings {
    pub url: String,
    pub width_px: u32,
}

impl PanelSettings {
    pub fn dashboard() -> Self {
        Self {
            url: "https://www.google.com/".to_string(),
            width_px: 368,
        }
    }

    pub fn sri() -> Self {
        Self {
            url: "https://www.google.com/".to_string(),
            width_px: 500,
        }
    }
}

/// A mounted panel as it should be rendered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelView {
    pub kind: PanelKind,
    pub url: String,
    pub width_px: u32,
    pub visible: bool,
}

#[derive(Debug, Clone)]
pub struct AuxPanels {
    dashboard: PanelSettings,
    sri: PanelSettings,
    mounted: bool,
    dashboard_visible: bool,
    sri_visible: bool,
}

impl AuxPanels {
    /// Panels start unmounted and hidden
    pub fn new(dashboard: PanelSettings, sri: PanelSettings) -> Self {
        Self {
            dashboard,
            sri,
            mounted: false,
            dashboard_visible: false,
            sri_visible: false,
        }
    }

    /// Remove both panels, remembering their visibility
    pub fn unmount(&mut self) {
        if self.mounted {
            debug!(
                dashboard = self.dashboard_visible,
                sri = self.sri_visible,
                "Unmounting panels"
            );
        }
        self.mounted = false;
    }

    /// Mount both panels with the remembered visibility
    pub fn mount(&mut self) {
        self.mounted = true;
    }

    /// Flip a panel's visibility; `None` when the panels are not mounted
    pub fn toggle(&mut self, kind: PanelKind) -> Option<bool> {
        if !self.mounted {
            info!(panel = %kind, "Panel toggle ignored, panels are not mounted");
            return None;
        }
        let visible = match kind {
            PanelKind::Dashboard => &mut self.dashboard_visible,
            PanelKind::SriPlatform => &mut self.sri_visible,
        };
        *visible = !*visible;
        info!(panel = %kind, visible = *visible, "Toggled panel");
        Some(*visible)
    }

    pub fn is_visible(&self, kind: PanelKind) -> bool {
        self.mounted
            && match kind {
                PanelKind::Dashboard => self.dashboard_visible,
                PanelKind::SriPlatform => self.sri_visible,
            }
    }

    /// Mounted panels; empty while unmounted
    pub fn views(&self) -> Vec<PanelView> {
        if !self.mounted {
            return Vec::new();
        }
        [
            (PanelKind::Dashboard, &self.dashboard, self.dashboard_visible),
            (PanelKind::SriPlatform, &self.sri, self.sri_visible),
        ]
        .into_iter()
        .map(|(kind, settings, visible)| PanelView {
            kind,
            url: settings.url.clone(),
            width_px: settings.width_px,
            visible,
        })
        .collect()
    }
}

impl Default for AuxPanels {
    fn default() -> Self {
        Self::new(PanelSettings::dashboard(), PanelSettings::sri())
    }
}
