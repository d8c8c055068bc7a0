//! Configuration loading

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use twinview_core::{SensorCatalog, UnknownStatusPolicy};
use twinview_session::{ImmersiveConfig, OverlayConfig, PanelSettings, PollerConfig, SessionConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub scene: SceneConfig,
    #[serde(default)]
    pub sensors: SensorsConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub immersive: ImmersiveSection,
    #[serde(default)]
    pub panels: PanelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the model API server
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay between status requests while a model is translating
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub unknown_status: UnknownStatusPolicy,
    #[serde(default)]
    pub retry_not_started: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            unknown_status: UnknownStatusPolicy::default(),
            retry_not_started: false,
        }
    }
}

fn default_interval_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneConfig {
    /// Directory of `<urn>.toml` scene manifests
    #[serde(default = "default_scene_path")]
    pub path: PathBuf,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            path: default_scene_path(),
        }
    }
}

fn default_scene_path() -> PathBuf {
    PathBuf::from("./scenes")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorsConfig {
    /// Sensor catalog file; the built-in catalog when absent
    #[serde(default)]
    pub catalog: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImmersiveSection {
    #[serde(default = "default_negotiation_timeout")]
    pub negotiation_timeout_secs: u64,
    #[serde(default = "default_clear_color")]
    pub clear_color: [f32; 4],
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

impl Default for ImmersiveSection {
    fn default() -> Self {
        Self {
            negotiation_timeout_secs: default_negotiation_timeout(),
            clear_color: default_clear_color(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

fn default_negotiation_timeout() -> u64 {
    15
}

fn default_clear_color() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

fn default_stats_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelsConfig {
    #[serde(default = "PanelSettings::dashboard")]
    pub dashboard: PanelSettings,
    #[serde(default = "PanelSettings::sri")]
    pub sri: PanelSettings,
}

impl Default for PanelsConfig {
    fn default() -> Self {
        Self {
            dashboard: PanelSettings::dashboard(),
            sri: PanelSettings::sri(),
        }
    }
}

impl Config {
    /// Sensor catalog named by the config, or the built-in one
    pub fn load_catalog(&self) -> Result<SensorCatalog> {
        match &self.sensors.catalog {
            Some(path) => {
                let catalog = SensorCatalog::from_file(path).with_context(|| {
                    format!("Failed to load sensor catalog {}", path.display())
                })?;
                info!(
                    path = %path.display(),
                    sensors = catalog.sensor.len(),
                    "Loaded sensor catalog"
                );
                Ok(catalog)
            }
            None => Ok(SensorCatalog::default()),
        }
    }

    pub fn session_config(&self, catalog: SensorCatalog) -> SessionConfig {
        SessionConfig {
            poller: PollerConfig {
                interval: Duration::from_millis(self.polling.interval_ms),
                unknown_status: self.polling.unknown_status,
                retry_not_started: self.polling.retry_not_started,
            },
            overlay: self.overlay.clone(),
            immersive: ImmersiveConfig {
                negotiation_timeout: Duration::from_secs(self.immersive.negotiation_timeout_secs),
                clear_color: self.immersive.clear_color,
                stats_interval: Duration::from_secs(self.immersive.stats_interval_secs),
            },
            catalog,
            dashboard: self.panels.dashboard.clone(),
            sri: self.panels.sri.clone(),
            ..SessionConfig::default()
        }
    }
}

/// Load configuration from file, falling back to defaults when it does not exist
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
