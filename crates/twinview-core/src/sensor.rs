//! Sensor catalog - maps known sensor names to tooltip templates
//!
//! The catalog is data: which names to search for in a loaded scene,
//! which tooltip layout each one uses, and which markers start hidden.
//! A built-in catalog covers the shipped sensors; deployments can swap
//! it for a TOML file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::scene::ObjectId;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read sensor catalog: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse sensor catalog: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Duplicate sensor name in catalog: {0}")]
    Duplicate(String),
}

/// Display name of a sensor, used as a scene search key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorQuery(pub String);

impl SensorQuery {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SensorQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tooltip layout families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TooltipTemplate {
    /// Indoor air quality sensor readings
    Environmental,
    /// Energy meter totals
    EnergyMeter,
}

/// One labelled reading in a tooltip table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub icon: String,
    pub label: String,
}

impl Metric {
    fn new(icon: &str, label: &str) -> Self {
        Self {
            icon: icon.to_string(),
            label: label.to_string(),
        }
    }
}

/// Content of a tooltip panel: a title and a table of metric rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TooltipContent {
    pub title: String,
    pub rows: Vec<Vec<Metric>>,
}

impl TooltipTemplate {
    pub fn content(&self) -> TooltipContent {
        match self {
            Self::Environmental => TooltipContent {
                title: "Indoor Air Quality - Details".to_string(),
                rows: vec![
                    vec![
                        Metric::new("fa-cloud", "CO2 [ppm]"),
                        Metric::new("fa-thermometer-half", "Temperature [°C]"),
                    ],
                    vec![
                        Metric::new("fa-tint", "Humidity [%]"),
                        Metric::new("fa-leaf", "TVOC"),
                    ],
                    vec![
                        Metric::new("fa-tachometer-alt", "Pressure [hPa]"),
                        Metric::new("fa-lightbulb", "Illumination [Level]"),
                    ],
                    vec![
                        Metric::new("fa-running", "Activity"),
                        Metric::new("fa-battery-three-quarters", "Battery [%]"),
                    ],
                ],
            },
            Self::EnergyMeter => TooltipContent {
                title: "Energy Metering".to_string(),
                rows: vec![
                    vec![Metric::new("fa-bolt", "Energy - by floor [kWh]")],
                    vec![Metric::new("fa-bolt", "Energy - by meter [kWh]")],
                    vec![Metric::new("fa-bolt", "Energy - Totals [kWh]")],
                ],
            },
        }
    }
}

/// A sensor known to the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorEntry {
    pub name: String,
    pub template: TooltipTemplate,
}

/// The sensor catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorCatalog {
    /// Version of the catalog format
    #[serde(default = "default_version")]
    pub version: String,
    /// Sensors searched for on every model load, in order
    #[serde(default)]
    pub sensor: Vec<SensorEntry>,
    /// Objects whose markers are hidden right after placement
    #[serde(default)]
    pub hidden_markers: Vec<ObjectId>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for SensorCatalog {
    fn default() -> Self {
        let onset = |name: &str| SensorEntry {
            name: name.to_string(),
            template: TooltipTemplate::EnergyMeter,
        };
        Self {
            version: default_version(),
            sensor: vec![
                SensorEntry {
                    name: "Milesight Air quality sensor".to_string(),
                    template: TooltipTemplate::Environmental,
                },
                onset("Onset [688241]"),
                onset("Onset [688619]"),
                onset("Onset [689452]"),
                onset("Onset [689637]"),
            ],
            hidden_markers: vec![ObjectId(471651)],
        }
    }
}

impl SensorCatalog {
    /// Load a catalog from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a catalog from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, CatalogError> {
        let catalog: SensorCatalog = toml::from_str(content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let mut seen = std::collections::HashSet::new();
        for entry in &self.sensor {
            if !seen.insert(entry.name.as_str()) {
                return Err(CatalogError::Duplicate(entry.name.clone()));
            }
        }
        Ok(())
    }

    /// Search keys for every catalog sensor, in catalog order
    pub fn queries(&self) -> Vec<SensorQuery> {
        self.sensor.iter().map(|s| SensorQuery::new(&s.name)).collect()
    }

    /// Template for a sensor label; `None` for labels outside the catalog
    pub fn template_for(&self, label: &str) -> Option<TooltipTemplate> {
        self.sensor
            .iter()
            .find(|s| s.name == label)
            .map(|s| s.template)
    }
}
