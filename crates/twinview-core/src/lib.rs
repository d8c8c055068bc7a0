//! Twinview Core - Shared types for the model viewer session
//!
//! This crate provides the foundational types for Twinview:
//! - Model references, summaries and upload descriptors
//! - Translation status decoding and classification
//! - Sensor catalog with tooltip content templates
//! - Scene identifiers, resolved sensors and the orbit camera projection

pub mod camera;
pub mod model;
pub mod scene;
pub mod sensor;
pub mod status;

pub use camera::{OrbitCamera, ScreenPoint, Viewport};
pub use model::{ModelRef, ModelRefError, ModelSummary, ModelUpload};
pub use scene::{position_from_transform, FragmentId, ObjectId, ResolvedSensor};
pub use sensor::{
    CatalogError, SensorCatalog, SensorEntry, SensorQuery, TooltipContent, TooltipTemplate,
};
pub use status::{Diagnostic, StatusError, StatusPayload, TranslationStatus, UnknownStatusPolicy};
