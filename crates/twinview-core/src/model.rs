//! Model references and the descriptors exchanged with the model API

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ModelRefError {
    #[error("Model reference is empty")]
    Empty,
    #[error("Model reference contains whitespace: {0:?}")]
    Whitespace(String),
}

/// Opaque identifier (URN) of a translatable model
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelRef(String);

impl ModelRef {
    /// Create a model reference, rejecting empty or whitespace-bearing URNs
    pub fn new(urn: impl Into<String>) -> Result<Self, ModelRefError> {
        let urn = urn.into();
        if urn.is_empty() {
            return Err(ModelRefError::Empty);
        }
        if urn.chars().any(char::is_whitespace) {
            return Err(ModelRefError::Whitespace(urn));
        }
        Ok(Self(urn))
    }

    /// Restore a model reference from an address-bar fragment ("#urn" or "urn")
    pub fn from_url_fragment(fragment: &str) -> Option<Self> {
        Self::new(fragment.trim_start_matches('#')).ok()
    }

    /// Address-bar fragment that restores this selection on reload
    pub fn to_url_fragment(&self) -> String {
        format!("#{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ModelRef {
    type Error = ModelRefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ModelRef> for String {
    fn from(value: ModelRef) -> Self {
        value.0
    }
}

/// Entry of the model list returned by the model API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    #[serde(alias = "id")]
    pub urn: ModelRef,
    #[serde(alias = "displayName")]
    pub name: String,
}

/// A model file to upload for translation
#[derive(Debug, Clone)]
pub struct ModelUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Path of the main design inside an archive upload
    pub archive_entry: Option<String>,
}

impl ModelUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
            archive_entry: None,
        }
    }

    pub fn with_archive_entry(mut self, entry: impl Into<String>) -> Self {
        self.archive_entry = Some(entry.into());
        self
    }

    /// Archives need the path of their main design
    pub fn is_archive(&self) -> bool {
        self.file_name.to_ascii_lowercase().ends_with(".zip")
    }

    /// True when an archive is missing its entry path
    pub fn needs_archive_entry(&self) -> bool {
        self.is_archive()
            && self
                .archive_entry
                .as_deref()
                .map_or(true, |entry| entry.trim().is_empty())
    }
}
