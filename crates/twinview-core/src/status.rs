//! Translation status reported by the model API
//!
//! The status endpoint answers with a loosely typed payload
//! (`{"status": "...", "progress": "...", "messages": [...]}`).
//! [`TranslationStatus::classify`] turns it into a closed set of states.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status strings that mean the translation finished successfully
const READY_STATUSES: &[&str] = &["success", "complete", "ready"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusError {
    #[error("Unknown translation status: {0:?}")]
    Unknown(String),
}

/// Raw payload of `GET /models/{id}/status`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusPayload {
    pub status: String,
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

/// One diagnostic record attached to a failed translation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostic(pub serde_json::Value);

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How to treat a status string outside the known set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownStatusPolicy {
    /// Report [`StatusError::Unknown`]
    #[default]
    Reject,
    /// Proceed as if the model were ready (legacy behavior)
    Ready,
}

/// Classified translation state of a model
#[derive(Debug, Clone, PartialEq)]
pub enum TranslationStatus {
    NotStarted,
    InProgress { progress: String },
    Failed { messages: Vec<Diagnostic> },
    Ready,
}

impl TranslationStatus {
    /// Classify a decoded payload
    pub fn classify(
        payload: StatusPayload,
        policy: UnknownStatusPolicy,
    ) -> Result<Self, StatusError> {
        let status = payload.status.trim().to_ascii_lowercase();
        match status.as_str() {
            "n/a" => Ok(Self::NotStarted),
            "inprogress" | "pending" => Ok(Self::InProgress {
                progress: payload.progress.unwrap_or_default(),
            }),
            "failed" => Ok(Self::Failed {
                messages: payload.messages.into_iter().map(Diagnostic).collect(),
            }),
            s if READY_STATUSES.contains(&s) => Ok(Self::Ready),
            _ => match policy {
                UnknownStatusPolicy::Reject => Err(StatusError::Unknown(payload.status)),
                UnknownStatusPolicy::Ready => Ok(Self::Ready),
            },
        }
    }

    /// Failed and Ready end the polling loop
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Ready)
    }
}
