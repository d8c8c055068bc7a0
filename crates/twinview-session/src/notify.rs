//! User-visible notifications and address-bar state

use std::sync::Mutex;
use tracing::{info, warn};
use twinview_core::{Diagnostic, TranslationStatus};

/// Content of the status overlay
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    NotTranslated,
    Translating { progress: String },
    TranslationFailed { messages: Vec<Diagnostic> },
    Uploading { file_name: String },
}

impl Notice {
    /// Overlay content for a polled status; `None` once the model is ready
    pub fn for_status(status: &TranslationStatus) -> Option<Self> {
        match status {
            TranslationStatus::NotStarted => Some(Self::NotTranslated),
            TranslationStatus::InProgress { progress } => Some(Self::Translating {
                progress: progress.clone(),
            }),
            TranslationStatus::Failed { messages } => Some(Self::TranslationFailed {
                messages: messages.clone(),
            }),
            TranslationStatus::Ready => None,
        }
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotTranslated => write!(f, "Model has not been translated."),
            Self::Translating { progress } => {
                write!(f, "Model is being translated ({})...", progress)
            }
            Self::TranslationFailed { messages } => {
                write!(f, "Translation failed.")?;
                for message in messages {
                    write!(f, "\n- {}", message)?;
                }
                Ok(())
            }
            Self::Uploading { file_name } => {
                write!(f, "Uploading model {}. Do not reload the page.", file_name)
            }
        }
    }
}

/// Status overlay and alert surface
pub trait Notifier: Send + Sync {
    fn show(&self, notice: &Notice);

    fn clear(&self);

    fn alert(&self, message: &str);
}

/// Notifier that writes to the log, for headless sessions
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show(&self, notice: &Notice) {
        info!(target: "twinview::notice", "{}", notice);
    }

    fn clear(&self) {}

    fn alert(&self, message: &str) {
        warn!(target: "twinview::alert", "{}", message);
    }
}

/// Persisted selection in the address bar fragment
pub trait AddressBar: Send + Sync {
    fn fragment(&self) -> Option<String>;

    fn set_fragment(&self, fragment: &str);
}

/// Address bar kept in memory
#[derive(Debug, Default)]
pub struct MemoryAddressBar {
    fragment: Mutex<Option<String>>,
}

impl MemoryAddressBar {
    pub fn new(fragment: Option<String>) -> Self {
        Self {
            fragment: Mutex::new(fragment),
        }
    }
}

impl AddressBar for MemoryAddressBar {
    fn fragment(&self) -> Option<String> {
        self.fragment.lock().ok().and_then(|f| f.clone())
    }

    fn set_fragment(&self, fragment: &str) {
        if let Ok(mut current) = self.fragment.lock() {
            *current = Some(fragment.to_string());
        }
    }
}
