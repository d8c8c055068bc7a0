//! Translation status polling
//!
//! One status request per round, re-polling at a fixed interval while the
//! translation is in progress. Starting a new poll (or cancelling) bumps a
//! generation counter; a loop that notices it is no longer current stops
//! without surfacing anything, so only the latest request drives the UI.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use twinview_client::{ApiError, ModelApi};
use twinview_core::{Diagnostic, ModelRef, StatusError, TranslationStatus, UnknownStatusPolicy};

#[derive(Error, Debug)]
pub enum PollError {
    #[error("Status request failed: {0}")]
    Transport(#[from] ApiError),
    #[error(transparent)]
    Status(#[from] StatusError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Delay between status requests while translating
    pub interval: Duration,
    pub unknown_status: UnknownStatusPolicy,
    /// Keep polling a model whose translation has not started.
    ///
    /// Off by default: nothing starts a translation from the viewer, so an
    /// untranslated model is reported once and polling stops.
    pub retry_not_started: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            unknown_status: UnknownStatusPolicy::default(),
            retry_not_started: false,
        }
    }
}

/// How a polling loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Ready,
    Failed(Vec<Diagnostic>),
    NotStarted,
    /// A newer poll or a cancel replaced this one
    Superseded,
}

#[derive(Debug, Clone, Default)]
struct PollTarget {
    model: Option<ModelRef>,
    generation: u64,
}

pub struct StatusPoller {
    api: Arc<dyn ModelApi>,
    config: PollerConfig,
    target: watch::Sender<PollTarget>,
}

impl StatusPoller {
    pub fn new(api: Arc<dyn ModelApi>, config: PollerConfig) -> Self {
        let (target, _) = watch::channel(PollTarget::default());
        Self {
            api,
            config,
            target,
        }
    }

    /// Model of the poll currently in charge
    pub fn current_target(&self) -> Option<ModelRef> {
        self.target.borrow().model.clone()
    }

    /// Stop whichever loop is running
    pub fn cancel(&self) {
        self.target.send_modify(|target| {
            target.model = None;
            target.generation += 1;
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        self.target.borrow().generation == generation
    }

    /// Poll `model` until its translation is ready, failed or not started.
    ///
    /// `on_update` sees every non-ready status of the current poll, in order.
    /// Results that arrive after this poll was superseded are dropped.
    pub async fn poll_until_terminal<F>(
        &self,
        model: &ModelRef,
        mut on_update: F,
    ) -> Result<PollOutcome, PollError>
    where
        F: FnMut(&TranslationStatus) + Send,
    {
        let mut generation = 0;
        self.target.send_modify(|target| {
            target.model = Some(model.clone());
            target.generation += 1;
            generation = target.generation;
        });
        let mut changes = self.target.subscribe();
        debug!(model = %model, generation, "Polling translation status");

        loop {
            let response = self.api.model_status(model).await;
            if !self.is_current(generation) {
                debug!(model = %model, "Dropping status of superseded poll");
                return Ok(PollOutcome::Superseded);
            }

            let payload = response.map_err(|e| {
                warn!(model = %model, "Status request failed: {}", e);
                e
            })?;
            let status = TranslationStatus::classify(payload, self.config.unknown_status)?;

            match &status {
                TranslationStatus::Ready => {
                    info!(model = %model, "Translation ready");
                    return Ok(PollOutcome::Ready);
                }
                TranslationStatus::Failed { messages } => {
                    warn!(model = %model, messages = messages.len(), "Translation failed");
                    on_update(&status);
                    return Ok(PollOutcome::Failed(messages.clone()));
                }
                TranslationStatus::NotStarted => {
                    on_update(&status);
                    if !self.config.retry_not_started {
                        info!(model = %model, "Model has not been translated");
                        return Ok(PollOutcome::NotStarted);
                    }
                }
                TranslationStatus::InProgress { progress } => {
                    debug!(model = %model, progress = %progress, "Translation in progress");
                    on_update(&status);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = changes.changed() => {}
            }
            if !self.is_current(generation) {
                debug!(model = %model, "Poll superseded while waiting");
                return Ok(PollOutcome::Superseded);
            }
        }
    }
}
