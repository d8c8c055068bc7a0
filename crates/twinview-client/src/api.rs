//! Model API contract

use futures_util::future::BoxFuture;
use thiserror::Error;
use twinview_core::{ModelRef, ModelSummary, ModelUpload, StatusPayload};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Request/response contract of the model API
///
/// - `GET /models` lists models
/// - `POST /models` uploads a model file (multipart)
/// - `GET /models/{id}/status` reports translation status
pub trait ModelApi: Send + Sync {
    fn list_models(&self) -> BoxFuture<'_, Result<Vec<ModelSummary>, ApiError>>;

    fn upload_model(&self, upload: ModelUpload) -> BoxFuture<'_, Result<ModelRef, ApiError>>;

    fn model_status<'a>(
        &'a self,
        model: &'a ModelRef,
    ) -> BoxFuture<'a, Result<StatusPayload, ApiError>>;
}
