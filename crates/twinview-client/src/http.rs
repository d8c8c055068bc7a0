//! HTTP implementation of the model API

use futures_util::future::{BoxFuture, FutureExt};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use twinview_core::{ModelRef, ModelSummary, ModelUpload, StatusPayload};

use crate::api::{ApiError, ModelApi};

/// Multipart field carrying the model file
const FILE_FIELD: &str = "model-file";
/// Multipart field naming the main design inside an archive
const ENTRYPOINT_FIELD: &str = "model-zip-entrypoint";

/// Model API client over HTTP
pub struct HttpModelApi {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(alias = "id")]
    urn: ModelRef,
}

impl HttpModelApi {
    /// Create a client for the API served under `{base_url}/api`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    /// Decode a JSON body, turning non-success statuses into [`ApiError::Status`]
    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Model API returned non-success status");
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn fetch_models(&self) -> Result<Vec<ModelSummary>, ApiError> {
        let url = self.url("/models");
        debug!(url = %url, "Listing models");
        let response = self.client.get(&url).send().await?;
        let models: Vec<ModelSummary> = Self::read_json(response).await?;
        info!(count = models.len(), "Listed models");
        Ok(models)
    }

    async fn post_model(&self, upload: ModelUpload) -> Result<ModelRef, ApiError> {
        if upload.needs_archive_entry() {
            return Err(ApiError::InvalidRequest(format!(
                "archive {} needs the path of its main design",
                upload.file_name
            )));
        }

        let ModelUpload {
            file_name,
            bytes,
            archive_entry,
        } = upload;
        let size = bytes.len();
        let mut form =
            Form::new().part(FILE_FIELD, Part::bytes(bytes).file_name(file_name.clone()));
        if let Some(entry) = archive_entry {
            form = form.text(ENTRYPOINT_FIELD, entry);
        }

        info!(file = %file_name, bytes = size, "Uploading model");
        let response = self
            .client
            .post(self.url("/models"))
            .multipart(form)
            .send()
            .await?;
        let uploaded: UploadResponse = Self::read_json(response).await?;
        info!(file = %file_name, urn = %uploaded.urn, "Model uploaded");
        Ok(uploaded.urn)
    }

    async fn fetch_status(&self, model: &ModelRef) -> Result<StatusPayload, ApiError> {
        let url = self.url(&format!("/models/{}/status", model));
        let response = self.client.get(&url).send().await?;
        let payload: StatusPayload = Self::read_json(response).await?;
        debug!(
            urn = %model,
            status = %payload.status,
            progress = ?payload.progress,
            "Fetched translation status"
        );
        Ok(payload)
    }
}

impl ModelApi for HttpModelApi {
    fn list_models(&self) -> BoxFuture<'_, Result<Vec<ModelSummary>, ApiError>> {
        self.fetch_models().boxed()
    }

    fn upload_model(&self, upload: ModelUpload) -> BoxFuture<'_, Result<ModelRef, ApiError>> {
        self.post_model(upload).boxed()
    }

    fn model_status<'a>(
        &'a self,
        model: &'a ModelRef,
    ) -> BoxFuture<'a, Result<StatusPayload, ApiError>> {
        self.fetch_status(model).boxed()
    }
}
