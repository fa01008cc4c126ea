//! KoboldCpp backend client.
//!
//! Speaks the KoboldCpp HTTP API:
//! - `POST /api/v1/generate` blocks until generation finishes
//! - `POST /api/extra/generate/check` returns the text decoded so far
//! - `POST /api/extra/abort` stops the running generation
//! - `GET /api/v1/model` reports the loaded model (used as a health check)
//!
//! Asynchronous mode is built on the same endpoints: `submit` fires the
//! blocking generate call on a background task and `check` reads the partial
//! output while it runs.

use async_trait::async_trait;
use koboldcord_config::BackendConfig;
use koboldcord_core::backend::{GenerationBackend, GenerationRequest, GenerationStatus};
use koboldcord_core::error::GenerationError;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// A KoboldCpp server reachable over HTTP.
pub struct KoboldClient {
    base_url: String,
    client: reqwest::Client,
    /// Background generate call started by `submit`
    inflight: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl KoboldClient {
    /// Create a client for the server at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GenerationError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(GenerationError::NotConfigured("backend URL is empty".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            client,
            inflight: Arc::new(Mutex::new(None)),
        })
    }

    /// Create a client from the `[backend]` config section.
    pub fn from_config(config: &BackendConfig) -> Result<Self, GenerationError> {
        Self::new(
            config.api_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_generate(
        client: &reqwest::Client,
        url: &str,
        request: &GenerationRequest,
    ) -> Result<String, GenerationError> {
        let response = client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if status != 200 {
            warn!(status, body = %body, "Backend returned error");
            return Err(GenerationError::ApiError {
                status_code: status,
                message: body,
            });
        }
        parse_results(&body)
    }

    fn replace_inflight(&self, handle: Option<JoinHandle<()>>) {
        let previous = match self.inflight.lock() {
            Ok(mut slot) => std::mem::replace(&mut *slot, handle),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), handle),
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

/// `{"results": [{"text": "..."}]}`, shared by generate and check.
#[derive(Debug, Deserialize)]
struct ResultsResponse {
    #[serde(default)]
    results: Vec<ResultText>,
}

#[derive(Debug, Deserialize)]
struct ResultText {
    #[serde(default)]
    text: String,
}

fn parse_results(body: &str) -> Result<String, GenerationError> {
    let parsed: ResultsResponse = serde_json::from_str(body)
        .map_err(|e| GenerationError::InvalidResponse(format!("Failed to parse response: {e}")))?;
    parsed
        .results
        .into_iter()
        .next()
        .map(|r| r.text)
        .ok_or_else(|| GenerationError::InvalidResponse("No results in response".into()))
}

/// Map a check response to a status. 503 means the server is busy with
/// nothing to report yet.
fn check_status(status: u16, body: &str) -> Result<GenerationStatus, GenerationError> {
    match status {
        200 => parse_results(body).map(GenerationStatus::Ready),
        503 => Ok(GenerationStatus::Pending),
        _ => Err(GenerationError::ApiError {
            status_code: status,
            message: body.to_string(),
        }),
    }
}

#[async_trait]
impl GenerationBackend for KoboldClient {
    fn name(&self) -> &str {
        "koboldcpp"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        debug!(
            prompt_chars = request.prompt.len(),
            stops = request.stop_sequence.len(),
            "Sending generate request"
        );
        Self::post_generate(&self.client, &self.url("/api/v1/generate"), request).await
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<(), GenerationError> {
        debug!(
            prompt_chars = request.prompt.len(),
            stops = request.stop_sequence.len(),
            "Submitting async generate request"
        );

        let client = self.client.clone();
        let url = self.url("/api/v1/generate");
        let request = request.clone();
        let handle = tokio::spawn(async move {
            match Self::post_generate(&client, &url, &request).await {
                Ok(text) => trace!(chars = text.len(), "Background generation finished"),
                Err(e) => warn!(error = %e, "Background generation failed"),
            }
        });
        self.replace_inflight(Some(handle));
        Ok(())
    }

    async fn check(&self) -> Result<GenerationStatus, GenerationError> {
        let response = self
            .client
            .post(self.url("/api/extra/generate/check"))
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        trace!(status, "Check response");
        check_status(status, &body)
    }

    async fn abort(&self) -> Result<(), GenerationError> {
        self.replace_inflight(None);
        let response = self
            .client
            .post(self.url("/api/extra/abort"))
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GenerationError::ApiError {
                status_code: response.status().as_u16(),
                message: "abort rejected".into(),
            });
        }
        debug!("Generation aborted");
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, GenerationError> {
        let response = self
            .client
            .get(self.url("/api/v1/model"))
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}
