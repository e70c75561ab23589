//! Transport to the inference/report backend.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{
    header::CONTENT_TYPE,
    multipart::{Form, Part},
    Client, Response,
};
use shared::{
    domain::{CaptionRecord, CaseId, CaseMetadata, ImageUpload},
    error::{ApiError, ErrorCode},
    protocol::{CaptionResponse, ErrorBody, HealthResponse, SaveCaseRequest, SaveCaseResponse},
};
use thiserror::Error;
use tracing::{debug, warn};

/// Confidence reported for remote captions whose response omits one.
pub const DEFAULT_REMOTE_CONFIDENCE: f64 = 1.0;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("backend returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed backend response: {0}")]
    Malformed(String),
    #[error("backend reported failure: {0}")]
    Application(String),
}

impl RemoteError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RemoteError::Transport(_) => ErrorCode::Transport,
            RemoteError::Status { .. } => ErrorCode::Status,
            RemoteError::Malformed(_) => ErrorCode::Malformed,
            RemoteError::Application(_) => ErrorCode::Application,
        }
    }

    /// The request completed and the backend said no.
    pub fn is_application(&self) -> bool {
        matches!(self, RemoteError::Application(_))
    }

    pub fn to_api_error(&self) -> ApiError {
        let message = match self {
            RemoteError::Transport(message)
            | RemoteError::Malformed(message)
            | RemoteError::Application(message) => message.clone(),
            RemoteError::Status { status, message } => format!("{status}: {message}"),
        };
        ApiError::new(self.code(), message)
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            return RemoteError::Malformed(value.to_string());
        }
        if let Some(status) = value.status() {
            return RemoteError::Status {
                status: status.as_u16(),
                message: value.to_string(),
            };
        }
        RemoteError::Transport(value.to_string())
    }
}

#[async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn generate_caption(&self, image: &ImageUpload) -> Result<CaptionRecord, RemoteError>;
    async fn save_case(&self, case: &CaseMetadata) -> Result<CaseId, RemoteError>;
    async fn generate_pdf(
        &self,
        image: &ImageUpload,
        case: &CaseMetadata,
    ) -> Result<Vec<u8>, RemoteError>;
    async fn health(&self) -> Result<HealthResponse, RemoteError>;
}

/// Used when no backend URL is configured; every call fails at the transport level.
pub struct MissingRemoteBackend;

#[async_trait]
impl RemoteBackend for MissingRemoteBackend {
    async fn generate_caption(&self, _image: &ImageUpload) -> Result<CaptionRecord, RemoteError> {
        Err(RemoteError::Transport("remote backend is not configured".into()))
    }

    async fn save_case(&self, _case: &CaseMetadata) -> Result<CaseId, RemoteError> {
        Err(RemoteError::Transport("remote backend is not configured".into()))
    }

    async fn generate_pdf(
        &self,
        _image: &ImageUpload,
        _case: &CaseMetadata,
    ) -> Result<Vec<u8>, RemoteError> {
        Err(RemoteError::Transport("remote backend is not configured".into()))
    }

    async fn health(&self) -> Result<HealthResponse, RemoteError> {
        Err(RemoteError::Transport("remote backend is not configured".into()))
    }
}

pub struct HttpRemoteClient {
    http: Client,
    base_url: String,
    health_timeout: Duration,
}

impl HttpRemoteClient {
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        health_timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            health_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

fn image_part(image: &ImageUpload) -> Part {
    let part = Part::bytes(image.bytes.clone()).file_name(image.filename.clone());
    let Some(mime_type) = image.mime_type.as_deref() else {
        return part;
    };
    match part.mime_str(mime_type) {
        Ok(part) => part,
        Err(error) => {
            warn!(%error, mime_type, "remote: ignoring unparsable image mime type");
            Part::bytes(image.bytes.clone()).file_name(image.filename.clone())
        }
    }
}

/// Maps a non-2xx response to `RemoteError::Status`, pulling `error` out of a
/// JSON body when there is one.
async fn ensure_success(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
    Err(RemoteError::Status {
        status: status.as_u16(),
        message,
    })
}

pub(crate) fn caption_from_response(
    body: CaptionResponse,
    elapsed: Duration,
) -> Result<CaptionRecord, RemoteError> {
    if !body.is_success() {
        return Err(RemoteError::Application(
            body.error
                .unwrap_or_else(|| "failed to generate caption".to_string()),
        ));
    }
    let text = body
        .caption
        .filter(|caption| !caption.trim().is_empty())
        .ok_or_else(|| RemoteError::Malformed("caption missing from response".into()))?;
    Ok(CaptionRecord::new(
        text,
        body.confidence.unwrap_or(DEFAULT_REMOTE_CONFIDENCE),
        body.processing_time.unwrap_or(elapsed.as_secs_f64()),
    ))
}

#[async_trait]
impl RemoteBackend for HttpRemoteClient {
    async fn generate_caption(&self, image: &ImageUpload) -> Result<CaptionRecord, RemoteError> {
        let started = Instant::now();
        let form = Form::new().part("image", image_part(image));
        let response = self
            .http
            .post(self.endpoint("generate-caption"))
            .multipart(form)
            .send()
            .await?;
        let body: CaptionResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "remote: caption response received"
        );
        caption_from_response(body, started.elapsed())
    }

    async fn save_case(&self, case: &CaseMetadata) -> Result<CaseId, RemoteError> {
        let response = self
            .http
            .post(self.endpoint("save-case"))
            .json(&SaveCaseRequest { case: case.clone() })
            .send()
            .await?;
        let body: SaveCaseResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;
        if !body.success {
            return Err(RemoteError::Application(
                body.error
                    .unwrap_or_else(|| "failed to save case".to_string()),
            ));
        }
        body.case_id
            .ok_or_else(|| RemoteError::Malformed("case_id missing from response".into()))
    }

    async fn generate_pdf(
        &self,
        image: &ImageUpload,
        case: &CaseMetadata,
    ) -> Result<Vec<u8>, RemoteError> {
        let mut form = Form::new().part("image", image_part(image));
        for (key, value) in &case.fields {
            form = form.text(key.clone(), value.clone());
        }
        if let Some(caption) = &case.ai_caption {
            form = form.text("aiCaption", caption.clone());
        }

        let response = ensure_success(
            self.http
                .post(self.endpoint("generate-pdf"))
                .multipart(form)
                .send()
                .await?,
        )
        .await?;

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));
        let bytes = response.bytes().await?;
        if is_json {
            let message = serde_json::from_slice::<ErrorBody>(&bytes)
                .ok()
                .and_then(|b| b.error)
                .unwrap_or_else(|| "backend returned json instead of a document".to_string());
            return Err(RemoteError::Application(message));
        }
        if bytes.is_empty() {
            return Err(RemoteError::Malformed("empty report document".into()));
        }
        Ok(bytes.to_vec())
    }

    async fn health(&self) -> Result<HealthResponse, RemoteError> {
        let response = self
            .http
            .get(self.endpoint("health"))
            .timeout(self.health_timeout)
            .send()
            .await?;
        ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
#[path = "tests/remote_tests.rs"]
mod tests;
