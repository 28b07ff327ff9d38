//! C11 — Provider Client.
//!
//! Submits generation requests and polls status against the external
//! image-generation service. Grounded in the teacher's `reqwest` dependency
//! and the thin remote-backend wrapper shape of `api::gateway::BackendConfig`.

use crate::model::Size;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provider client errors.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The HTTP transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider's response could not be decoded into the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Provider-facing poll status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    /// Queued at the provider, not yet started.
    Pending,
    /// Actively generating.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

/// One rendered frame as returned by the provider, before being reassembled
/// into a byte blob.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderFrame {
    /// Facing/direction tag for this frame.
    pub direction: String,
    /// Base64-encoded frame payload.
    pub base64: String,
}

/// The provider's poll response.
#[derive(Debug, Clone)]
pub struct PollResult {
    /// 0-100 progress as reported by the provider.
    pub progress: u8,
    /// Coarse status.
    pub status: ProviderStatus,
    /// Ordered frames, present once `status == Completed`.
    pub frames: Option<Vec<ProviderFrame>>,
}

/// A submission request translated from a `StructuredRequest`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    /// Free-text description sent to the provider.
    pub description: String,
    /// Canvas width, in pixels (the provider takes a single integer size).
    pub size: u32,
    /// Optional text-guidance strength.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_guidance_scale: Option<f64>,
    /// Optional base64 initial/palette image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_image: Option<String>,
}

/// The provider's submission response.
#[derive(Debug, Clone, Deserialize)]
struct SubmitResponse {
    external_job_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PollResponseWire {
    progress: u8,
    status: String,
    character_data: Option<CharacterDataWire>,
}

#[derive(Debug, Clone, Deserialize)]
struct CharacterDataWire {
    rotations: Vec<ProviderFrame>,
}

/// Submit/poll surface exposed by the external image-generation provider.
#[async_trait::async_trait]
pub trait ProviderClient: Send + Sync {
    /// Submit a generation request, returning the provider's external job id.
    async fn submit(&self, request: GenerationRequest) -> Result<String, ProviderError>;

    /// Poll the provider for the current state of `external_job_id`.
    async fn poll_status(&self, external_job_id: &str) -> Result<PollResult, ProviderError>;
}

/// HTTP-backed provider client.
pub struct HttpProviderClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProviderClient {
    /// Construct a client against the given provider base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait::async_trait]
impl ProviderClient for HttpProviderClient {
    async fn submit(&self, request: GenerationRequest) -> Result<String, ProviderError> {
        let response: SubmitResponse = self
            .client
            .post(format!("{}/generate", self.base_url))
            .json(&request)
            .send()
            .await?
            .json()
            .await?;
        Ok(response.external_job_id)
    }

    async fn poll_status(&self, external_job_id: &str) -> Result<PollResult, ProviderError> {
        let wire: PollResponseWire = self
            .client
            .get(format!("{}/status/{}", self.base_url, external_job_id))
            .send()
            .await?
            .json()
            .await?;

        let status = match wire.status.as_str() {
            "pending" => ProviderStatus::Pending,
            "processing" => ProviderStatus::Processing,
            "completed" => ProviderStatus::Completed,
            "failed" => ProviderStatus::Failed,
            other => return Err(ProviderError::Decode(format!("unknown status: {other}"))),
        };

        Ok(PollResult {
            progress: wire.progress,
            status,
            frames: wire.character_data.map(|data| data.rotations),
        })
    }
}

/// Decode an ordered list of provider frames into raw byte blobs, in order.
pub fn decode_frames(frames: &[ProviderFrame]) -> Result<Vec<Vec<u8>>, ProviderError> {
    frames
        .iter()
        .map(|frame| {
            STANDARD
                .decode(&frame.base64)
                .map_err(|e| ProviderError::Decode(e.to_string()))
        })
        .collect()
}

/// Translate a structured request's relevant fields into the provider's
/// submission shape.
pub fn build_request(
    description: &str,
    size: Size,
    text_guidance_scale: Option<f64>,
    init_image: Option<String>,
) -> GenerationRequest {
    GenerationRequest {
        description: description.to_string(),
        size: size.width,
        text_guidance_scale,
        init_image,
    }
}
