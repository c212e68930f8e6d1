use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::{BackendKind, ExtractionBackend, ExtractionRequest};
use crate::credentials::ApiKey;
use crate::error::ExtractionError;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<&'a Map<String, Value>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Cloud vision/LLM backend speaking the `generateContent` protocol.
#[derive(Clone, Debug)]
pub struct CloudVisionExtractor {
    client: Client,
    base_url: String,
    credential: ApiKey,
}

impl CloudVisionExtractor {
    pub fn new(client: Client, base_url: impl Into<String>, credential: ApiKey) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            credential,
        }
    }

    /// HTTP client with a per-request timeout, shared across extractors.
    pub fn build_client(timeout: Duration) -> Result<Client, ExtractionError> {
        Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExtractionError::Transport(format!("Failed to create HTTP client: {e}")))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        )
    }
}

#[async_trait]
impl ExtractionBackend for CloudVisionExtractor {
    fn kind(&self) -> BackendKind {
        BackendKind::CloudVision
    }

    async fn extract_text(&self, request: &ExtractionRequest) -> Result<String, ExtractionError> {
        if self.credential.is_blank() {
            return Err(ExtractionError::MissingCredential);
        }
        let model = request.model_id.trim();
        if model.is_empty() {
            return Err(ExtractionError::MissingModel);
        }

        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: &request.prompt,
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: request.image.mime_type(),
                            data: STANDARD.encode(&request.image.encoded_bytes),
                        },
                    },
                ],
            }],
            generation_config: (!request.extra_options.is_empty())
                .then_some(&request.extra_options),
        };

        debug!(
            model,
            bytes = request.image.encoded_bytes.len(),
            "Sending generateContent request"
        );

        let response = self
            .client
            .post(self.endpoint(model))
            .query(&[("key", self.credential.expose())])
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            debug!(status = status.as_u16(), "generateContent request failed");
            return Err(classify_status(status.as_u16(), model, &text));
        }

        parse_response(&text)
    }
}

/// Map a non-2xx status to the error taxonomy.
pub fn classify_status(status: u16, model: &str, body: &str) -> ExtractionError {
    match status {
        400 => ExtractionError::BadRequest(error_message(body)),
        401 | 403 => ExtractionError::AuthError(status),
        404 => ExtractionError::ModelNotFound(model.to_string()),
        429 => ExtractionError::RateLimited,
        503 => ExtractionError::ServiceUnavailable,
        500..=599 => ExtractionError::ServerError(status),
        _ => ExtractionError::Unknown(status),
    }
}

/// Pull `error.message` out of an API error body, else a short prefix of it.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

fn transport_error(error: reqwest::Error) -> ExtractionError {
    if error.is_timeout() {
        ExtractionError::NetworkTimeout
    } else {
        // the URL carries the API key
        ExtractionError::Transport(error.without_url().to_string())
    }
}

fn parse_response(body: &str) -> Result<String, ExtractionError> {
    let parsed: GenerateContentResponse =
        serde_json::from_str(body).map_err(|e| ExtractionError::DecodeFailure(e.to_string()))?;

    let text: String = parsed
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ExtractionError::NoTextFound);
    }
    Ok(text)
}
