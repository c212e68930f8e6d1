//! Text extraction backends.
//!
//! Every backend implements [`ExtractionBackend`]; call sites only ever see
//! `Arc<dyn ExtractionBackend>` handed out by the [`BackendSelector`].
//!
//! - `CloudVisionExtractor` posts the image to a `generateContent` endpoint
//! - `LocalOcrExtractor` runs an on-device [`TextRecognizer`]

mod cloud;
mod local;
mod selector;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::ExtractionError;
use crate::normalize::NormalizedImage;

pub use cloud::{classify_status, CloudVisionExtractor, DEFAULT_BASE_URL};
pub use local::{
    LocalOcrExtractor, RecognitionLevel, RecognitionOptions, RecognizerError, TextRecognizer,
    TextRegion, UnavailableRecognizer,
};
#[cfg(feature = "tesseract")]
pub use local::TesseractRecognizer;
pub use selector::{BackendPreference, BackendSelector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    CloudVision,
    LocalOcr,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::CloudVision => "cloud_vision",
            BackendKind::LocalOcr => "local_ocr",
        }
    }
}

/// Everything a backend needs for one extraction.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub image: NormalizedImage,
    pub prompt: String,
    pub model_id: String,
    /// Passed through as the cloud `generation_config`; ignored locally.
    pub extra_options: Map<String, Value>,
}

#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn extract_text(&self, request: &ExtractionRequest) -> Result<String, ExtractionError>;
}
