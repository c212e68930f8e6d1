use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::{BackendKind, ExtractionBackend, ExtractionRequest};
use crate::error::ExtractionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionLevel {
    #[default]
    Accurate,
    Fast,
}

impl FromStr for RecognitionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "accurate" => Ok(RecognitionLevel::Accurate),
            "fast" => Ok(RecognitionLevel::Fast),
            other => Err(format!("unknown recognition level '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecognitionOptions {
    pub level: RecognitionLevel,
    pub language_correction: bool,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            level: RecognitionLevel::Accurate,
            language_correction: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextRegion {
    pub text: String,
    pub confidence: Option<f32>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct RecognizerError(pub String);

/// On-device recognizer. Called on the blocking thread pool.
pub trait TextRecognizer: Send + Sync + 'static {
    fn recognize(
        &self,
        image: &DynamicImage,
        options: &RecognitionOptions,
    ) -> Result<Vec<TextRegion>, RecognizerError>;
}

/// Stand-in used when no recognizer could be set up.
#[derive(Debug, Clone)]
pub struct UnavailableRecognizer {
    reason: String,
}

impl UnavailableRecognizer {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl TextRecognizer for UnavailableRecognizer {
    fn recognize(
        &self,
        _image: &DynamicImage,
        _options: &RecognitionOptions,
    ) -> Result<Vec<TextRegion>, RecognizerError> {
        Err(RecognizerError(self.reason.clone()))
    }
}

#[derive(Clone)]
pub struct LocalOcrExtractor {
    recognizer: Arc<dyn TextRecognizer>,
    options: RecognitionOptions,
}

impl LocalOcrExtractor {
    pub fn new(recognizer: Arc<dyn TextRecognizer>, options: RecognitionOptions) -> Self {
        Self {
            recognizer,
            options,
        }
    }

    pub fn options(&self) -> RecognitionOptions {
        self.options
    }
}

#[async_trait]
impl ExtractionBackend for LocalOcrExtractor {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalOcr
    }

    async fn extract_text(&self, request: &ExtractionRequest) -> Result<String, ExtractionError> {
        let bytes = request.image.encoded_bytes.clone();
        let recognizer = Arc::clone(&self.recognizer);
        let options = self.options;

        let regions = tokio::task::spawn_blocking(move || {
            let img = image::load_from_memory(&bytes).map_err(|e| {
                ExtractionError::HandlerFailed(format!("Failed to decode image: {e}"))
            })?;
            recognizer
                .recognize(&img, &options)
                .map_err(|e| ExtractionError::HandlerFailed(e.to_string()))
        })
        .await
        .map_err(|e| ExtractionError::HandlerFailed(format!("Recognition task panicked: {e}")))??;

        let lines: Vec<&str> = regions
            .iter()
            .map(|region| region.text.trim())
            .filter(|text| !text.is_empty())
            .collect();

        debug!(regions = lines.len(), level = ?options.level, "Local recognition finished");

        if lines.is_empty() {
            return Err(ExtractionError::NoTextFound);
        }
        Ok(lines.join("\n"))
    }
}

#[cfg(feature = "tesseract")]
mod tesseract {
    use std::io::Cursor;
    use std::sync::{Mutex, PoisonError};

    use image::{DynamicImage, ImageFormat};
    use leptess::{LepTess, Variable};
    use tracing::info;

    use super::{RecognitionLevel, RecognitionOptions, RecognizerError, TextRecognizer, TextRegion};

    /// Tesseract via leptess.
    pub struct TesseractRecognizer {
        tesseract: Mutex<LepTess>,
    }

    impl TesseractRecognizer {
        pub fn new(languages: &str) -> Result<Self, RecognizerError> {
            let lt = LepTess::new(None, languages).map_err(|e| RecognizerError(e.to_string()))?;
            info!(languages, "Tesseract OCR initialized");
            Ok(Self {
                tesseract: Mutex::new(lt),
            })
        }
    }

    impl TextRecognizer for TesseractRecognizer {
        fn recognize(
            &self,
            image: &DynamicImage,
            options: &RecognitionOptions,
        ) -> Result<Vec<TextRegion>, RecognizerError> {
            let mut png = Vec::new();
            image
                .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
                .map_err(|e| RecognizerError(format!("Failed to encode image: {e}")))?;

            // full layout analysis for accurate, single uniform block for fast
            let page_seg_mode = match options.level {
                RecognitionLevel::Accurate => "3",
                RecognitionLevel::Fast => "6",
            };
            let dict_correction = if options.language_correction { "1" } else { "0" };

            let mut lt = self
                .tesseract
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            lt.set_variable(Variable::TesseditPagesegMode, page_seg_mode)
                .map_err(|e| RecognizerError(format!("Failed to set page mode: {e:?}")))?;
            lt.set_variable(Variable::TesseditEnableDictCorrection, dict_correction)
                .map_err(|e| RecognizerError(format!("Failed to set dictionary mode: {e:?}")))?;
            lt.set_image_from_mem(&png)
                .map_err(|e| RecognizerError(format!("Failed to set image: {e}")))?;

            let text = lt
                .get_utf8_text()
                .map_err(|e| RecognizerError(format!("Failed to extract text: {e}")))?;
            let confidence = Some(lt.mean_text_conf() as f32 / 100.0);

            Ok(text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| TextRegion {
                    text: line.to_string(),
                    confidence,
                })
                .collect())
        }
    }
}

#[cfg(feature = "tesseract")]
pub use tesseract::TesseractRecognizer;
