use std::env;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::camera::{FlashMode, SessionSettings};
use crate::extraction::{BackendPreference, RecognitionLevel, RecognitionOptions, DEFAULT_BASE_URL};
use crate::normalize::{EncodeFormat, NormalizeOptions, ResizePolicy};
use crate::retry::RetryPolicy;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

pub const DEFAULT_PROMPT: &str = "Extract all text from this image exactly as it appears. \
Preserve line breaks and reading order. Return only the extracted text with no commentary.";

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_opt<T: std::str::FromStr>(var: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Ignoring.", val, var, e);
                None
            }
        },
        Err(_) => None,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub cloud: CloudConfig,
    pub local_ocr: LocalOcrConfig,
    pub session: SessionConfig,
    #[serde(skip)]
    pub run: RunConfiguration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Name of the environment variable holding the API key.
    pub credential_var: String,
}

impl CloudConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalOcrConfig {
    /// Tesseract language codes, `+`-separated.
    pub languages: String,
    pub level: RecognitionLevel,
    pub language_correction: bool,
}

impl LocalOcrConfig {
    pub fn recognition_options(&self) -> RecognitionOptions {
        RecognitionOptions {
            level: self.level,
            language_correction: self.language_correction,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub flash_mode: FlashMode,
}

impl SessionConfig {
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            flash_mode: self.flash_mode,
            ..SessionSettings::default()
        }
    }
}

/// Everything one pipeline run needs besides the session and credential.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfiguration {
    pub backend: BackendPreference,
    pub target_width: u32,
    pub target_height: u32,
    pub resize_policy: ResizePolicy,
    pub enhance_contrast: bool,
    pub format: EncodeFormat,
    pub quality: u8,
    pub model_id: String,
    pub prompt: String,
    /// Sent as the cloud `generation_config` when non-empty.
    pub generation_options: Map<String, Value>,
    pub max_attempts: u32,
    pub initial_retry_delay: Duration,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        let image = NormalizeOptions::default();
        let retry = RetryPolicy::default();
        Self {
            backend: BackendPreference::Auto,
            target_width: image.target_width,
            target_height: image.target_height,
            resize_policy: image.policy,
            enhance_contrast: image.enhance_contrast,
            format: image.format,
            quality: image.quality,
            model_id: DEFAULT_MODEL.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            generation_options: Map::new(),
            max_attempts: retry.max_attempts,
            initial_retry_delay: retry.initial_delay,
        }
    }
}

impl RunConfiguration {
    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            target_width: self.target_width,
            target_height: self.target_height,
            policy: self.resize_policy,
            enhance_contrast: self.enhance_contrast,
            format: self.format,
            quality: self.quality.clamp(1, 100),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.initial_retry_delay)
    }

    fn from_env() -> Self {
        let defaults = Self::default();
        let dimension = parse_env_or("DOCSNAP_MAX_DIMENSION", defaults.target_width);
        Self {
            backend: parse_env_or("DOCSNAP_BACKEND", defaults.backend),
            target_width: dimension,
            target_height: dimension,
            resize_policy: parse_env_or("DOCSNAP_RESIZE_POLICY", defaults.resize_policy),
            quality: parse_env_or("DOCSNAP_QUALITY", defaults.quality),
            model_id: env::var("DOCSNAP_MODEL").unwrap_or(defaults.model_id),
            prompt: env::var("DOCSNAP_PROMPT").unwrap_or(defaults.prompt),
            max_attempts: parse_env_or("DOCSNAP_MAX_ATTEMPTS", defaults.max_attempts),
            initial_retry_delay: parse_env_opt("DOCSNAP_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_retry_delay),
            ..defaults
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cloud: CloudConfig {
                base_url: env::var("DOCSNAP_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
                timeout_secs: parse_env_or("DOCSNAP_TIMEOUT", 30),
                credential_var: env::var("DOCSNAP_API_KEY_VAR")
                    .unwrap_or_else(|_| "GEMINI_API_KEY".to_string()),
            },
            local_ocr: LocalOcrConfig {
                languages: env::var("DOCSNAP_OCR_LANGUAGES").unwrap_or_else(|_| "eng".to_string()),
                level: parse_env_or("DOCSNAP_OCR_LEVEL", RecognitionLevel::Accurate),
                language_correction: parse_env_or("DOCSNAP_OCR_LANGUAGE_CORRECTION", true),
            },
            session: SessionConfig {
                flash_mode: parse_env_or("DOCSNAP_FLASH", FlashMode::Off),
            },
            run: RunConfiguration::from_env(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}
