use std::str::FromStr;
use std::sync::Arc;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{CloudVisionExtractor, ExtractionBackend, LocalOcrExtractor};
use crate::credentials::ApiKey;

/// Which backend a run asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Cloud when a credential is configured, otherwise on-device.
    #[default]
    Auto,
    Cloud,
    Local,
}

impl FromStr for BackendPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(BackendPreference::Auto),
            "cloud" => Ok(BackendPreference::Cloud),
            "local" | "ocr" => Ok(BackendPreference::Local),
            other => Err(format!("unknown backend '{other}'")),
        }
    }
}

/// Hands out a backend per request. Nothing is cached: a credential that
/// appears or disappears between runs takes effect on the next one.
#[derive(Clone)]
pub struct BackendSelector {
    client: Client,
    base_url: String,
    local: Arc<LocalOcrExtractor>,
}

impl BackendSelector {
    pub fn new(client: Client, base_url: impl Into<String>, local: LocalOcrExtractor) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            local: Arc::new(local),
        }
    }

    pub fn select(&self, credential: Option<&ApiKey>) -> Arc<dyn ExtractionBackend> {
        self.select_with(BackendPreference::Auto, credential)
    }

    pub fn select_with(
        &self,
        preference: BackendPreference,
        credential: Option<&ApiKey>,
    ) -> Arc<dyn ExtractionBackend> {
        let usable = credential.filter(|key| !key.is_blank());

        let backend: Arc<dyn ExtractionBackend> = match (preference, usable) {
            (BackendPreference::Local, _) | (BackendPreference::Auto, None) => self.local.clone(),
            (BackendPreference::Auto, Some(key)) => self.cloud(key.clone()),
            (BackendPreference::Cloud, key) => {
                self.cloud(key.cloned().unwrap_or_else(|| ApiKey::new("")))
            }
        };

        debug!(?preference, backend = backend.kind().as_str(), "Selected extraction backend");
        backend
    }

    fn cloud(&self, credential: ApiKey) -> Arc<dyn ExtractionBackend> {
        Arc::new(CloudVisionExtractor::new(
            self.client.clone(),
            self.base_url.clone(),
            credential,
        ))
    }
}
