//! One-shot capture → normalize → extract pipeline.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::camera::{CaptureSessionController, RawCapture};
use crate::config::RunConfiguration;
use crate::credentials::CredentialStore;
use crate::error::{PipelineError, PreprocessingError, Result};
use crate::extraction::{BackendKind, BackendSelector, ExtractionRequest};
use crate::normalize::{normalize, NormalizedImage};
use crate::retry::RetryCoordinator;
use crate::telemetry::{ImageMetadata, TelemetryEvent, TelemetrySink};

/// What a run learned along the way, reported with the final event.
#[derive(Default)]
struct RunTrace {
    backend: Option<BackendKind>,
    image: Option<ImageMetadata>,
}

pub struct Orchestrator {
    session: Arc<CaptureSessionController>,
    credentials: Arc<dyn CredentialStore>,
    selector: BackendSelector,
    retry: RetryCoordinator,
    telemetry: Arc<dyn TelemetrySink>,
}

impl Orchestrator {
    pub fn new(
        session: Arc<CaptureSessionController>,
        credentials: Arc<dyn CredentialStore>,
        selector: BackendSelector,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            session,
            credentials,
            selector,
            retry: RetryCoordinator::new(Arc::clone(&telemetry)),
            telemetry,
        }
    }

    pub fn session(&self) -> &Arc<CaptureSessionController> {
        &self.session
    }

    /// Capture one frame and turn it into text.
    ///
    /// The session must already be running. Only the extraction call is
    /// retried; any other failure is returned as-is. Cancelling `cancel`
    /// abandons the run at the next await point with `Cancelled`.
    pub async fn run(&self, config: &RunConfiguration, cancel: &CancellationToken) -> Result<String> {
        let started = Instant::now();
        let mut trace = RunTrace::default();

        let result = self.run_stages(config, cancel, &mut trace).await;

        let mut event = TelemetryEvent::new("pipeline", started.elapsed(), result.is_ok());
        event.backend = trace.backend;
        event.image = trace.image;
        self.telemetry.record(event);

        match &result {
            Ok(text) => info!(
                backend = trace.backend.map(|b| b.as_str()),
                chars = text.chars().count(),
                duration_ms = started.elapsed().as_millis() as u64,
                "Pipeline finished"
            ),
            Err(error) => warn!(%error, "Pipeline failed"),
        }
        result
    }

    async fn run_stages(
        &self,
        config: &RunConfiguration,
        cancel: &CancellationToken,
        trace: &mut RunTrace,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let raw = self.capture(cancel).await?;
        let image = self.normalize(raw, config).await?;
        trace.image = Some(image.metadata());

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let credential = self.credentials.fetch();
        let backend = self.selector.select_with(config.backend, credential.as_ref());
        trace.backend = Some(backend.kind());

        let request = ExtractionRequest {
            image,
            prompt: config.prompt.clone(),
            model_id: config.model_id.clone(),
            extra_options: config.generation_options.clone(),
        };

        let started = Instant::now();
        let result = self
            .retry
            .execute(&config.retry_policy(), cancel, || backend.extract_text(&request))
            .await;

        self.telemetry.record(
            TelemetryEvent::new("extract", started.elapsed(), result.is_ok())
                .with_backend(backend.kind())
                .with_image(request.image.metadata()),
        );

        Ok(result?)
    }

    async fn capture(&self, cancel: &CancellationToken) -> Result<RawCapture> {
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            result = self.session.capture() => result,
        };
        self.telemetry
            .record(TelemetryEvent::new("capture", started.elapsed(), result.is_ok()));

        let raw = result?;
        debug!(capture_id = %raw.id, bytes = raw.bytes.len(), format = ?raw.format, "Frame captured");
        Ok(raw)
    }

    async fn normalize(&self, raw: RawCapture, config: &RunConfiguration) -> Result<NormalizedImage> {
        let options = config.normalize_options();
        let started = Instant::now();

        let result = tokio::task::spawn_blocking(move || normalize(&raw, &options))
            .await
            .map_err(|e| PreprocessingError::EncodingFailed(format!("normalization task failed: {e}")))
            .and_then(|inner| inner);

        let mut event = TelemetryEvent::new("normalize", started.elapsed(), result.is_ok());
        if let Ok(image) = &result {
            event = event.with_image(image.metadata());
        }
        self.telemetry.record(event);

        Ok(result?)
    }
}
