//! Telemetry collaborator.
//!
//! The core only emits events; persisting or aggregating them is left to
//! whatever [`TelemetrySink`] the host application installs. The default
//! [`TracingTelemetry`] sink forwards everything to `tracing`.

use std::time::Duration;

use tracing::{info, warn};

use crate::error::ExtractionError;
use crate::extraction::BackendKind;

/// Image sizes before and after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub byte_size: usize,
    pub original_width: u32,
    pub original_height: u32,
    pub original_byte_size: usize,
    pub format: &'static str,
    /// JPEG quality; `None` for lossless output.
    pub quality: Option<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    pub operation: &'static str,
    pub duration: Duration,
    pub success: bool,
    pub backend: Option<BackendKind>,
    pub image: Option<ImageMetadata>,
}

impl TelemetryEvent {
    pub fn new(operation: &'static str, duration: Duration, success: bool) -> Self {
        Self {
            operation,
            duration,
            success,
            backend: None,
            image: None,
        }
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_image(mut self, image: ImageMetadata) -> Self {
        self.image = Some(image);
        self
    }
}

/// Emitted by the retry coordinator before each backoff sleep.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryEvent {
    /// 1-based number of the attempt that just failed.
    pub attempt: u32,
    pub delay: Duration,
    pub error: ExtractionError,
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);

    fn retry(&self, event: RetryEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        let backend = event.backend.map(|b| b.as_str()).unwrap_or("-");
        match &event.image {
            Some(image) => info!(
                operation = event.operation,
                duration_ms = event.duration.as_millis() as u64,
                success = event.success,
                backend,
                width = image.width,
                height = image.height,
                bytes = image.byte_size,
                original_bytes = image.original_byte_size,
                "telemetry"
            ),
            None => info!(
                operation = event.operation,
                duration_ms = event.duration.as_millis() as u64,
                success = event.success,
                backend,
                "telemetry"
            ),
        }
    }

    fn retry(&self, event: RetryEvent) {
        warn!(
            attempt = event.attempt,
            delay_ms = event.delay.as_millis() as u64,
            error = %event.error,
            "Retrying extraction"
        );
    }
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record(&self, _event: TelemetryEvent) {}

    fn retry(&self, _event: RetryEvent) {}
}
